use std::fmt;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};

/// A single cell as read from, or written to, a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Blob(_) => "BLOB",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render as a SQL literal that fits on a single dump line.
    ///
    /// Line breaks inside text are spliced in with `char()` so that a
    /// line-oriented reader never sees a statement terminator in the middle
    /// of a value.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => {
                if f.is_finite() {
                    format!("{:?}", f)
                } else {
                    "NULL".to_string()
                }
            }
            Self::Text(s) => text_literal(s),
            Self::Blob(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 2 + 3);
                out.push_str("X'");
                for b in bytes {
                    out.push_str(&format!("{:02X}", b));
                }
                out.push('\'');
                out
            }
        }
    }
}

fn text_literal(s: &str) -> String {
    if !s.contains(['\n', '\r']) {
        return format!("'{}'", s.replace('\'', "''"));
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    for ch in s.chars() {
        match ch {
            '\n' | '\r' => {
                if !current.is_empty() {
                    parts.push(format!("'{}'", current.replace('\'', "''")));
                    current.clear();
                }
                parts.push(format!("char({})", ch as u32));
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(format!("'{}'", current.replace('\'', "''")));
    }
    format!("({})", parts.join("||"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Float(f),
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => Self::Text(s.to_string()),
                Err(_) => Self::Blob(bytes.to_vec()),
            },
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        }
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Float(f) => SqlValue::Real(f),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Blob(b),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_escapes_quotes() {
        let v = Value::from("it's");
        assert_eq!(v.to_sql_literal(), "'it''s'");
    }

    #[test]
    fn test_literal_keeps_newlines_off_the_line() {
        let v = Value::from("a;\nb");
        let literal = v.to_sql_literal();
        assert!(!literal.contains('\n'));
        assert_eq!(literal, "('a;'||char(10)||'b')");
    }

    #[test]
    fn test_blob_and_null_literals() {
        assert_eq!(Value::Blob(vec![0xde, 0xad]).to_sql_literal(), "X'DEAD'");
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
        assert_eq!(Value::Float(1.5).to_sql_literal(), "1.5");
    }
}
