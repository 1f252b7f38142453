use std::fmt;

/// Array key: PHP arrays are ordered maps keyed by integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SerialKey {
    Int(i64),
    Str(String),
    /// Integer key spelled differently from PHP's own output (`i:+1;`),
    /// kept as the whole token.
    Verbatim(String),
}

impl fmt::Display for SerialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) | Self::Verbatim(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for SerialKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<i64> for SerialKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// Decoded PHP-serialized value.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Kept as the original token so an untouched value re-encodes byte for byte.
    Float(String),
    Str(String),
    /// Array whose keys are exactly `0..n` in order.
    List(Vec<SerialValue>),
    Map(Vec<(SerialKey, SerialValue)>),
    Object {
        class: String,
        fields: Vec<(SerialKey, SerialValue)>,
    },
    /// `C:` payload produced by a class's own serializer. Opaque.
    Custom { class: String, payload: String },
    /// `E:` enum case, `Class:Case`.
    Enum(String),
    /// `r:`/`R:` back-reference to an earlier value.
    Reference { strong: bool, index: i64 },
    /// Scalar token PHP accepts but would never write, such as `i:+5;` or
    /// `i:007;`. Written back unchanged.
    Verbatim(String),
}

impl SerialValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object { .. } => "object",
            Self::Custom { .. } => "custom",
            Self::Enum(_) => "enum",
            Self::Reference { .. } => "reference",
            Self::Verbatim(_) => "verbatim",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Look up an entry of a map, list or object by key.
    pub fn get(&self, key: &SerialKey) -> Option<&SerialValue> {
        match (self, key) {
            (Self::List(items), SerialKey::Int(i)) => usize::try_from(*i).ok().and_then(|i| items.get(i)),
            (Self::Map(entries), _) | (Self::Object { fields: entries, .. }, _) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Build a map from `(key, value)` pairs, collapsing to a list when the
    /// keys are `0..n` in order.
    pub fn from_entries(entries: Vec<(SerialKey, SerialValue)>) -> Self {
        let is_list = entries
            .iter()
            .enumerate()
            .all(|(idx, (k, _))| *k == SerialKey::Int(idx as i64));
        if is_list {
            Self::List(entries.into_iter().map(|(_, v)| v).collect())
        } else {
            Self::Map(entries)
        }
    }
}

impl From<&str> for SerialValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for SerialValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for SerialValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for SerialValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
