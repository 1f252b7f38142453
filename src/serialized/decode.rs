use super::{SerialKey, SerialValue};
use crate::core::{Error, Result};

/// Deepest container nesting accepted, counted from the outermost value.
///
/// Decoding, rewriting and encoding all recurse once per level; 64 levels
/// stay well inside a 2 MiB thread stack in unoptimized builds.
pub const MAX_DEPTH: usize = 64;

/// Decode a complete PHP-serialized string. Trailing bytes are an error.
pub fn decode(input: &str) -> Result<SerialValue> {
    let mut decoder = Decoder {
        input: input.as_bytes(),
        pos: 0,
    };
    let value = decoder.value(0)?;
    if decoder.pos != decoder.input.len() {
        return Err(decoder.error("trailing data after value"));
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::Decode {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next_byte(&mut self) -> Result<u8> {
        let b = self.peek().ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        let found = self.next_byte()?;
        if found != expected {
            self.pos -= 1;
            return Err(self.error(format!(
                "expected '{}', found '{}'",
                expected as char, found as char
            )));
        }
        Ok(())
    }

    /// Bytes up to (not including) `terminator`, consuming the terminator.
    fn until(&mut self, terminator: u8) -> Result<&'a str> {
        let input = self.input;
        let start = self.pos;
        let rel = input[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| self.error(format!("missing '{}'", terminator as char)))?;
        self.pos = start + rel + 1;
        std::str::from_utf8(&input[start..start + rel]).map_err(|_| {
            Error::Decode {
                offset: start,
                message: "invalid UTF-8".into(),
            }
        })
    }

    fn integer(&mut self, terminator: u8) -> Result<i64> {
        let start = self.pos;
        let text = self.until(terminator)?;
        let valid = !text.is_empty()
            && text
                .strip_prefix(['-', '+'])
                .unwrap_or(text)
                .bytes()
                .all(|b| b.is_ascii_digit());
        if !valid {
            return Err(Error::Decode {
                offset: start,
                message: format!("invalid integer '{}'", text),
            });
        }
        text.parse().map_err(|_| Error::Decode {
            offset: start,
            message: format!("integer out of range '{}'", text),
        })
    }

    fn length(&mut self) -> Result<usize> {
        let start = self.pos;
        let n = self.integer(b':')?;
        usize::try_from(n).map_err(|_| Error::Decode {
            offset: start,
            message: format!("negative length {}", n),
        })
    }

    /// `"<len bytes>"`; the length has already been read.
    fn quoted(&mut self, len: usize) -> Result<&'a str> {
        self.expect(b'"')?;
        let input = self.input;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| self.error(format!("string of {} bytes runs past end of input", len)))?;
        let text = std::str::from_utf8(&input[start..end]).map_err(|_| Error::Decode {
            offset: start,
            message: "string length splits a UTF-8 sequence".into(),
        })?;
        self.pos = end;
        self.expect(b'"')?;
        Ok(text)
    }

    /// Canonical scalars keep their typed form. Any other spelling PHP
    /// accepts (`i:+5;`, `b:01;`) is kept byte for byte so that re-encoding
    /// an untouched value never changes it.
    fn spelled(&self, start: usize, value: SerialValue) -> SerialValue {
        let raw = &self.input[start..self.pos];
        if super::encode::encode(&value).as_bytes() == raw {
            return value;
        }
        match std::str::from_utf8(raw) {
            Ok(raw) => SerialValue::Verbatim(raw.to_string()),
            Err(_) => value,
        }
    }

    fn value(&mut self, depth: usize) -> Result<SerialValue> {
        if depth > MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {} levels", MAX_DEPTH)));
        }

        let start = self.pos;
        let tag = self.next_byte()?;
        match tag {
            b'N' => {
                self.expect(b';')?;
                Ok(SerialValue::Null)
            }
            b'b' => {
                self.expect(b':')?;
                let value = match self.integer(b';')? {
                    0 => SerialValue::Bool(false),
                    1 => SerialValue::Bool(true),
                    other => return Err(self.error(format!("invalid boolean {}", other))),
                };
                Ok(self.spelled(start, value))
            }
            b'i' => {
                self.expect(b':')?;
                let value = SerialValue::Int(self.integer(b';')?);
                Ok(self.spelled(start, value))
            }
            b'd' => {
                self.expect(b':')?;
                let start = self.pos;
                let raw = self.until(b';')?;
                let valid = matches!(raw, "INF" | "-INF" | "NAN") || raw.parse::<f64>().is_ok();
                if !valid {
                    return Err(Error::Decode {
                        offset: start,
                        message: format!("invalid float '{}'", raw),
                    });
                }
                Ok(SerialValue::Float(raw.to_string()))
            }
            b's' => {
                self.expect(b':')?;
                let len = self.length()?;
                let text = self.quoted(len)?;
                self.expect(b';')?;
                Ok(SerialValue::Str(text.to_string()))
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.length()?;
                let entries = self.entries(count, depth)?;
                Ok(SerialValue::from_entries(entries))
            }
            b'O' => {
                self.expect(b':')?;
                let len = self.length()?;
                let class = self.quoted(len)?.to_string();
                self.expect(b':')?;
                let count = self.length()?;
                let fields = self.entries(count, depth)?;
                Ok(SerialValue::Object { class, fields })
            }
            b'C' => {
                self.expect(b':')?;
                let len = self.length()?;
                let class = self.quoted(len)?.to_string();
                self.expect(b':')?;
                let payload_len = self.length()?;
                self.expect(b'{')?;
                let input = self.input;
                let start = self.pos;
                let end = start
                    .checked_add(payload_len)
                    .filter(|&end| end <= self.input.len())
                    .ok_or_else(|| self.error("custom payload runs past end of input"))?;
                let payload = std::str::from_utf8(&input[start..end]).map_err(|_| Error::Decode {
                    offset: start,
                    message: "invalid UTF-8 in custom payload".into(),
                })?;
                self.pos = end;
                self.expect(b'}')?;
                Ok(SerialValue::Custom {
                    class,
                    payload: payload.to_string(),
                })
            }
            b'E' => {
                self.expect(b':')?;
                let len = self.length()?;
                let case = self.quoted(len)?.to_string();
                self.expect(b';')?;
                if !case.contains(':') {
                    return Err(self.error(format!("invalid enum case '{}'", case)));
                }
                Ok(SerialValue::Enum(case))
            }
            b'r' | b'R' => {
                self.expect(b':')?;
                let value = SerialValue::Reference {
                    strong: tag == b'R',
                    index: self.integer(b';')?,
                };
                Ok(self.spelled(start, value))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unknown type tag '{}'", other as char)))
            }
        }
    }

    fn key(&mut self) -> Result<SerialKey> {
        let start = self.pos;
        match self.next_byte()? {
            b'i' => {
                self.expect(b':')?;
                let index = self.integer(b';')?;
                let raw = &self.input[start..self.pos];
                if format!("i:{};", index).as_bytes() == raw {
                    return Ok(SerialKey::Int(index));
                }
                std::str::from_utf8(raw)
                    .map(|raw| SerialKey::Verbatim(raw.to_string()))
                    .map_err(|_| self.error("invalid UTF-8 in array key"))
            }
            b's' => {
                self.expect(b':')?;
                let len = self.length()?;
                let text = self.quoted(len)?;
                self.expect(b';')?;
                Ok(SerialKey::Str(text.to_string()))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("invalid array key tag '{}'", other as char)))
            }
        }
    }

    fn entries(&mut self, count: usize, depth: usize) -> Result<Vec<(SerialKey, SerialValue)>> {
        self.expect(b'{')?;
        // Each entry takes at least four bytes; don't trust huge counts.
        let mut entries = Vec::with_capacity(count.min(self.input.len() / 4));
        for _ in 0..count {
            let key = self.key()?;
            let value = self.value(depth + 1)?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode("N;").unwrap(), SerialValue::Null);
        assert_eq!(decode("b:1;").unwrap(), SerialValue::Bool(true));
        assert_eq!(decode("i:-42;").unwrap(), SerialValue::Int(-42));
        assert_eq!(decode("d:0.1;").unwrap(), SerialValue::Float("0.1".into()));
        assert_eq!(decode("s:5:\"hello\";").unwrap(), SerialValue::from("hello"));
    }

    #[test]
    fn test_decode_string_uses_byte_length() {
        assert_eq!(decode("s:6:\"caf\u{e9}s\";").unwrap(), SerialValue::from("caf\u{e9}s"));
        assert!(decode("s:5:\"caf\u{e9}s\";").is_err());
    }

    #[test]
    fn test_decode_string_with_embedded_quotes() {
        let value = decode("s:7:\"a\";b:\"c\";").unwrap();
        assert_eq!(value, SerialValue::from("a\";b:\"c"));
    }

    #[test]
    fn test_decode_list_and_map() {
        let list = decode("a:2:{i:0;s:1:\"x\";i:1;i:7;}").unwrap();
        assert_eq!(
            list,
            SerialValue::List(vec![SerialValue::from("x"), SerialValue::Int(7)])
        );

        let map = decode("a:1:{s:4:\"site\";s:15:\"http://old.test\";}").unwrap();
        assert_eq!(
            map.get(&SerialKey::from("site")).and_then(SerialValue::as_str),
            Some("http://old.test")
        );
    }

    #[test]
    fn test_decode_object() {
        let value = decode("O:8:\"stdClass\":1:{s:3:\"url\";s:3:\"abc\";}").unwrap();
        match value {
            SerialValue::Object { class, fields } => {
                assert_eq!(class, "stdClass");
                assert_eq!(fields.len(), 1);
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_custom_and_references() {
        let value = decode("C:11:\"ArrayObject\":21:{x:i:0;a:0:{};m:a:0:{}}").unwrap();
        assert!(matches!(value, SerialValue::Custom { ref class, .. } if class == "ArrayObject"));
        assert_eq!(
            decode("R:2;").unwrap(),
            SerialValue::Reference { strong: true, index: 2 }
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode("").is_err());
        assert!(decode("s:10:\"short\";").is_err());
        assert!(decode("a:2:{i:0;s:1:\"x\";}").is_err());
        assert!(decode("i:1;trailing").is_err());
        assert!(decode("b:2;").is_err());
        assert!(decode("hello world").is_err());
        assert!(decode("x:1;").is_err());
    }

    fn nested(levels: usize, leaf: &str) -> String {
        let mut input = "a:1:{i:0;".repeat(levels);
        input.push_str(leaf);
        input.push_str(&"}".repeat(levels));
        input
    }

    /// Runs `f` on a thread with the default std/tokio blocking stack size.
    fn on_small_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_decode_depth_limit() {
        let (at_limit, past_limit) = on_small_stack(|| {
            (
                decode(&nested(MAX_DEPTH, "N;")).is_ok(),
                decode(&nested(MAX_DEPTH + 1, "N;")),
            )
        });
        assert!(at_limit);
        assert!(matches!(past_limit, Err(Error::Decode { .. })));
    }

    #[test]
    fn test_hostile_nesting_is_an_error_not_a_crash() {
        let result = on_small_stack(|| decode(&nested(100_000, "N;")).is_err());
        assert!(result);
    }

    #[test]
    fn test_non_canonical_scalars_keep_their_spelling() {
        assert_eq!(decode("i:+5;").unwrap(), SerialValue::Verbatim("i:+5;".into()));
        assert_eq!(decode("i:007;").unwrap(), SerialValue::Verbatim("i:007;".into()));
        assert_eq!(decode("i:5;").unwrap(), SerialValue::Int(5));

        let input = "a:2:{i:+0;i:+5;s:1:\"k\";b:1;}";
        let value = decode(input).unwrap();
        assert!(matches!(value, SerialValue::Map(_)));
        assert_eq!(super::super::encode(&value), input);
    }
}
