use super::Matcher;
use crate::core::{Error, Result};
use crate::serialized::{self, MAX_DEPTH, SerialKey, SerialValue};

/// Prepended to a rewritten plain string that would otherwise read back as
/// a serialized value.
pub const SENTINEL: char = '|';

/// Applies compiled matchers to text and serialized structures.
///
/// Pure apart from `notes`, which collects values that were deliberately
/// left alone (opaque objects, undecodable payloads).
pub struct Rewriter<'m> {
    matchers: &'m [Matcher],
    opaque_classes: &'m [String],
    strict: bool,
}

impl<'m> Rewriter<'m> {
    pub fn new(matchers: &'m [Matcher]) -> Self {
        Self {
            matchers,
            opaque_classes: &[],
            strict: false,
        }
    }

    pub fn opaque_classes(mut self, classes: &'m [String]) -> Self {
        self.opaque_classes = classes;
        self
    }

    /// Return decode failures instead of recording them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn any_match(&self, text: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(text))
    }

    fn replace_plain(&self, text: &str) -> Option<String> {
        let mut current: Option<String> = None;
        for matcher in self.matchers {
            let source = current.as_deref().unwrap_or(text);
            if let Some(next) = matcher.apply(source) {
                current = Some(next);
            }
        }
        current.filter(|out| out != text)
    }

    /// Rewrite one stored string. `Ok(None)` means the bytes are unchanged.
    ///
    /// Serialized text is decoded, rewritten and re-encoded; plain text is
    /// replaced directly and fenced with [`SENTINEL`] if the result happens
    /// to decode as a serialized value.
    pub fn rewrite_text(&self, text: &str, notes: &mut Vec<String>) -> Result<Option<String>> {
        self.rewrite_text_at(text, 0, notes)
    }

    /// Rewrite every string inside `value`. Keys are never touched.
    pub fn rewrite(&self, value: SerialValue, notes: &mut Vec<String>) -> Result<(SerialValue, bool)> {
        self.rewrite_at(value, 0, notes)
    }

    /// `depth` counts containers and serialized strings nested inside
    /// serialized strings, so both kinds of nesting share one bound.
    fn rewrite_text_at(&self, text: &str, depth: usize, notes: &mut Vec<String>) -> Result<Option<String>> {
        if serialized::looks_serialized(text) {
            let value = match serialized::decode(text) {
                Ok(value) => value,
                Err(e) if self.strict => return Err(e),
                Err(e) => {
                    if self.any_match(text) {
                        notes.push(format!("Left undecodable serialized value untouched: {}", e));
                    }
                    return Ok(None);
                }
            };
            let (value, changed) = self.rewrite_at(value, depth, notes)?;
            if !changed {
                return Ok(None);
            }
            let encoded = serialized::encode(&value);
            return Ok((encoded != text).then_some(encoded));
        }

        Ok(self.replace_plain(text).map(|replaced| {
            if serialized::is_serialized(&replaced) {
                format!("{}{}", SENTINEL, replaced)
            } else {
                replaced
            }
        }))
    }

    fn rewrite_at(&self, value: SerialValue, depth: usize, notes: &mut Vec<String>) -> Result<(SerialValue, bool)> {
        if depth > MAX_DEPTH {
            let err = Error::Decode {
                offset: 0,
                message: format!("nesting deeper than {} levels", MAX_DEPTH),
            };
            if self.strict {
                return Err(err);
            }
            notes.push(format!("Left deeply nested value untouched: {}", err));
            return Ok((value, false));
        }

        match value {
            SerialValue::Str(s) => match self.rewrite_text_at(&s, depth + 1, notes)? {
                Some(new) => Ok((SerialValue::Str(new), true)),
                None => Ok((SerialValue::Str(s), false)),
            },
            SerialValue::List(items) => {
                let mut changed = false;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let (item, c) = self.rewrite_at(item, depth + 1, notes)?;
                    changed |= c;
                    out.push(item);
                }
                Ok((SerialValue::List(out), changed))
            }
            SerialValue::Map(entries) => {
                let (entries, changed) = self.rewrite_entries(entries, depth, notes)?;
                Ok((SerialValue::Map(entries), changed))
            }
            SerialValue::Object { class, fields } => {
                if self.opaque_classes.iter().any(|c| c == &class) {
                    let value = SerialValue::Object { class, fields };
                    self.note_opaque(&value, notes);
                    return Ok((value, false));
                }
                let (fields, changed) = self.rewrite_entries(fields, depth, notes)?;
                Ok((SerialValue::Object { class, fields }, changed))
            }
            SerialValue::Custom { .. } => {
                self.note_opaque(&value, notes);
                Ok((value, false))
            }
            other => Ok((other, false)),
        }
    }

    fn rewrite_entries(
        &self,
        entries: Vec<(SerialKey, SerialValue)>,
        depth: usize,
        notes: &mut Vec<String>,
    ) -> Result<(Vec<(SerialKey, SerialValue)>, bool)> {
        let mut changed = false;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let (value, c) = self.rewrite_at(value, depth + 1, notes)?;
            changed |= c;
            out.push((key, value));
        }
        Ok((out, changed))
    }

    fn note_opaque(&self, value: &SerialValue, notes: &mut Vec<String>) {
        let class = match value {
            SerialValue::Object { class, .. } | SerialValue::Custom { class, .. } => class.as_str(),
            _ => return,
        };
        if self.any_match(&serialized::encode(value)) {
            notes.push(format!(
                "Skipped object of class '{}': it cannot be rewritten safely",
                class
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replace::{MatchMode, ReplacePairs};

    fn matchers(search: &str, replace: &str) -> Vec<Matcher> {
        ReplacePairs::single(search, replace)
            .compile(MatchMode::Literal)
            .unwrap()
    }

    #[test]
    fn test_plain_text_replace() {
        let m = matchers("http://old.test", "http://new.test");
        let mut notes = Vec::new();
        let out = Rewriter::new(&m)
            .rewrite_text("visit http://old.test now", &mut notes)
            .unwrap();
        assert_eq!(out.as_deref(), Some("visit http://new.test now"));
        assert!(notes.is_empty());
    }

    #[test]
    fn test_unchanged_text_is_none() {
        let m = matchers("http://old.test", "http://new.test");
        let mut notes = Vec::new();
        assert_eq!(Rewriter::new(&m).rewrite_text("nothing", &mut notes).unwrap(), None);
    }

    #[test]
    fn test_serialized_lengths_are_fixed() {
        let m = matchers("http://old.test", "https://www.new.test");
        let mut notes = Vec::new();
        let input = "a:1:{s:4:\"site\";s:15:\"http://old.test\";}";
        let out = Rewriter::new(&m).rewrite_text(input, &mut notes).unwrap().unwrap();
        assert_eq!(out, "a:1:{s:4:\"site\";s:20:\"https://www.new.test\";}");
        let decoded = serialized::decode(&out).unwrap();
        assert_eq!(
            decoded.get(&SerialKey::from("site")).and_then(SerialValue::as_str),
            Some("https://www.new.test")
        );
    }

    #[test]
    fn test_double_serialized_values() {
        let inner = serialized::encode(&SerialValue::Map(vec![(
            SerialKey::from("url"),
            SerialValue::from("http://old.test/x"),
        )]));
        let outer = serialized::encode(&SerialValue::List(vec![SerialValue::from(inner)]));

        let m = matchers("old.test", "new.example");
        let mut notes = Vec::new();
        let out = Rewriter::new(&m).rewrite_text(&outer, &mut notes).unwrap().unwrap();

        let SerialValue::List(items) = serialized::decode(&out).unwrap() else {
            panic!("expected list");
        };
        let inner = serialized::decode(items[0].as_str().unwrap()).unwrap();
        assert_eq!(
            inner.get(&SerialKey::from("url")).and_then(SerialValue::as_str),
            Some("http://new.example/x")
        );
    }

    #[test]
    fn test_keys_are_not_rewritten() {
        let m = matchers("old", "new");
        let mut notes = Vec::new();
        let input = "a:1:{s:3:\"old\";s:3:\"old\";}";
        let out = Rewriter::new(&m).rewrite_text(input, &mut notes).unwrap().unwrap();
        assert_eq!(out, "a:1:{s:3:\"old\";s:3:\"new\";}");
    }

    #[test]
    fn test_sentinel_when_result_parses_as_serialized() {
        // "s:3:\"abc\";" with the X dropped becomes a valid serialized string.
        let m = matchers("X", "");
        let mut notes = Vec::new();
        let out = Rewriter::new(&m)
            .rewrite_text("s:3:\"aXbc\";", &mut notes)
            .unwrap();
        // The input already has the serialized shape but fails to decode.
        assert_eq!(out, None);

        let out = Rewriter::new(&m)
            .rewrite_text("Xb:1;", &mut notes)
            .unwrap();
        assert_eq!(out.as_deref(), Some("|b:1;"));
    }

    #[test]
    fn test_sentinel_on_replacement_text() {
        let m = matchers("{{option}}", "i:42;");
        let mut notes = Vec::new();
        let out = Rewriter::new(&m).rewrite_text("{{option}}", &mut notes).unwrap();
        assert_eq!(out.as_deref(), Some("|i:42;"));
    }

    #[test]
    fn test_custom_objects_are_left_alone() {
        let m = matchers("old.test", "new.test");
        let mut notes = Vec::new();
        let payload = "s:8:\"old.test\";";
        let input = format!("C:6:\"Widget\":{}:{{{}}}", payload.len(), payload);
        let out = Rewriter::new(&m).rewrite_text(&input, &mut notes).unwrap();
        assert_eq!(out, None);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("Widget"));
    }

    #[test]
    fn test_opaque_object_classes() {
        let m = matchers("old.test", "new.test");
        let opaque = vec!["__PHP_Incomplete_Class".to_string()];
        let mut notes = Vec::new();
        let input = "O:22:\"__PHP_Incomplete_Class\":1:{s:3:\"url\";s:8:\"old.test\";}";
        let out = Rewriter::new(&m)
            .opaque_classes(&opaque)
            .rewrite_text(input, &mut notes)
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn test_strict_mode_surfaces_decode_errors() {
        let m = matchers("old", "new");
        let mut notes = Vec::new();
        let broken = "a:1:{s:3:\"old\";s:9:\"old\";}";
        assert!(Rewriter::new(&m).strict(true).rewrite_text(broken, &mut notes).is_err());

        let out = Rewriter::new(&m).rewrite_text(broken, &mut notes).unwrap();
        assert_eq!(out, None);
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn test_pairs_apply_in_order() {
        let pairs = ReplacePairs::batch(vec![
            crate::replace::ReplacePair::new("http://", "https://"),
            crate::replace::ReplacePair::new("https://old", "https://new"),
        ]);
        let m = pairs.compile(MatchMode::Literal).unwrap();
        let mut notes = Vec::new();
        let out = Rewriter::new(&m).rewrite_text("http://old.test", &mut notes).unwrap();
        assert_eq!(out.as_deref(), Some("https://new.test"));
    }

    fn on_small_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_deepest_accepted_array_is_rewritten() {
        let out = on_small_stack(|| {
            let m = matchers("http://old.test", "http://new.test");
            let mut input = "a:1:{i:0;".repeat(MAX_DEPTH);
            input.push_str("s:15:\"http://old.test\";");
            input.push_str(&"}".repeat(MAX_DEPTH));
            let mut notes = Vec::new();
            Rewriter::new(&m).rewrite_text(&input, &mut notes).unwrap()
        });
        let out = out.unwrap();
        assert!(out.contains("s:15:\"http://new.test\";"));
        assert!(serialized::decode(&out).is_ok());
    }

    fn wrapped(layers: usize) -> String {
        let mut text = serialized::encode(&SerialValue::from("http://old.test"));
        for _ in 0..layers {
            text = serialized::encode(&SerialValue::List(vec![SerialValue::from(text)]));
        }
        text
    }

    #[test]
    fn test_strings_nested_in_strings_are_bounded() {
        let (lenient, notes, strict) = on_small_stack(|| {
            let m = matchers("http://old.test", "http://new.test");
            let input = wrapped(100);
            let mut notes = Vec::new();
            let lenient = Rewriter::new(&m).rewrite_text(&input, &mut notes).unwrap();
            let strict = Rewriter::new(&m).strict(true).rewrite_text(&input, &mut Vec::new());
            (lenient, notes, strict.is_err())
        });
        assert_eq!(lenient, None);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("nested"));
        assert!(strict);
    }

    #[test]
    fn test_shallow_nested_strings_are_still_rewritten() {
        let m = matchers("http://old.test", "http://new.test");
        let mut notes = Vec::new();
        let out = Rewriter::new(&m).rewrite_text(&wrapped(3), &mut notes).unwrap().unwrap();
        assert!(out.contains("http://new.test"));
        assert!(notes.is_empty());
    }

    #[test]
    fn test_untouched_integer_spelling_survives_a_rewrite() {
        let m = matchers("old", "new");
        let mut notes = Vec::new();
        let input = "a:2:{i:0;i:+5;i:1;s:3:\"old\";}";
        let out = Rewriter::new(&m).rewrite_text(input, &mut notes).unwrap();
        assert_eq!(out.as_deref(), Some("a:2:{i:0;i:+5;i:1;s:3:\"new\";}"));
    }
}
