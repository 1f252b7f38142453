use std::fmt::Write;
use super::{SerialKey, SerialValue};

pub fn encode(value: &SerialValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_str(out: &mut String, s: &str) {
    let _ = write!(out, "s:{}:\"{}\";", s.len(), s);
}

fn write_key(out: &mut String, key: &SerialKey) {
    match key {
        SerialKey::Int(i) => {
            let _ = write!(out, "i:{};", i);
        }
        SerialKey::Str(s) => write_str(out, s),
        SerialKey::Verbatim(raw) => out.push_str(raw),
    }
}

fn write_entries<'v>(out: &mut String, entries: impl ExactSizeIterator<Item = (SerialKey, &'v SerialValue)>) {
    let _ = write!(out, "{}:{{", entries.len());
    for (key, value) in entries {
        write_key(out, &key);
        write_value(out, value);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &SerialValue) {
    match value {
        SerialValue::Null => out.push_str("N;"),
        SerialValue::Bool(b) => {
            let _ = write!(out, "b:{};", u8::from(*b));
        }
        SerialValue::Int(i) => {
            let _ = write!(out, "i:{};", i);
        }
        SerialValue::Float(raw) => {
            let _ = write!(out, "d:{};", raw);
        }
        SerialValue::Str(s) => write_str(out, s),
        SerialValue::Verbatim(raw) => out.push_str(raw),
        SerialValue::List(items) => {
            out.push_str("a:");
            write_entries(
                out,
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, v)| (SerialKey::Int(idx as i64), v)),
            );
        }
        SerialValue::Map(entries) => {
            out.push_str("a:");
            write_entries(out, entries.iter().map(|(k, v)| (k.clone(), v)));
        }
        SerialValue::Object { class, fields } => {
            let _ = write!(out, "O:{}:\"{}\":", class.len(), class);
            write_entries(out, fields.iter().map(|(k, v)| (k.clone(), v)));
        }
        SerialValue::Custom { class, payload } => {
            let _ = write!(
                out,
                "C:{}:\"{}\":{}:{{{}}}",
                class.len(),
                class,
                payload.len(),
                payload
            );
        }
        SerialValue::Enum(case) => {
            let _ = write!(out, "E:{}:\"{}\";", case.len(), case);
        }
        SerialValue::Reference { strong, index } => {
            let _ = write!(out, "{}:{};", if *strong { 'R' } else { 'r' }, index);
        }
    }
}
