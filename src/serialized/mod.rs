//! PHP `serialize()` text format.
//!
//! Lengths in the format count bytes, not characters, which is why a naive
//! substring replace inside an encoded value corrupts it.

mod decode;
mod encode;
mod value;

pub use decode::{MAX_DEPTH, decode};
pub use encode::encode;
pub use value::{SerialKey, SerialValue};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Cheap shape test run before attempting a full decode.
    static ref SERIALIZED_SHAPE: Regex = Regex::new(
        r#"(?s)^(?:N;|b:[01];|i:[+-]?[0-9]+;|d:[^;]+;|s:[0-9]+:".*";|a:[0-9]+:\{.*\}|O:[0-9]+:".+":[0-9]+:\{.*\}|C:[0-9]+:".+":[0-9]+:\{.*\}|E:[0-9]+:".+";|[rR]:[0-9]+;)$"#
    )
    .expect("serialized shape pattern is valid");
}

/// Whether `s` has the outer shape of a serialized value.
///
/// This is a heuristic; a value can look serialized and still fail to
/// decode (for instance after a length-breaking edit).
pub fn looks_serialized(s: &str) -> bool {
    SERIALIZED_SHAPE.is_match(s)
}

/// Whether `s` decodes as a complete serialized value.
pub fn is_serialized(s: &str) -> bool {
    looks_serialized(s) && decode(s).is_ok()
}
