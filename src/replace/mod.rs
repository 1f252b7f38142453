//! Search-replace across tenant tables.

pub mod engine;
pub mod pairs;
pub mod report;
pub mod rewrite;

pub use engine::{ReplaceConfig, SearchReplace};
pub use pairs::{MatchMode, Matcher, ReplacePair, ReplacePairs};
pub use report::{CellChange, RunReport, TableChangeReport};
pub use rewrite::{Rewriter, SENTINEL};
