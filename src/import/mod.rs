//! Streaming SQL dump importer.

pub mod importer;
pub mod statement;

pub use importer::{ImportConfig, ImportReport, StatementFailure, StreamingImporter};
pub use statement::StatementKind;
