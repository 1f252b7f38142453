//! Export archives: SQL dump plus optional file trees, zipped.

pub mod archive;
pub mod dump;
pub mod exporter;

pub use archive::{DUMP_ENTRY, ExtractedArchive, MANIFEST_ENTRY, Manifest, extract, read_manifest};
pub use dump::{DumpSummary, DumpWriter};
pub use exporter::{ExportOptions, ExportRecord, Exporter};
