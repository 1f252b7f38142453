// ============================================================================
// siteport Library
// ============================================================================
//
// Export a tenant of a shared, prefix-partitioned SQL database into a zip
// archive, and replay such an archive into another database while rewriting
// URLs inside plain and PHP-serialized values.

pub mod config;
pub mod connection;
pub mod core;
pub mod export;
pub mod import;
pub mod jobs;
pub mod replace;
pub mod runtime;
pub mod serialized;
pub mod storage;

pub use config::{EngineConfig, JobConfig};
pub use connection::{SqliteStore, Store, StoreConfig};
pub use core::{Asset, Error, Result, TableDescriptor, Tenant, Value};
pub use export::{ExportOptions, ExportRecord, Exporter};
pub use import::{ImportConfig, ImportReport, StreamingImporter};
pub use jobs::{
    ArchiveSource, ImportRequest, IntervalScheduler, JobKind, LocalTaskQueue, Orchestrator, PendingJob,
    StoredTaskQueue,
};
pub use replace::{MatchMode, ReplaceConfig, ReplacePair, ReplacePairs, RunReport, SearchReplace};
pub use runtime::{MaxRuntimeGuard, RuntimeLimit};
pub use storage::{FileOptionStore, MemoryOptionStore, OptionStore, TableCatalog};
