//! Background export/import jobs.

pub mod orchestrator;
pub mod pending;
pub mod queue;
pub mod scheduler;

pub use orchestrator::{
    ArchiveSource, EXPORT_TASK, ExportOutcome, IMPORT_TICK, ImportOutcome, ImportRequest, Orchestrator,
};
pub use pending::{JobKind, JobStatus, JobStore, PENDING_JOB_TTL, PendingJob, job_hash};
pub use queue::{LocalTaskQueue, StoredTaskQueue, Task, TaskQueue};
pub use scheduler::{IntervalScheduler, Scheduler};
