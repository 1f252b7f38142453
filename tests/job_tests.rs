use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use siteport::jobs::{ExportOutcome, IMPORT_TICK, JobStatus, Scheduler, TaskQueue};
use siteport::storage::Clock;
use siteport::{
    ArchiveSource, EngineConfig, Error, ExportOptions, FileOptionStore, ImportRequest, IntervalScheduler, JobKind,
    LocalTaskQueue, MemoryOptionStore, OptionStore, Orchestrator, SqliteStore, Store, StoreConfig,
};
use tempfile::TempDir;

/// Clock that tests move forward by hand.
fn manual_clock() -> (Clock, Arc<AtomicI64>) {
    let offset = Arc::new(AtomicI64::new(0));
    let start = Utc::now();
    let handle = offset.clone();
    let clock: Clock = Arc::new(move || -> DateTime<Utc> {
        start + ChronoDuration::seconds(handle.load(Ordering::SeqCst))
    });
    (clock, offset)
}

struct Jobs {
    dir: TempDir,
    orchestrator: Orchestrator,
    queue: Arc<LocalTaskQueue>,
    scheduler: Arc<IntervalScheduler>,
    offset: Arc<AtomicI64>,
}

fn jobs_with(options: Arc<dyn OptionStore>, dir: TempDir) -> Jobs {
    let store_path = dir.path().join("network.db");
    SqliteStore::connect(&StoreConfig::file(&store_path))
        .unwrap()
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS wp_2_posts (ID INTEGER PRIMARY KEY, post_content TEXT);
             INSERT OR REPLACE INTO wp_2_posts VALUES (1, 'hello http://old.test');",
        )
        .unwrap();

    let mut config = EngineConfig::default();
    config.store_url = format!("sqlite://{}", store_path.display());
    config.jobs.export_dir = dir.path().join("exports");
    config.jobs.work_dir = dir.path().join("work");

    let (clock, offset) = manual_clock();
    let queue = Arc::new(LocalTaskQueue::new());
    let scheduler = Arc::new(IntervalScheduler::new(options.clone()));
    let orchestrator = Orchestrator::new(config, options, queue.clone(), scheduler.clone())
        .unwrap()
        .with_clock(clock);
    Jobs {
        dir,
        orchestrator,
        queue,
        scheduler,
        offset,
    }
}

fn jobs() -> Jobs {
    jobs_with(Arc::new(MemoryOptionStore::new()), TempDir::new().unwrap())
}

fn export_now(jobs: &Jobs) -> siteport::ExportRecord {
    match jobs.orchestrator.export(2, ExportOptions::default(), false).unwrap() {
        ExportOutcome::Completed(record) => record,
        ExportOutcome::Queued(_) => panic!("expected a finished export"),
    }
}

#[test]
fn test_background_export_is_deduplicated() {
    let jobs = jobs();
    let options = ExportOptions::default().source_url("http://old.test");

    let ExportOutcome::Queued(first) = jobs.orchestrator.export(2, options.clone(), true).unwrap() else {
        panic!("expected a queued export");
    };
    let ExportOutcome::Queued(second) = jobs.orchestrator.export(2, options, true).unwrap() else {
        panic!("expected a queued export");
    };

    assert_eq!(first.hash, second.hash);
    assert_eq!(jobs.orchestrator.pending(JobKind::Export).unwrap().len(), 1);
    assert_eq!(jobs.queue.len().unwrap(), 1);

    // Different options are a different job.
    jobs.orchestrator.export(2, ExportOptions::default(), true).unwrap();
    assert_eq!(jobs.orchestrator.pending(JobKind::Export).unwrap().len(), 2);
}

#[test]
fn test_queued_export_runs_through_task_entry_point() {
    let jobs = jobs();
    jobs.orchestrator.export(2, ExportOptions::default(), true).unwrap();
    assert!(jobs.orchestrator.list_exports().unwrap().is_empty());

    let task = jobs.queue.pop().unwrap().unwrap();
    jobs.orchestrator.run_task(&task.name, task.payload).unwrap();

    assert!(jobs.orchestrator.pending(JobKind::Export).unwrap().is_empty());
    let exports = jobs.orchestrator.list_exports().unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].tenant_id, 2);
    assert!(exports[0].archive_path.is_file());
}

#[test]
fn test_cancelled_export_task_does_nothing() {
    let jobs = jobs();
    let ExportOutcome::Queued(job) = jobs.orchestrator.export(2, ExportOptions::default(), true).unwrap() else {
        panic!("expected a queued export");
    };
    jobs.orchestrator.cancel(JobKind::Export, &job.hash).unwrap();
    assert!(jobs.orchestrator.pending(JobKind::Export).unwrap().is_empty());

    // The task was already handed to the queue; running it must be a no-op.
    let task = jobs.queue.pop().unwrap().unwrap();
    jobs.orchestrator.run_task(&task.name, task.payload).unwrap();

    assert!(jobs.orchestrator.list_exports().unwrap().is_empty());
    assert!(jobs.orchestrator.pending(JobKind::Export).unwrap().is_empty());
}

#[test]
fn test_export_task_already_claimed_is_skipped() {
    let jobs = jobs();
    let ExportOutcome::Queued(job) = jobs.orchestrator.export(2, ExportOptions::default(), true).unwrap() else {
        panic!("expected a queued export");
    };
    let mut claimed = jobs.orchestrator.jobs().get(JobKind::Export, &job.hash).unwrap().unwrap();
    claimed.mark_running(Utc::now());
    jobs.orchestrator.jobs().put(&claimed).unwrap();

    let task = jobs.queue.pop().unwrap().unwrap();
    jobs.orchestrator.run_task(&task.name, task.payload).unwrap();
    assert!(jobs.orchestrator.list_exports().unwrap().is_empty());
    let still = jobs.orchestrator.jobs().get(JobKind::Export, &job.hash).unwrap().unwrap();
    assert_eq!(still.status, JobStatus::Running);
}

#[test]
fn test_unknown_task_is_rejected() {
    let jobs = jobs();
    assert!(matches!(
        jobs.orchestrator.run_task("site_reindex", serde_json::json!({})),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_export_records_and_estimates() {
    let jobs = jobs();
    assert_eq!(jobs.orchestrator.estimate_export_duration(2).unwrap(), None);

    let record = export_now(&jobs);
    assert_eq!(
        jobs.orchestrator.estimate_export_duration(2).unwrap(),
        Some(std::time::Duration::from_millis(record.duration_ms))
    );
    assert_eq!(jobs.orchestrator.estimate_export_duration(3).unwrap(), None);

    jobs.orchestrator.delete_export(&record.archive_path).unwrap();
    assert!(!record.archive_path.exists());
    assert!(jobs.orchestrator.list_exports().unwrap().is_empty());
    assert!(matches!(
        jobs.orchestrator.delete_export(&record.archive_path),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_import_validation_never_enqueues() {
    let jobs = jobs();
    let missing = ImportRequest::new(
        ArchiveSource::Path(jobs.dir.path().join("missing.zip")),
        2,
        "https://new.test",
    );
    assert!(matches!(jobs.orchestrator.import(missing), Err(Error::Validation(_))));

    let insecure = ImportRequest::new(ArchiveSource::Url("http://old.test/site.zip".into()), 2, "https://new.test");
    assert!(matches!(jobs.orchestrator.import(insecure), Err(Error::Validation(_))));

    assert!(jobs.orchestrator.pending(JobKind::Import).unwrap().is_empty());
    assert!(!jobs.scheduler.is_scheduled(IMPORT_TICK).unwrap());
}

#[test]
fn test_repeated_import_is_deduplicated() {
    let jobs = jobs();
    let record = export_now(&jobs);
    let request = || ImportRequest::new(ArchiveSource::Path(record.archive_path.clone()), 2, "https://new.test");

    let first = jobs.orchestrator.import(request()).unwrap();
    assert!(jobs.scheduler.is_scheduled(IMPORT_TICK).unwrap());
    // An existing registration is left as it is.
    jobs.scheduler.schedule(IMPORT_TICK, std::time::Duration::from_secs(5)).unwrap();

    jobs.offset.store(60, Ordering::SeqCst);
    let second = jobs.orchestrator.import(request()).unwrap();
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.enqueued_at, second.enqueued_at);
    assert_eq!(jobs.orchestrator.pending(JobKind::Import).unwrap().len(), 1);
    assert_eq!(
        jobs.scheduler.interval(IMPORT_TICK).unwrap(),
        Some(std::time::Duration::from_secs(5))
    );

    // A different destination is a different job.
    jobs.orchestrator
        .import(ImportRequest::new(ArchiveSource::Path(record.archive_path.clone()), 2, "https://other.test"))
        .unwrap();
    assert_eq!(jobs.orchestrator.pending(JobKind::Import).unwrap().len(), 2);
}

#[test]
fn test_cancel_pending_import() {
    let jobs = jobs();
    let record = export_now(&jobs);
    let job = jobs
        .orchestrator
        .import(ImportRequest::new(ArchiveSource::Path(record.archive_path), 2, "https://new.test"))
        .unwrap();

    jobs.orchestrator.cancel(JobKind::Import, &job.hash).unwrap();
    assert!(jobs.orchestrator.pending(JobKind::Import).unwrap().is_empty());
    assert!(matches!(
        jobs.orchestrator.cancel(JobKind::Import, &job.hash),
        Err(Error::JobNotFound(_))
    ));
    assert!(jobs.orchestrator.on_tick().unwrap().is_none());
    assert!(!jobs.scheduler.is_scheduled(IMPORT_TICK).unwrap());
}

#[test]
fn test_running_import_blocks_until_stale() {
    let jobs = jobs();
    let record = export_now(&jobs);
    let job = jobs
        .orchestrator
        .import(ImportRequest::new(ArchiveSource::Path(record.archive_path), 2, "https://new.test"))
        .unwrap();

    // Simulate a worker that claimed the job and died.
    let mut claimed = jobs.orchestrator.jobs().get(JobKind::Import, &job.hash).unwrap().unwrap();
    claimed.mark_running(Utc::now());
    jobs.orchestrator.jobs().put(&claimed).unwrap();
    assert!(matches!(
        jobs.orchestrator.cancel(JobKind::Import, &job.hash),
        Err(Error::Validation(_))
    ));

    jobs.offset.store(10 * 60, Ordering::SeqCst);
    assert!(jobs.orchestrator.on_tick().unwrap().is_none());

    jobs.offset.store(31 * 60, Ordering::SeqCst);
    let outcome = jobs.orchestrator.on_tick().unwrap().expect("stale import is reclaimed");
    assert_eq!(outcome.job.hash, job.hash);
    assert!(jobs.orchestrator.pending(JobKind::Import).unwrap().is_empty());
}

#[test]
fn test_failed_import_keeps_its_record() {
    let jobs = jobs();
    let bogus = jobs.dir.path().join("bogus.zip");
    fs::write(&bogus, "not a zip").unwrap();
    let job = jobs
        .orchestrator
        .import(ImportRequest::new(ArchiveSource::Path(bogus), 2, "https://new.test"))
        .unwrap();

    assert!(matches!(jobs.orchestrator.on_tick(), Err(Error::Archive(_))));
    let failed = jobs.orchestrator.jobs().get(JobKind::Import, &job.hash).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.is_some());

    // No retry: the next tick finds nothing to claim and stops ticking.
    assert!(jobs.orchestrator.on_tick().unwrap().is_none());
    assert!(!jobs.scheduler.is_scheduled(IMPORT_TICK).unwrap());
}

#[test]
fn test_pending_jobs_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state.json");

    let first = jobs_with(Arc::new(FileOptionStore::open(&state).unwrap()), dir);
    let record = export_now(&first);
    let job = first
        .orchestrator
        .import(ImportRequest::new(ArchiveSource::Path(record.archive_path), 2, "https://new.test"))
        .unwrap();
    let Jobs { dir, .. } = first;

    let second = jobs_with(Arc::new(FileOptionStore::open(&state).unwrap()), dir);
    assert!(second.scheduler.is_scheduled(IMPORT_TICK).unwrap());
    assert_eq!(second.orchestrator.list_exports().unwrap().len(), 1);
    let outcome = second.orchestrator.on_tick().unwrap().unwrap();
    assert_eq!(outcome.job.hash, job.hash);

    let store = SqliteStore::connect(&StoreConfig::file(second.dir.path().join("network.db"))).unwrap();
    let rows = store.query("SELECT post_content FROM wp_2_posts", &[]).unwrap();
    assert_eq!(rows.len(), 1);
}
