use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{Level, event, info_span};
use super::pending::{JobKind, JobStatus, JobStore, PendingJob};
use super::queue::TaskQueue;
use super::scheduler::Scheduler;
use crate::config::EngineConfig;
use crate::connection::{SqliteStore, StoreConfig};
use crate::core::{Error, Result, Tenant};
use crate::export::{self, ExportOptions, ExportRecord, Exporter};
use crate::import::{ImportConfig, ImportReport, StreamingImporter};
use crate::replace::{ReplacePair, ReplacePairs, RunReport, SearchReplace};
use crate::runtime::RuntimeLimit;
use crate::storage::{Clock, OptionStore, system_clock};

pub const EXPORT_TASK: &str = "site_export";
pub const IMPORT_TICK: &str = "site_import_tick";
const EXPORT_RECORD_PREFIX: &str = "export_";

/// Where an import archive comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveSource {
    Path(PathBuf),
    /// Downloaded when the import runs. Only `https` is accepted.
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub archive: ArchiveSource,
    /// Tenant that receives the tables.
    pub tenant_id: u64,
    /// Public URL of the destination site.
    pub destination_url: String,
    /// URL to rewrite. Falls back to the one recorded in the archive.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Destination database. Defaults to the engine's store.
    #[serde(default)]
    pub destination_store: Option<String>,
    #[serde(default)]
    pub delete_archive: bool,
    #[serde(default)]
    pub import: Option<ImportConfig>,
}

impl ImportRequest {
    pub fn new(archive: ArchiveSource, tenant_id: u64, destination_url: impl Into<String>) -> Self {
        Self {
            archive,
            tenant_id,
            destination_url: destination_url.into(),
            source_url: None,
            destination_store: None,
            delete_archive: false,
            import: None,
        }
    }

    pub fn source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn delete_archive(mut self, delete: bool) -> Self {
        self.delete_archive = delete;
        self
    }

    pub fn import_config(mut self, config: ImportConfig) -> Self {
        self.import = Some(config);
        self
    }

    /// Reject requests that could never run.
    pub fn validate(&self) -> Result<()> {
        if self.destination_url.trim().is_empty() {
            return Err(Error::Validation("Destination URL is required".into()));
        }
        reqwest::Url::parse(&self.destination_url).map_err(|e| {
            Error::Validation(format!("Invalid destination URL '{}': {}", self.destination_url, e))
        })?;
        match &self.archive {
            ArchiveSource::Path(path) if !path.is_file() => Err(Error::Validation(format!(
                "Archive {} does not exist",
                path.display()
            ))),
            ArchiveSource::Url(url) => {
                let parsed = reqwest::Url::parse(url)
                    .map_err(|e| Error::Validation(format!("Invalid archive URL '{}': {}", url, e)))?;
                if parsed.scheme() != "https" {
                    return Err(Error::Validation(format!(
                        "Refusing to download archive over insecure URL '{}'",
                        url
                    )));
                }
                Ok(())
            }
            ArchiveSource::Path(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed(ExportRecord),
    Queued(PendingJob),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub job: PendingJob,
    pub import: ImportReport,
    /// `None` when there was no source URL to rewrite.
    pub replace: Option<RunReport>,
}

/// Drives exports and imports, synchronously or through the pending job
/// store, task queue and scheduler.
pub struct Orchestrator {
    config: EngineConfig,
    options: Arc<dyn OptionStore>,
    jobs: JobStore,
    queue: Arc<dyn TaskQueue>,
    scheduler: Arc<dyn Scheduler>,
    clock: Clock,
    limit: RuntimeLimit,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        options: Arc<dyn OptionStore>,
        queue: Arc<dyn TaskQueue>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        let jobs = JobStore::new(options.clone()).with_ttl(config.jobs.pending_ttl());
        Ok(Self {
            config,
            options,
            jobs,
            queue,
            scheduler,
            clock: system_clock(),
            limit: RuntimeLimit::default(),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    // ========================================================================
    // Export
    // ========================================================================

    pub fn export(&self, subject_id: u64, options: ExportOptions, background: bool) -> Result<ExportOutcome> {
        let tenant = self.config.tenant(subject_id)?;
        if !background {
            return self.run_export(&tenant, &options).map(ExportOutcome::Completed);
        }

        let job = PendingJob::new(JobKind::Export, subject_id, serde_json::to_value(&options)?, (self.clock)());
        if let Some(existing) = self.jobs.get(JobKind::Export, &job.hash)?
            && existing.status != JobStatus::Failed
        {
            info!("Export of {} is already queued ({})", tenant, existing.hash);
            return Ok(ExportOutcome::Queued(existing));
        }

        self.jobs.put(&job)?;
        self.queue.enqueue(
            EXPORT_TASK,
            json!({ "subject_id": subject_id, "options": job.options }),
        )?;
        info!("Queued export of {} ({})", tenant, job.hash);
        Ok(ExportOutcome::Queued(job))
    }

    /// Entry point for tasks handed to the [`TaskQueue`].
    pub fn run_task(&self, name: &str, payload: JsonValue) -> Result<()> {
        match name {
            EXPORT_TASK => {
                let subject_id = payload["subject_id"]
                    .as_u64()
                    .ok_or_else(|| Error::Validation("Task payload has no subject_id".into()))?;
                let options_json = payload.get("options").cloned().unwrap_or(JsonValue::Null);
                let options: ExportOptions = if options_json.is_null() {
                    ExportOptions::default()
                } else {
                    serde_json::from_value(options_json.clone())?
                };
                self.run_export_job(subject_id, options, options_json)
            }
            other => Err(Error::Validation(format!("Unknown task '{}'", other))),
        }
    }

    /// Runs a queued export only while its record is still pending; a
    /// cancelled or expired record means the task is dropped.
    fn run_export_job(&self, subject_id: u64, options: ExportOptions, options_json: JsonValue) -> Result<()> {
        let tenant = self.config.tenant(subject_id)?;
        let hash = super::pending::job_hash(subject_id, &options_json);
        let Some(mut job) = self.jobs.get(JobKind::Export, &hash)? else {
            info!("Export {} of {} was cancelled or has expired, skipping", hash, tenant);
            return Ok(());
        };
        if job.is_running() {
            info!("Export {} of {} is already running, skipping", hash, tenant);
            return Ok(());
        }
        job.mark_running((self.clock)());
        self.jobs.put(&job)?;

        match self.run_export(&tenant, &options) {
            Ok(_) => {
                self.jobs.delete(JobKind::Export, &job.hash)?;
                Ok(())
            }
            Err(e) => {
                job.mark_failed(e.to_string());
                self.jobs.put(&job)?;
                Err(e)
            }
        }
    }

    fn run_export(&self, tenant: &Tenant, options: &ExportOptions) -> Result<ExportRecord> {
        let span = info_span!("siteport.export", tenant = tenant.id);
        let _enter = span.enter();
        let _guard = self.limit.acquire(self.config.jobs.time_limit_secs);

        let store = SqliteStore::connect(&self.config.store()?)?;
        let mut exporter = Exporter::new(&store, &self.config.jobs.export_dir)
            .page_size(self.config.replace.page_size)
            .time_limit_secs(self.config.jobs.time_limit_secs)
            .with_runtime_limit(self.limit.clone());
        if let Some(content_dir) = &self.config.jobs.content_dir {
            exporter = exporter.content_dir(content_dir);
        }

        let record = match exporter.export(tenant, options) {
            Ok(record) => record,
            Err(e) => {
                event!(Level::ERROR, error = %e, "export failed");
                return Err(e);
            }
        };
        self.options.set(&record_key(&record.archive_path), serde_json::to_value(&record)?, None)?;
        event!(Level::INFO, duration_ms = record.duration_ms, "export finished");
        Ok(record)
    }

    pub fn list_exports(&self) -> Result<Vec<ExportRecord>> {
        let mut records = Vec::new();
        for key in self.options.keys(EXPORT_RECORD_PREFIX)? {
            if let Some(value) = self.options.get(&key)? {
                records.push(serde_json::from_value::<ExportRecord>(value)?);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Remove an archive and its record.
    pub fn delete_export(&self, archive_path: &Path) -> Result<()> {
        let key = record_key(archive_path);
        let record: ExportRecord = match self.options.get(&key)? {
            Some(value) => serde_json::from_value(value)?,
            None => {
                return Err(Error::Validation(format!(
                    "{} is not a known export",
                    archive_path.display()
                )));
            }
        };

        if export::exporter::is_inside(&record.archive_path, &self.config.jobs.export_dir) {
            match fs::remove_file(&record.archive_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("Archive {} was already gone", record.archive_path.display());
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            warn!(
                "{} is outside {}, leaving the file in place",
                record.archive_path.display(),
                self.config.jobs.export_dir.display()
            );
        }
        self.options.delete(&key)?;
        info!("Deleted export {}", record.archive_path.display());
        Ok(())
    }

    /// Duration of the most recent export of `subject_id`.
    pub fn estimate_export_duration(&self, subject_id: u64) -> Result<Option<Duration>> {
        Ok(self
            .list_exports()?
            .into_iter()
            .find(|r| r.tenant_id == subject_id)
            .map(|r| Duration::from_millis(r.duration_ms)))
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Validate and queue an import. The next tick picks it up.
    pub fn import(&self, request: ImportRequest) -> Result<PendingJob> {
        request.validate()?;
        self.config.tenant(request.tenant_id)?;

        let job = PendingJob::new(
            JobKind::Import,
            request.tenant_id,
            serde_json::to_value(&request)?,
            (self.clock)(),
        );
        let job = match self.jobs.get(JobKind::Import, &job.hash)? {
            Some(existing) if existing.status != JobStatus::Failed => existing,
            _ => {
                self.jobs.put(&job)?;
                job
            }
        };

        if !self.scheduler.is_scheduled(IMPORT_TICK)? {
            self.scheduler.schedule(IMPORT_TICK, self.config.jobs.tick_interval())?;
        }
        info!("Queued import into tenant {} ({})", request.tenant_id, job.hash);
        Ok(job)
    }

    /// Advance at most one pending import.
    ///
    /// Returns `Ok(None)` when nothing could be claimed. A failed import
    /// keeps its record, marked failed, and the error is returned.
    pub fn on_tick(&self) -> Result<Option<ImportOutcome>> {
        let now = (self.clock)();
        let pending = self.jobs.list(JobKind::Import)?;
        if pending.iter().all(|job| job.status == JobStatus::Failed) {
            self.scheduler.unschedule(IMPORT_TICK)?;
            return Ok(None);
        }

        let stale_after = self.config.jobs.stale_after();
        let Some(mut job) = pending.into_iter().find(|job| job.is_claimable(now, stale_after)) else {
            return Ok(None);
        };
        if job.is_running() {
            warn!("Reclaiming stale import {} started at {:?}", job.hash, job.started_at);
        }
        job.mark_running(now);
        self.jobs.put(&job)?;

        let request: ImportRequest = match serde_json::from_value(job.options.clone()) {
            Ok(request) => request,
            Err(e) => {
                job.mark_failed(format!("Unreadable import request: {}", e));
                self.jobs.put(&job)?;
                return Err(e.into());
            }
        };

        match self.run_import(&job, &request) {
            Ok((import, replace)) => {
                self.jobs.delete(JobKind::Import, &job.hash)?;
                if request.delete_archive
                    && let ArchiveSource::Path(path) = &request.archive
                {
                    if let Err(e) = fs::remove_file(path) {
                        warn!("Could not delete archive {}: {}", path.display(), e);
                    }
                }
                Ok(Some(ImportOutcome { job, import, replace }))
            }
            Err(e) => {
                job.mark_failed(e.to_string());
                self.jobs.put(&job)?;
                Err(e)
            }
        }
    }

    fn run_import(&self, job: &PendingJob, request: &ImportRequest) -> Result<(ImportReport, Option<RunReport>)> {
        let span = info_span!("siteport.import", job = %job.hash, tenant = request.tenant_id);
        let _enter = span.enter();
        let _guard = self.limit.acquire(self.config.jobs.time_limit_secs);

        let tenant = self.config.tenant(request.tenant_id)?;
        let destination = match &request.destination_store {
            Some(url) => StoreConfig::from_url(url).map_err(Error::Validation)?,
            None => self.config.store()?,
        };

        fs::create_dir_all(&self.config.jobs.work_dir)?;
        let scratch = tempfile::TempDir::new_in(&self.config.jobs.work_dir)?;
        let archive_path = match &request.archive {
            ArchiveSource::Path(path) => path.clone(),
            ArchiveSource::Url(url) => download(url, &scratch.path().join("archive.zip"))?,
        };
        let extracted = export::extract(&archive_path, &scratch.path().join("site"))?;

        if extracted.manifest.table_prefix != tenant.table_prefix() {
            return Err(Error::Validation(format!(
                "Archive holds tables for prefix '{}' but the destination tenant uses '{}'",
                extracted.manifest.table_prefix,
                tenant.table_prefix()
            )));
        }

        let import_config = request.import.clone().unwrap_or_else(|| self.config.import.clone());
        let import = StreamingImporter::new(destination.clone(), import_config)
            .with_runtime_limit(self.limit.clone())
            .import_file(extracted.dump_path(), &tenant)?;
        event!(Level::INFO, executed = import.statements_executed, failed = import.statements_failed, "dump replayed");

        self.install_assets(&extracted)?;

        let source_url = request
            .source_url
            .clone()
            .or_else(|| extracted.manifest.source_url.clone());
        let replace = match source_url {
            Some(source) if source != request.destination_url => {
                let store = SqliteStore::connect(&destination)?;
                let config = self.config.replace.clone().dry_run(false);
                let report = SearchReplace::new(&store, config)
                    .with_runtime_limit(self.limit.clone())
                    .run_tenant(&tenant, &url_pairs(&source, &request.destination_url))?;
                if let Some(reason) = &report.interrupted {
                    event!(Level::WARN, changes = report.total_changes, reason = %reason, "url rewrite interrupted");
                    return Err(Error::TimeLimitExceeded(self.limit.current()));
                }
                event!(Level::INFO, changes = report.total_changes, "urls rewritten");
                Some(report)
            }
            Some(_) => None,
            None => {
                warn!("No source URL known for import {}, skipping URL rewrite", job.hash);
                None
            }
        };

        Ok((import, replace))
    }

    fn install_assets(&self, extracted: &export::ExtractedArchive) -> Result<()> {
        if extracted.manifest.assets.is_empty() {
            return Ok(());
        }
        let Some(content_dir) = &self.config.jobs.content_dir else {
            warn!("Archive carries files but no content directory is configured, skipping them");
            return Ok(());
        };
        for asset in &extracted.manifest.assets {
            copy_tree(&extracted.asset_dir(*asset), &content_dir.join(asset.dir_name()))?;
            info!("Installed {}", asset.dir_name());
        }
        Ok(())
    }

    // ========================================================================
    // Pending jobs
    // ========================================================================

    pub fn pending(&self, kind: JobKind) -> Result<Vec<PendingJob>> {
        self.jobs.list(kind)
    }

    /// Drop a job that has not started yet.
    pub fn cancel(&self, kind: JobKind, hash: &str) -> Result<()> {
        let job = self
            .jobs
            .get(kind, hash)?
            .ok_or_else(|| Error::JobNotFound(hash.to_string()))?;
        if job.is_running() {
            return Err(Error::Validation(format!("Job {} is already running", hash)));
        }
        self.jobs.delete(kind, hash)?;
        info!("Cancelled {} job {}", kind, hash);
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn record_key(archive_path: &Path) -> String {
    format!("{}{}", EXPORT_RECORD_PREFIX, file_name(archive_path))
}

/// The URL itself plus its JSON-escaped form (`https:\/\/host`).
fn url_pairs(source: &str, destination: &str) -> ReplacePairs {
    let mut pairs = vec![ReplacePair::new(source, destination)];
    let escaped_source = source.replace('/', "\\/");
    if escaped_source != source {
        pairs.push(ReplacePair::new(escaped_source, destination.replace('/', "\\/")));
    }
    ReplacePairs::batch(pairs)
}

fn download(url: &str, dest: &Path) -> Result<PathBuf> {
    info!("Downloading {}", url);
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Download(format!("{}: {}", url, e)))?;
    let mut file = File::create(dest)?;
    response
        .copy_to(&mut file)
        .map_err(|e| Error::Download(format!("{}: {}", url, e)))?;
    Ok(dest.to_path_buf())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
