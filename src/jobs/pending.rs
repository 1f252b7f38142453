use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use crate::core::Result;
use crate::storage::OptionStore;

/// Pending records expire on their own after this long.
pub const PENDING_JOB_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Export,
    Import,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = crate::core::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "export" => Ok(Self::Export),
            "import" => Ok(Self::Import),
            other => Err(crate::core::Error::Validation(format!("Unknown job kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob {
    pub kind: JobKind,
    pub subject_id: u64,
    pub options: JsonValue,
    pub hash: String,
    pub enqueued_at: DateTime<Utc>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PendingJob {
    pub fn new(kind: JobKind, subject_id: u64, options: JsonValue, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            subject_id,
            hash: job_hash(subject_id, &options),
            options,
            enqueued_at: now,
            status: JobStatus::Pending,
            started_at: None,
            error: None,
        }
    }

    pub fn key(&self) -> String {
        job_key(self.kind, &self.hash)
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// A running job whose start is older than `stale_after`.
    /// A zero threshold never goes stale.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if !self.is_running() || stale_after.is_zero() {
            return false;
        }
        let Ok(stale_after) = chrono::Duration::from_std(stale_after) else {
            return false;
        };
        self.started_at.is_none_or(|started| now - started > stale_after)
    }

    /// Whether a tick may pick this job up.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == JobStatus::Pending || self.is_stale(now, stale_after)
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
    }
}

/// Content hash of `(subject_id, options)`.
///
/// `serde_json` maps keep their keys sorted, so equal options always
/// serialize to the same bytes.
pub fn job_hash(subject_id: u64, options: &JsonValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.to_be_bytes());
    hasher.update(options.to_string().as_bytes());
    hex_string(&hasher.finalize()[..16])
}

pub fn job_key(kind: JobKind, hash: &str) -> String {
    format!("pending_{}_{}", kind, hash)
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Pending job records on top of an [`OptionStore`].
#[derive(Clone)]
pub struct JobStore {
    options: Arc<dyn OptionStore>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(options: Arc<dyn OptionStore>) -> Self {
        Self {
            options,
            ttl: PENDING_JOB_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Write the record. A record with the same kind and hash is replaced.
    pub fn put(&self, job: &PendingJob) -> Result<()> {
        self.options
            .set(&job.key(), serde_json::to_value(job)?, Some(self.ttl))
    }

    pub fn get(&self, kind: JobKind, hash: &str) -> Result<Option<PendingJob>> {
        match self.options.get(&job_key(kind, hash))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, kind: JobKind, hash: &str) -> Result<bool> {
        self.options.delete(&job_key(kind, hash))
    }

    /// Live records of `kind`, oldest first.
    pub fn list(&self, kind: JobKind) -> Result<Vec<PendingJob>> {
        let prefix = format!("pending_{}_", kind);
        let mut jobs = Vec::new();
        for key in self.options.keys(&prefix)? {
            if let Some(value) = self.options.get(&key)? {
                jobs.push(serde_json::from_value::<PendingJob>(value)?);
            }
        }
        jobs.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.hash.cmp(&b.hash)));
        Ok(jobs)
    }
}
