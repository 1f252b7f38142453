//! Engine configuration, loadable from a TOML file.
//!
//! ```toml
//! store_url = "sqlite://network.db"
//! table_prefix = "wp_"
//!
//! [replace]
//! skip_columns = ["guid"]
//!
//! [import]
//! drop_tables = true
//!
//! [jobs]
//! export_dir = "exports"
//! tick_interval_secs = 60
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::connection::StoreConfig;
use crate::core::{Error, Result, Tenant};
use crate::import::ImportConfig;
use crate::replace::ReplaceConfig;

/// Background job settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Where finished archives are written.
    pub export_dir: PathBuf,
    /// Scratch space for downloads and extracted archives.
    pub work_dir: PathBuf,
    /// Parent of the `themes/`, `plugins/` and `uploads/` trees.
    pub content_dir: Option<PathBuf>,
    /// JSON file holding pending jobs, queued tasks and export records.
    pub state_file: PathBuf,
    pub tick_interval_secs: u64,
    pub pending_ttl_secs: u64,
    /// Reclaim a running import after this long. `0` never reclaims.
    pub stale_after_secs: u64,
    /// Execution time limit while a job runs, `0` for unlimited.
    pub time_limit_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("exports"),
            work_dir: std::env::temp_dir().join("siteport"),
            content_dir: None,
            state_file: PathBuf::from("siteport-state.json"),
            tick_interval_secs: 60,
            pending_ttl_secs: 2 * 60 * 60,
            stale_after_secs: 30 * 60,
            time_limit_secs: 0,
        }
    }
}

impl JobConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(Error::Validation("tick_interval_secs must be > 0".into()));
        }
        if self.pending_ttl_secs == 0 {
            return Err(Error::Validation("pending_ttl_secs must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `sqlite://path` or `sqlite::memory:`.
    pub store_url: String,
    /// Base table prefix shared by all tenants.
    pub table_prefix: String,
    pub replace: ReplaceConfig,
    pub import: ImportConfig,
    pub jobs: JobConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_url: "sqlite://site.db".to_string(),
            table_prefix: "wp_".to_string(),
            replace: ReplaceConfig::default(),
            import: ImportConfig::default(),
            jobs: JobConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Validation(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn store(&self) -> Result<StoreConfig> {
        StoreConfig::from_url(&self.store_url).map_err(Error::Validation)
    }

    pub fn tenant(&self, id: u64) -> Result<Tenant> {
        let tenant = Tenant::new(id, self.table_prefix.clone());
        tenant.validate()?;
        Ok(tenant)
    }

    pub fn validate(&self) -> Result<()> {
        self.store()?;
        Tenant::new(1, self.table_prefix.clone()).validate()?;
        self.replace.validate()?;
        self.jobs.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.replace.dry_run);
        assert_eq!(config.jobs.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.jobs.stale_after(), Duration::from_secs(1800));
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml(
            r#"
            store_url = "sqlite::memory:"
            table_prefix = "site_"

            [replace]
            mode = "case_insensitive"
            skip_columns = ["guid", "user_pass"]

            [import]
            drop_tables = true
            stop_on_error = true

            [jobs]
            export_dir = "/var/exports"
            stale_after_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.store().unwrap(), StoreConfig::in_memory());
        assert_eq!(config.tenant(4).unwrap().table_prefix(), "site_4_");
        assert_eq!(config.replace.mode, crate::replace::MatchMode::CaseInsensitive);
        assert_eq!(config.replace.skip_columns.len(), 2);
        assert!(config.import.drop_tables && config.import.stop_on_error);
        assert_eq!(config.jobs.export_dir, PathBuf::from("/var/exports"));
        assert_eq!(config.jobs.tick_interval_secs, 60);
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(EngineConfig::from_toml("table_prefix = \"wp-\"").is_err());
    }
}
