use std::collections::BTreeSet;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use super::archive::{self, MANIFEST_VERSION, Manifest};
use super::dump::DumpWriter;
use crate::connection::Store;
use crate::core::{Asset, Error, Result, Tenant};
use crate::runtime::RuntimeLimit;
use crate::storage::TableCatalog;

/// What to put into an export besides the SQL dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub assets: BTreeSet<Asset>,
    /// Public URL of the site, recorded in the manifest so an import can
    /// rewrite it.
    pub source_url: Option<String>,
}

impl ExportOptions {
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.assets.insert(asset);
        self
    }

    pub fn source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// A finished export on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub archive_path: PathBuf,
    pub tenant_id: u64,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub included_assets: BTreeSet<Asset>,
    pub duration_ms: u64,
}

/// Builds export archives for tenants of one store.
pub struct Exporter<'a> {
    store: &'a dyn Store,
    output_dir: PathBuf,
    content_dir: Option<PathBuf>,
    page_size: usize,
    time_limit_secs: u64,
    limit: RuntimeLimit,
}

impl<'a> Exporter<'a> {
    pub fn new(store: &'a dyn Store, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            content_dir: None,
            page_size: crate::storage::DEFAULT_PAGE_SIZE,
            time_limit_secs: 0,
            limit: RuntimeLimit::default(),
        }
    }

    /// Directory holding the `themes/`, `plugins/` and `uploads/` trees.
    pub fn content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.content_dir = Some(dir.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Limit applied for the duration of an export, `0` for unlimited.
    pub fn time_limit_secs(mut self, secs: u64) -> Self {
        self.time_limit_secs = secs;
        self
    }

    pub fn with_runtime_limit(mut self, limit: RuntimeLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn export(&self, tenant: &Tenant, options: &ExportOptions) -> Result<ExportRecord> {
        tenant.validate()?;
        let _guard = self.limit.acquire(self.time_limit_secs);
        let started = Instant::now();
        fs::create_dir_all(&self.output_dir)?;

        let catalog = TableCatalog::new(self.store).with_page_size(self.page_size);
        let dump = NamedTempFile::new_in(&self.output_dir)?;
        let summary = {
            let mut out = BufWriter::new(dump.as_file());
            DumpWriter::new(catalog)
                .with_runtime_limit(self.limit.clone())
                .write_tenant(tenant, &mut out)?
        };

        let asset_roots = self.asset_roots(&options.assets)?;
        let created_at = Utc::now();
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            tenant_id: tenant.id,
            table_prefix: tenant.table_prefix(),
            source_url: options.source_url.clone(),
            created_at,
            tables: summary.tables,
            assets: Vec::new(),
        };

        let archive_path = self.output_dir.join(archive_name(tenant, created_at));
        let staging = NamedTempFile::new_in(&self.output_dir)?;
        let manifest = archive::write_archive(staging.path(), dump.path(), manifest, &asset_roots)?;
        staging
            .persist(&archive_path)
            .map_err(|e| Error::Archive(format!("Cannot store {}: {}", archive_path.display(), e)))?;

        let record = ExportRecord {
            size_bytes: fs::metadata(&archive_path)?.len(),
            archive_path,
            tenant_id: tenant.id,
            created_at,
            included_assets: manifest.assets.into_iter().collect(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Exported {} ({} table(s), {} row(s)) to {} in {} ms",
            tenant,
            manifest.tables.len(),
            summary.rows,
            record.archive_path.display(),
            record.duration_ms
        );
        Ok(record)
    }

    fn asset_roots(&self, assets: &BTreeSet<Asset>) -> Result<Vec<(Asset, PathBuf)>> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }
        let content_dir = self.content_dir.as_deref().ok_or_else(|| {
            Error::Validation("Assets were requested but no content directory is configured".into())
        })?;
        Ok(assets
            .iter()
            .map(|asset| (*asset, content_dir.join(asset.dir_name())))
            .collect())
    }
}

fn archive_name(tenant: &Tenant, created_at: DateTime<Utc>) -> String {
    format!("site-{}-{}.zip", tenant.id, created_at.format("%Y%m%d-%H%M%S%3f"))
}

/// Whether `path` sits directly inside `dir`.
pub(crate) fn is_inside(path: &Path, dir: &Path) -> bool {
    path.parent().is_some_and(|parent| parent == dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqliteStore;
    use tempfile::TempDir;

    #[test]
    fn test_export_writes_archive() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE wp_2_posts (id INTEGER PRIMARY KEY, content TEXT);
                 INSERT INTO wp_2_posts VALUES (1, 'hello');",
            )
            .unwrap();
        let content = dir.path().join("content");
        fs::create_dir_all(content.join("themes/twenty")).unwrap();
        fs::write(content.join("themes/twenty/style.css"), "body {}").unwrap();

        let exports = dir.path().join("exports");
        let record = Exporter::new(&store, &exports)
            .content_dir(&content)
            .export(
                &Tenant::new(2, "wp_"),
                &ExportOptions::default()
                    .with_asset(Asset::Themes)
                    .with_asset(Asset::Uploads)
                    .source_url("http://old.test"),
            )
            .unwrap();

        assert!(record.archive_path.is_file());
        assert!(is_inside(&record.archive_path, &exports));
        assert!(record.size_bytes > 0);
        assert_eq!(record.included_assets, BTreeSet::from([Asset::Themes]));

        let manifest = archive::read_manifest(&record.archive_path).unwrap();
        assert_eq!(manifest.tables, vec!["wp_2_posts".to_string()]);
        assert_eq!(manifest.source_url.as_deref(), Some("http://old.test"));
        assert_eq!(fs::read_dir(&exports).unwrap().count(), 1);
    }

    #[test]
    fn test_assets_need_content_dir() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::in_memory().unwrap();
        let result = Exporter::new(&store, dir.path())
            .export(&Tenant::new(2, "wp_"), &ExportOptions::default().with_asset(Asset::Uploads));
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
