use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use super::statement::{self, StatementKind};
use crate::connection::{SqliteStore, Store, StoreConfig};
use crate::core::{Error, Result, Tenant};
use crate::runtime::RuntimeLimit;
use crate::storage::TableCatalog;

/// Importer options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Drop the target tenant's tables before replaying the dump.
    pub drop_tables: bool,
    /// Disable foreign-key checks around the drop.
    pub force_drop: bool,
    /// Abort on the first failed statement instead of carrying on.
    pub stop_on_error: bool,
    /// Execution time limit while importing, `0` for unlimited.
    pub time_limit_secs: u64,
}

impl ImportConfig {
    pub fn drop_tables(mut self, drop_tables: bool) -> Self {
        self.drop_tables = drop_tables;
        self
    }

    pub fn force_drop(mut self, force_drop: bool) -> Self {
        self.force_drop = force_drop;
        self
    }

    pub fn stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementFailure {
    /// First line of the statement in the dump, 1-based.
    pub line: usize,
    pub table: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub statements_executed: u64,
    pub statements_failed: u64,
    pub tables_dropped: Vec<String>,
    pub tables_created: Vec<String>,
    pub errors: Vec<StatementFailure>,
}

impl ImportReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} statement(s) executed, {} failed, {} table(s) dropped, {} created",
            self.statements_executed,
            self.statements_failed,
            self.tables_dropped.len(),
            self.tables_created.len()
        )
    }
}

/// Replays a SQL dump into a destination store, one statement at a time.
///
/// The destination connection is opened per call from the importer's own
/// [`StoreConfig`] and closed when the call returns.
pub struct StreamingImporter {
    destination: StoreConfig,
    config: ImportConfig,
    limit: RuntimeLimit,
}

impl StreamingImporter {
    pub fn new(destination: StoreConfig, config: ImportConfig) -> Self {
        Self {
            destination,
            config,
            limit: RuntimeLimit::default(),
        }
    }

    pub fn with_runtime_limit(mut self, limit: RuntimeLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn import_file<P: AsRef<Path>>(&self, path: P, tenant: &Tenant) -> Result<ImportReport> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Validation(format!("Dump file {} does not exist", path.display())));
        }
        info!("Importing {} into {}", path.display(), self.destination.to_url());
        self.import_reader(BufReader::new(File::open(path)?), tenant)
    }

    pub fn import_reader<R: BufRead>(&self, reader: R, tenant: &Tenant) -> Result<ImportReport> {
        let _guard = self.limit.acquire(self.config.time_limit_secs);
        let store = SqliteStore::connect(&self.destination)?;
        let mut report = ImportReport::default();

        if self.config.drop_tables {
            self.drop_tenant_tables(&store, tenant, &mut report)?;
        }
        self.replay(&store, reader, &mut report)?;

        info!("Import finished: {}", report.summary());
        Ok(report)
    }

    /// Drop every table of `tenant` except shared user tables.
    fn drop_tenant_tables(&self, store: &dyn Store, tenant: &Tenant, report: &mut ImportReport) -> Result<()> {
        let catalog = TableCatalog::new(store);
        let tables: Vec<String> = catalog
            .list_tables(tenant)?
            .into_iter()
            .filter(|name| !name.to_ascii_lowercase().contains("user"))
            .collect();

        if self.config.force_drop {
            store.set_foreign_key_checks(false)?;
        }
        let mut outcome = Ok(());
        for table in &tables {
            if let Err(e) = catalog.drop_table(table) {
                outcome = Err(e);
                break;
            }
            debug!("Dropped {}", table);
            report.tables_dropped.push(table.clone());
        }
        if self.config.force_drop {
            store.set_foreign_key_checks(true)?;
        }
        outcome
    }

    fn replay<R: BufRead>(&self, store: &dyn Store, reader: R, report: &mut ImportReport) -> Result<()> {
        let started = Instant::now();
        let mut buffer = String::new();
        let mut start_line = 0;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || is_comment(trimmed) {
                continue;
            }
            if buffer.is_empty() {
                start_line = idx + 1;
            }
            buffer.push_str(&line);
            buffer.push('\n');

            if trimmed.ends_with(';') {
                self.limit.check(started)?;
                self.execute(store, &buffer, start_line, report)?;
                buffer.clear();
            }
        }

        if !buffer.trim().is_empty() {
            self.record_failure(
                report,
                StatementFailure {
                    line: start_line,
                    table: statement::describe(&buffer).target().map(str::to_string),
                    message: "Unterminated statement at end of dump".into(),
                },
            )?;
        }
        Ok(())
    }

    fn execute(&self, store: &dyn Store, sql: &str, line: usize, report: &mut ImportReport) -> Result<()> {
        match store.execute_batch(sql) {
            Ok(()) => {
                report.statements_executed += 1;
                if let StatementKind::CreateTable(table) = statement::classify_ddl(sql) {
                    report.tables_created.push(table);
                }
                Ok(())
            }
            Err(e) => self.record_failure(
                report,
                StatementFailure {
                    line,
                    table: statement::describe(sql).target().map(str::to_string),
                    message: e.to_string(),
                },
            ),
        }
    }

    fn record_failure(&self, report: &mut ImportReport, failure: StatementFailure) -> Result<()> {
        report.statements_failed += 1;
        if self.config.stop_on_error {
            return Err(Error::Statement {
                line: failure.line,
                message: failure.message,
            });
        }
        warn!(
            "Statement at line {} ({}) failed: {}",
            failure.line,
            failure.table.as_deref().unwrap_or("unknown table"),
            failure.message
        );
        report.errors.push(failure);
        Ok(())
    }
}

/// `--` lines and single-line `/* ... */` blocks.
fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("--")
        || (trimmed.starts_with("/*") && (trimmed.ends_with("*/") || trimmed.ends_with("*/;")))
}
