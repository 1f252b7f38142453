use std::time::Instant;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use super::{CellChange, MatchMode, Matcher, ReplacePairs, Rewriter, RunReport, TableChangeReport};
use crate::connection::Store;
use crate::core::{Error, Result, TableDescriptor, Tenant, Value};
use crate::runtime::RuntimeLimit;
use crate::storage::{DEFAULT_PAGE_SIZE, TableCatalog};

/// Search-replace options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceConfig {
    /// Report only. Must be switched off explicitly to write.
    pub dry_run: bool,
    pub mode: MatchMode,
    /// Return the first decode error instead of recording it.
    pub strict: bool,
    /// Columns that are never rewritten, in any table.
    pub skip_columns: Vec<String>,
    /// When non-empty, only these columns are considered.
    pub include_columns: Vec<String>,
    /// Serialized object classes that are left untouched.
    pub opaque_classes: Vec<String>,
    pub page_size: usize,
    /// Record a per-cell change log.
    pub log_changes: bool,
    /// Cap on change log entries per table. `None` keeps everything.
    pub max_change_log: Option<usize>,
    /// Execution-time limit held for the length of the run. `None` leaves
    /// the shared limit as the caller set it.
    pub time_limit_secs: Option<u64>,
}

impl Default for ReplaceConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            mode: MatchMode::Literal,
            strict: false,
            skip_columns: vec!["guid".to_string()],
            include_columns: Vec::new(),
            opaque_classes: vec!["__PHP_Incomplete_Class".to_string()],
            page_size: DEFAULT_PAGE_SIZE,
            log_changes: true,
            max_change_log: None,
            time_limit_secs: None,
        }
    }
}

impl ReplaceConfig {
    pub fn commit() -> Self {
        Self {
            dry_run: false,
            ..Self::default()
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn skip_column(mut self, column: impl Into<String>) -> Self {
        self.skip_columns.push(column.into());
        self
    }

    pub fn include_column(mut self, column: impl Into<String>) -> Self {
        self.include_columns.push(column.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn time_limit_secs(mut self, secs: u64) -> Self {
        self.time_limit_secs = Some(secs);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Validation("page_size must be > 0".into()));
        }
        Ok(())
    }

    fn wants_column(&self, column: &str) -> bool {
        if self.skip_columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            return false;
        }
        self.include_columns.is_empty()
            || self.include_columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Rewrites matching strings across whole tables.
///
/// Runs unlimited unless handed a [`RuntimeLimit`] or configured with
/// `time_limit_secs`. When the limit runs out the run stops between pages
/// and returns what it did so far, flagged in [`RunReport::interrupted`].
pub struct SearchReplace<'a> {
    catalog: TableCatalog<'a>,
    config: ReplaceConfig,
    limit: RuntimeLimit,
}

impl<'a> SearchReplace<'a> {
    pub fn new(store: &'a dyn Store, config: ReplaceConfig) -> Self {
        let catalog = TableCatalog::new(store).with_page_size(config.page_size);
        Self {
            catalog,
            config,
            limit: RuntimeLimit::unlimited(),
        }
    }

    pub fn with_runtime_limit(mut self, limit: RuntimeLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn config(&self) -> &ReplaceConfig {
        &self.config
    }

    /// Every table owned by `tenant`.
    pub fn run_tenant(&self, tenant: &Tenant, pairs: &ReplacePairs) -> Result<RunReport> {
        let tables = self.catalog.list_tables(tenant)?;
        self.run(&tables, pairs)
    }

    pub fn run(&self, tables: &[String], pairs: &ReplacePairs) -> Result<RunReport> {
        self.config.validate()?;
        let matchers = pairs.compile(self.config.mode)?;
        let _guard = self.config.time_limit_secs.map(|secs| self.limit.acquire(secs));
        let started = Instant::now();
        let mut report = RunReport::new(self.config.dry_run);

        info!(
            "Search-replace over {} table(s) with {} pair(s){}",
            tables.len(),
            matchers.len(),
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        for (done, table) in tables.iter().enumerate() {
            let mut table_report = TableChangeReport::new(table);
            let outcome = self
                .limit
                .check(started)
                .and_then(|_| self.process_table(table, &matchers, started, &mut table_report));
            match outcome {
                Ok(()) => {}
                Err(e @ Error::TimeLimitExceeded(_)) => {
                    warn!(
                        "Search-replace stopped in '{}' after {} of {} table(s): {}",
                        table,
                        done,
                        tables.len(),
                        e
                    );
                    if table_report.rows_scanned > 0 {
                        table_report.errors.push(e.to_string());
                        report.push(table_report);
                    }
                    report.interrupted = Some(format!("{} (stopped at table '{}')", e, table));
                    break;
                }
                Err(e) => return Err(e),
            }
            debug!(
                "{}: {} row(s), {} change(s), {} update(s)",
                table, table_report.rows_scanned, table_report.cells_changed, table_report.updates_executed
            );
            report.push(table_report);
        }

        info!("{}", report.summary());
        Ok(report)
    }

    /// Fills `report` as it goes, so rows handled before an error are
    /// still accounted for.
    fn process_table(
        &self,
        table: &str,
        matchers: &[Matcher],
        started: Instant,
        report: &mut TableChangeReport,
    ) -> Result<()> {
        let descriptor = match self.catalog.describe(table) {
            Ok(descriptor) => descriptor,
            Err(Error::TableNotFound(_)) => {
                report.errors.push(format!("Table '{}' does not exist", table));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let writable = descriptor.is_writable();
        if !writable {
            warn!("Table '{}' has no primary key, changes will not be written", table);
            report.errors.push(format!(
                "Table '{}' has no primary key; rows are scanned but never updated",
                table
            ));
        }

        let rewriter = Rewriter::new(matchers)
            .opaque_classes(&self.config.opaque_classes)
            .strict(self.config.strict);
        let pk_index = descriptor
            .primary_key
            .as_deref()
            .and_then(|pk| descriptor.column_index(pk));

        for page in self.catalog.pages(&descriptor) {
            self.limit.check(started)?;
            for row in page? {
                report.rows_scanned += 1;
                let row_id = match pk_index {
                    Some(idx) => row[idx].to_string(),
                    None => format!("#{}", report.rows_scanned),
                };
                let set = self.rewrite_row(&descriptor, pk_index, &row, &row_id, &rewriter, report)?;

                if set.is_empty() || !writable || self.config.dry_run {
                    continue;
                }
                let (Some(pk), Some(idx)) = (descriptor.primary_key.as_ref(), pk_index) else {
                    continue;
                };
                match self.catalog.apply_update(table, &set, &[(pk.clone(), row[idx].clone())]) {
                    Ok(0) => report
                        .errors
                        .push(format!("Row {} disappeared before it could be updated", row_id)),
                    Ok(_) => report.updates_executed += 1,
                    Err(e) => report.errors.push(format!("Failed to update row {}: {}", row_id, e)),
                }
            }
        }

        Ok(())
    }

    /// Changed `(column, value)` pairs for one row.
    fn rewrite_row(
        &self,
        descriptor: &TableDescriptor,
        pk_index: Option<usize>,
        row: &[Value],
        row_id: &str,
        rewriter: &Rewriter<'_>,
        report: &mut TableChangeReport,
    ) -> Result<Vec<(String, Value)>> {
        let mut set = Vec::new();
        for (idx, column) in descriptor.columns.iter().enumerate() {
            if Some(idx) == pk_index || !self.config.wants_column(column) {
                continue;
            }
            let Some(text) = row.get(idx).and_then(Value::as_str) else {
                continue;
            };

            let mut notes = Vec::new();
            let rewritten = rewriter.rewrite_text(text, &mut notes)?;
            report.errors.extend(
                notes
                    .into_iter()
                    .map(|note| format!("Row {}, column '{}': {}", row_id, column, note)),
            );

            if let Some(new) = rewritten {
                report.cells_changed += 1;
                let keep_log = self.config.log_changes
                    && self
                        .config
                        .max_change_log
                        .is_none_or(|max| report.change_log.len() < max);
                if keep_log {
                    report.change_log.push(CellChange {
                        row: row_id.to_string(),
                        column: column.clone(),
                        from: text.to_string(),
                        to: new.clone(),
                    });
                }
                set.push((column.clone(), Value::Text(new)));
            }
        }
        Ok(set)
    }
}
