use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellChange {
    /// Primary key value, or `#<n>` (scan position) for tables without one.
    pub row: String,
    pub column: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableChangeReport {
    pub table: String,
    pub rows_scanned: u64,
    pub cells_changed: u64,
    pub updates_executed: u64,
    pub errors: Vec<String>,
    pub change_log: Vec<CellChange>,
}

impl TableChangeReport {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// Outcome of one search-replace invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    /// Tables with at least one changed cell.
    pub tables_touched: u64,
    pub total_changes: u64,
    pub per_table: Vec<TableChangeReport>,
    /// Set when the run stopped early; tables after the stopping point were
    /// not visited.
    pub interrupted: Option<String>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn push(&mut self, table: TableChangeReport) {
        if table.cells_changed > 0 {
            self.tables_touched += 1;
        }
        self.total_changes += table.cells_changed;
        self.per_table.push(table);
    }

    pub fn table(&self, name: &str) -> Option<&TableChangeReport> {
        self.per_table.iter().find(|t| t.table == name)
    }

    pub fn updates_executed(&self) -> u64 {
        self.per_table.iter().map(|t| t.updates_executed).sum()
    }

    /// `(table, message)` for every recorded error.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.per_table
            .iter()
            .flat_map(|t| t.errors.iter().map(move |e| (t.table.as_str(), e.as_str())))
    }

    pub fn has_errors(&self) -> bool {
        self.per_table.iter().any(|t| !t.errors.is_empty())
    }

    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} {} change(s) in {} of {} table(s){}",
            if self.dry_run { "Would make" } else { "Made" },
            self.total_changes,
            self.tables_touched,
            self.per_table.len(),
            if self.has_errors() { ", with errors" } else { "" }
        );
        if let Some(reason) = &self.interrupted {
            summary.push_str(&format!("; interrupted: {}", reason));
        }
        summary
    }
}
