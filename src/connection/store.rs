use crate::core::{ColumnInfo, Result, Row, Value};

/// Handle to a SQL database holding one or more tenants.
///
/// Components never reach for an ambient connection; they are handed a
/// `Store` (or a [`StoreConfig`](super::StoreConfig) to open their own).
pub trait Store {
    /// Run one or more statements that return no rows.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Run a single parameterized statement, returning affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Run a parameterized query and collect every row.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// All user tables, sorted by name.
    fn table_names(&self) -> Result<Vec<String>>;

    /// Column metadata in declaration order.
    fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// `CREATE TABLE` text for the table, if it exists.
    fn table_ddl(&self, table: &str) -> Result<Option<String>>;

    /// `CREATE INDEX` statements attached to the table.
    fn index_ddl(&self, table: &str) -> Result<Vec<String>>;

    /// Approximate on-disk size. `None` when the backend cannot tell.
    fn table_size(&self, table: &str) -> Result<Option<u64>>;

    fn set_foreign_key_checks(&self, enabled: bool) -> Result<()>;
}
