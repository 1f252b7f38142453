use log::{debug, warn};
use regex::Regex;
use crate::connection::Store;
use crate::core::{Error, Result, Row, TableDescriptor, Tenant, Value, quote_ident};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Read/write access to the tables of a shared multi-tenant database.
///
/// Holds no state beyond the borrowed store handle and the page size.
pub struct TableCatalog<'a> {
    store: &'a dyn Store,
    page_size: usize,
}

impl<'a> TableCatalog<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn store(&self) -> &'a dyn Store {
        self.store
    }

    /// Tables owned by `tenant`.
    ///
    /// The root tenant shares the bare base prefix with every other tenant,
    /// so a plain prefix match would sweep in `wp_2_posts` and friends.
    /// For it we keep only names that are not followed by `<digits>_`.
    pub fn list_tables(&self, tenant: &Tenant) -> Result<Vec<String>> {
        let prefix = tenant.table_prefix();
        let all = self.store.table_names()?;

        let tables: Vec<String> = if tenant.is_root() {
            let other_tenant = Regex::new(&format!("^{}[0-9]+_", regex::escape(&tenant.base_prefix)))
                .map_err(|e| Error::Validation(format!("Invalid table prefix: {}", e)))?;
            all.into_iter()
                .filter(|name| name.starts_with(&prefix) && !other_tenant.is_match(name))
                .collect()
        } else {
            all.into_iter().filter(|name| name.starts_with(&prefix)).collect()
        };

        debug!("{} owns {} table(s)", tenant, tables.len());
        Ok(tables)
    }

    /// Primary key (when there is exactly one key column) and column names.
    ///
    /// A missing or composite key yields `None`; callers must then treat the
    /// table as read-only.
    pub fn columns_of(&self, table: &str) -> Result<(Option<String>, Vec<String>)> {
        let info = self.store.columns(table)?;
        let key_columns: Vec<&str> = info
            .iter()
            .filter(|c| c.pk_position > 0)
            .map(|c| c.name.as_str())
            .collect();

        let primary_key = match key_columns.as_slice() {
            [single] => Some(single.to_string()),
            [] => None,
            _ => {
                warn!("Table '{}' has a composite primary key, treating as read-only", table);
                None
            }
        };

        Ok((primary_key, info.into_iter().map(|c| c.name).collect()))
    }

    pub fn describe(&self, table: &str) -> Result<TableDescriptor> {
        let (primary_key, columns) = self.columns_of(table)?;
        Ok(TableDescriptor {
            name: table.to_string(),
            primary_key,
            columns,
            row_count: self.row_count(table)?,
            size_bytes: self.table_size(table)?,
        })
    }

    pub fn row_count(&self, table: &str) -> Result<u64> {
        let rows = self
            .store
            .query(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), &[])?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0) as u64)
    }

    pub fn table_size(&self, table: &str) -> Result<Option<u64>> {
        self.store.table_size(table)
    }

    /// One page of rows, columns in declaration order.
    ///
    /// Rows are ordered by the primary key when there is one, otherwise by
    /// the storage row id, so consecutive pages never overlap.
    pub fn page(&self, table: &TableDescriptor, offset: u64, limit: usize) -> Result<Vec<Row>> {
        let columns = table
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let order = match &table.primary_key {
            Some(pk) => quote_ident(pk),
            None => "rowid".to_string(),
        };
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT ?1 OFFSET ?2",
            columns,
            quote_ident(&table.name),
            order
        );
        self.store
            .query(&sql, &[Value::Integer(limit as i64), Value::Integer(offset as i64)])
    }

    /// Iterate over a table one page at a time.
    pub fn pages<'c>(&'c self, table: &'c TableDescriptor) -> PageIter<'c, 'a> {
        PageIter {
            catalog: self,
            table,
            offset: 0,
            done: false,
        }
    }

    /// Update a single row. Returns the number of rows touched.
    pub fn apply_update(
        &self,
        table: &str,
        set: &[(String, Value)],
        where_clauses: &[(String, Value)],
    ) -> Result<usize> {
        if set.is_empty() {
            return Ok(0);
        }
        if where_clauses.is_empty() {
            return Err(Error::Validation(format!(
                "Refusing to update '{}' without a WHERE clause",
                table
            )));
        }

        let mut params = Vec::with_capacity(set.len() + where_clauses.len());
        let mut assignments = Vec::with_capacity(set.len());
        for (column, value) in set {
            params.push(value.clone());
            assignments.push(format!("{} = ?{}", quote_ident(column), params.len()));
        }
        let mut conditions = Vec::with_capacity(where_clauses.len());
        for (column, value) in where_clauses {
            params.push(value.clone());
            conditions.push(format!("{} = ?{}", quote_ident(column), params.len()));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            assignments.join(", "),
            conditions.join(" AND ")
        );
        self.store.execute(&sql, &params)
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.store
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
    }
}

pub struct PageIter<'c, 'a> {
    catalog: &'c TableCatalog<'a>,
    table: &'c TableDescriptor,
    offset: u64,
    done: bool,
}

impl Iterator for PageIter<'_, '_> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let limit = self.catalog.page_size;
        match self.catalog.page(self.table, self.offset, limit) {
            Ok(rows) if rows.is_empty() => {
                self.done = true;
                None
            }
            Ok(rows) => {
                if rows.len() < limit {
                    self.done = true;
                }
                self.offset += rows.len() as u64;
                Some(Ok(rows))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
