use log::debug;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use super::{Store, StoreConfig};
use crate::core::{ColumnInfo, Error, Result, Row, Value};

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Connection,
    url: String,
}

impl SqliteStore {
    /// Open a fresh connection described by `config`.
    ///
    /// Failures surface as [`Error::Connection`]; nothing retries.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        config.validate().map_err(Error::Connection)?;

        let conn = match &config.path {
            None => Connection::open_in_memory(),
            Some(path) => {
                let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
                if config.read_only {
                    flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
                } else {
                    flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
                    if config.create_if_missing {
                        flags |= OpenFlags::SQLITE_OPEN_CREATE;
                    }
                }
                Connection::open_with_flags(path, flags)
            }
        }
        .map_err(|e| Error::Connection(format!("Failed to open {}: {}", config.to_url(), e)))?;

        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| Error::Connection(format!("Failed to set busy timeout: {}", e)))?;

        debug!("Opened store {}", config.to_url());

        Ok(Self {
            conn,
            url: config.to_url(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::connect(&StoreConfig::in_memory())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Store for SqliteStore {
    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(Value::from(row.get_ref(idx)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let rows = self.query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self.query(
            "SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid",
            &[Value::from(table)],
        )?;

        if rows.is_empty() {
            return Err(Error::TableNotFound(table.to_string()));
        }

        Ok(rows
            .into_iter()
            .map(|row| ColumnInfo {
                name: row[0].as_str().unwrap_or_default().to_string(),
                declared_type: row[1].as_str().unwrap_or_default().to_string(),
                pk_position: row[2].as_i64().unwrap_or(0).max(0) as u32,
            })
            .collect())
    }

    fn table_ddl(&self, table: &str) -> Result<Option<String>> {
        let rows = self.query(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::from(table)],
        )?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    fn index_ddl(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.query(
            "SELECT sql FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
            &[Value::from(table)],
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    fn table_size(&self, table: &str) -> Result<Option<u64>> {
        // dbstat is a compile-time option; treat its absence as "unknown".
        match self.query(
            "SELECT SUM(pgsize) FROM dbstat WHERE name = ?1",
            &[Value::from(table)],
        ) {
            Ok(rows) => Ok(rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .and_then(|v| v.as_i64())
                .map(|n| n.max(0) as u64)),
            Err(_) => Ok(None),
        }
    }

    fn set_foreign_key_checks(&self, enabled: bool) -> Result<()> {
        let sql = if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
