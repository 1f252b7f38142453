use std::io::Write;
use std::time::Instant;
use chrono::Utc;
use log::debug;
use crate::core::{Error, Result, TableDescriptor, Tenant, Value, quote_ident};
use crate::runtime::RuntimeLimit;
use crate::storage::TableCatalog;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub tables: Vec<String>,
    pub rows: u64,
}

/// Writes a tenant's tables as a line-oriented SQL dump.
///
/// Every statement ends on a line of its own that ends with `;`, and each
/// row is a single `INSERT` line.
pub struct DumpWriter<'a> {
    catalog: TableCatalog<'a>,
    limit: RuntimeLimit,
}

impl<'a> DumpWriter<'a> {
    pub fn new(catalog: TableCatalog<'a>) -> Self {
        Self {
            catalog,
            limit: RuntimeLimit::default(),
        }
    }

    pub fn with_runtime_limit(mut self, limit: RuntimeLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn write_tenant<W: Write>(&self, tenant: &Tenant, out: &mut W) -> Result<DumpSummary> {
        let tables = self.catalog.list_tables(tenant)?;
        self.write_tables(tenant, &tables, out)
    }

    pub fn write_tables<W: Write>(&self, tenant: &Tenant, tables: &[String], out: &mut W) -> Result<DumpSummary> {
        let started = Instant::now();
        let mut summary = DumpSummary::default();

        writeln!(out, "-- siteport SQL dump")?;
        writeln!(out, "-- {}", tenant)?;
        writeln!(out, "-- created {}", Utc::now().to_rfc3339())?;
        writeln!(out)?;

        for table in tables {
            self.limit.check(started)?;
            let descriptor = self.catalog.describe(table)?;
            summary.rows += self.write_table(&descriptor, out, started)?;
            summary.tables.push(table.clone());
        }

        out.flush()?;
        Ok(summary)
    }

    fn write_table<W: Write>(&self, table: &TableDescriptor, out: &mut W, started: Instant) -> Result<u64> {
        let store = self.catalog.store();
        let ddl = store
            .table_ddl(&table.name)?
            .ok_or_else(|| Error::TableNotFound(table.name.clone()))?;

        writeln!(out, "--")?;
        writeln!(out, "-- Table {}", table.name)?;
        writeln!(out, "--")?;
        writeln!(out, "DROP TABLE IF EXISTS {};", quote_ident(&table.name))?;
        writeln!(out, "{};", ddl.trim_end().trim_end_matches(';'))?;

        let insert_head = format!(
            "INSERT INTO {} ({}) VALUES",
            quote_ident(&table.name),
            table.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        );

        let mut rows = 0u64;
        for page in self.catalog.pages(table) {
            self.limit.check(started)?;
            for row in page? {
                let values = row.iter().map(Value::to_sql_literal).collect::<Vec<_>>().join(", ");
                writeln!(out, "{} ({});", insert_head, values)?;
                rows += 1;
            }
        }

        for index in store.index_ddl(&table.name)? {
            writeln!(out, "{};", index.trim_end().trim_end_matches(';'))?;
        }
        writeln!(out)?;

        debug!("Dumped {} row(s) from {}", rows, table.name);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{SqliteStore, Store};

    #[test]
    fn test_dump_layout() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE wp_3_options (option_id INTEGER PRIMARY KEY, option_value TEXT);
                 CREATE INDEX wp_3_options_value ON wp_3_options (option_value);
                 INSERT INTO wp_3_options VALUES (1, 'it''s'), (2, 'two' || char(10) || 'lines');
                 CREATE TABLE wp_options (option_id INTEGER PRIMARY KEY);",
            )
            .unwrap();

        let writer = DumpWriter::new(TableCatalog::new(&store));
        let mut out = Vec::new();
        let summary = writer.write_tenant(&Tenant::new(3, "wp_"), &mut out).unwrap();
        let dump = String::from_utf8(out).unwrap();

        assert_eq!(summary.tables, vec!["wp_3_options".to_string()]);
        assert_eq!(summary.rows, 2);
        assert!(dump.contains("DROP TABLE IF EXISTS \"wp_3_options\";"));
        assert!(dump.contains("VALUES (1, 'it''s');"));
        assert!(dump.contains("VALUES (2, ('two'||char(10)||'lines'));"));
        assert!(dump.contains("CREATE INDEX wp_3_options_value ON wp_3_options (option_value);"));
        assert!(!dump.contains("\"wp_options\""));
    }
}
