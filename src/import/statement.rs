use sqlparser::ast as sql_ast;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

/// What a dump statement does, as far as the importer cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    CreateTable(String),
    CreateIndex(String),
    DropTable(Vec<String>),
    Insert(String),
    Other,
}

impl StatementKind {
    /// Table the statement writes to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::CreateTable(t) | Self::CreateIndex(t) | Self::Insert(t) => Some(t),
            Self::DropTable(names) => names.first().map(String::as_str),
            Self::Other => None,
        }
    }
}

/// Classify DDL statements only. Anything else is `Other` without parsing,
/// so row inserts never pay for a full parse.
pub fn classify_ddl(sql: &str) -> StatementKind {
    let head: String = sql
        .trim_start()
        .chars()
        .take(24)
        .collect::<String>()
        .to_ascii_uppercase();
    let is_ddl = ["CREATE TABLE", "CREATE INDEX", "CREATE UNIQUE INDEX", "DROP TABLE"]
        .iter()
        .any(|prefix| head.starts_with(prefix));
    if is_ddl { describe(sql) } else { StatementKind::Other }
}

/// Full parse. Unparseable input is `Other`.
pub fn describe(sql: &str) -> StatementKind {
    let dialect = SQLiteDialect {};
    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements,
        Err(_) => return StatementKind::Other,
    };
    let Some(statement) = statements.into_iter().next() else {
        return StatementKind::Other;
    };

    match statement {
        sql_ast::Statement::CreateTable(create) => StatementKind::CreateTable(object_name(&create.name)),
        sql_ast::Statement::CreateIndex(index) => StatementKind::CreateIndex(object_name(&index.table_name)),
        sql_ast::Statement::Drop { object_type: sql_ast::ObjectType::Table, names, .. } => {
            StatementKind::DropTable(names.iter().map(object_name).collect())
        }
        sql_ast::Statement::Insert(insert) => StatementKind::Insert(last_segment(&insert.table.to_string())),
        _ => StatementKind::Other,
    }
}

fn object_name(name: &sql_ast::ObjectName) -> String {
    name.0
        .last()
        .map(|part| unquote(&part.to_string()))
        .unwrap_or_default()
}

fn last_segment(name: &str) -> String {
    unquote(name.rsplit('.').next().unwrap_or(name))
}

fn unquote(ident: &str) -> String {
    ident
        .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table() {
        assert_eq!(
            classify_ddl("CREATE TABLE \"wp_2_posts\" (id INTEGER PRIMARY KEY, title TEXT)"),
            StatementKind::CreateTable("wp_2_posts".into())
        );
    }

    #[test]
    fn test_drop_and_index() {
        assert_eq!(
            classify_ddl("DROP TABLE IF EXISTS wp_2_posts"),
            StatementKind::DropTable(vec!["wp_2_posts".into()])
        );
        assert_eq!(
            classify_ddl("CREATE INDEX idx_title ON wp_2_posts (title)").target(),
            Some("wp_2_posts")
        );
    }

    #[test]
    fn test_inserts_are_not_parsed_by_classify() {
        let sql = "INSERT INTO wp_2_posts VALUES (1, 'x')";
        assert_eq!(classify_ddl(sql), StatementKind::Other);
        assert_eq!(describe(sql), StatementKind::Insert("wp_2_posts".into()));
    }

    #[test]
    fn test_garbage_is_other() {
        assert_eq!(describe("INSERT INTO ((("), StatementKind::Other);
    }
}
