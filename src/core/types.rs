use std::fmt;
use serde::{Deserialize, Serialize};
use super::{Error, Result, Value};

pub type Row = Vec<Value>;

/// Id of the network's main site. Its tables carry the bare base prefix.
pub const ROOT_TENANT_ID: u64 = 1;

/// One logical site inside a shared, prefix-partitioned database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant {
    pub id: u64,
    pub base_prefix: String,
}

impl Tenant {
    pub fn new(id: u64, base_prefix: impl Into<String>) -> Self {
        Self {
            id,
            base_prefix: base_prefix.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_TENANT_ID
    }

    /// `wp_` for the root tenant, `wp_7_` for tenant 7.
    pub fn table_prefix(&self) -> String {
        if self.is_root() {
            self.base_prefix.clone()
        } else {
            format!("{}{}_", self.base_prefix, self.id)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::Validation("Tenant id must be > 0".into()));
        }
        if self.base_prefix.is_empty() {
            return Err(Error::Validation("Table prefix cannot be empty".into()));
        }
        if !self
            .base_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Validation(format!(
                "Table prefix '{}' may only contain [A-Za-z0-9_]",
                self.base_prefix
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant {} ({})", self.id, self.table_prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    /// Position inside the primary key, 0 when the column is not part of it.
    pub pk_position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub primary_key: Option<String>,
    pub columns: Vec<String>,
    pub row_count: u64,
    pub size_bytes: Option<u64>,
}

impl TableDescriptor {
    /// Tables without a single-column primary key are read-only for the
    /// replace engine.
    pub fn is_writable(&self) -> bool {
        self.primary_key.is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// File trees that can ride along with the SQL dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Themes,
    Plugins,
    Uploads,
}

impl Asset {
    pub const ALL: [Asset; 3] = [Asset::Themes, Asset::Plugins, Asset::Uploads];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Themes => "themes",
            Self::Plugins => "plugins",
            Self::Uploads => "uploads",
        }
    }
}

impl std::str::FromStr for Asset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "themes" => Ok(Self::Themes),
            "plugins" => Ok(Self::Plugins),
            "uploads" => Ok(Self::Uploads),
            other => Err(Error::Validation(format!("Unknown asset kind '{}'", other))),
        }
    }
}

/// Double-quote an identifier for SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_prefixes() {
        assert_eq!(Tenant::new(1, "wp_").table_prefix(), "wp_");
        assert_eq!(Tenant::new(7, "wp_").table_prefix(), "wp_7_");
    }

    #[test]
    fn test_tenant_validation() {
        assert!(Tenant::new(2, "wp_").validate().is_ok());
        assert!(Tenant::new(0, "wp_").validate().is_err());
        assert!(Tenant::new(2, "wp-;").validate().is_err());
    }

    #[test]
    fn test_asset_parse() {
        assert_eq!("Uploads".parse::<Asset>().unwrap(), Asset::Uploads);
        assert!("media".parse::<Asset>().is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("wp_posts"), "\"wp_posts\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
