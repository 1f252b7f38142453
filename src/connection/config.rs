use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Store connection configuration
///
/// Every component that touches a database opens its own handle from one of
/// these, so source and destination can live side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file, `None` for a private in-memory database
    pub path: Option<PathBuf>,

    /// How long a statement waits on a locked database
    pub busy_timeout: Duration,

    /// Open without write access
    pub read_only: bool,

    /// Create the database file when missing
    pub create_if_missing: bool,
}

impl StoreConfig {
    /// Configuration for a database file
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Configuration for a private in-memory database
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Set busy timeout
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Open read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Refuse to create the database file
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Parse from connection string
    ///
    /// Formats: `sqlite:///abs/path.db`, `sqlite://relative.db`,
    /// `sqlite::memory:`
    ///
    /// # Examples
    ///
    /// ```
    /// use siteport::StoreConfig;
    ///
    /// let config = StoreConfig::from_url("sqlite:///var/lib/site.db").unwrap();
    /// assert_eq!(config.path.unwrap().to_str(), Some("/var/lib/site.db"));
    /// ```
    pub fn from_url(url: &str) -> Result<Self, String> {
        if url == "sqlite::memory:" {
            return Ok(Self::in_memory());
        }

        let rest = url
            .strip_prefix("sqlite://")
            .ok_or_else(|| "URL must start with 'sqlite://'".to_string())?;

        let (path, query) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };

        if path.is_empty() {
            return Err("Database path cannot be empty".to_string());
        }

        let mut config = Self::file(path);

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            match pair.split_once('=') {
                Some(("mode", "ro")) => {
                    config.read_only = true;
                    config.create_if_missing = false;
                }
                Some(("mode", "rw")) => config.create_if_missing = false,
                Some(("mode", "rwc")) => {}
                Some(("busy_timeout", ms)) => {
                    let ms: u64 = ms.parse().map_err(|_| "Invalid busy_timeout".to_string())?;
                    config.busy_timeout = Duration::from_millis(ms);
                }
                _ => return Err(format!("Unsupported connection option '{}'", pair)),
            }
        }

        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite://{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.read_only && self.path.is_none() {
            return Err("An in-memory database cannot be opened read-only".to_string());
        }

        if self.read_only && self.create_if_missing {
            return Err("read_only and create_if_missing are mutually exclusive".to_string());
        }

        if let Some(path) = &self.path
            && path.as_os_str().is_empty()
        {
            return Err("Database path cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
            read_only: false,
            create_if_missing: true,
        }
    }
}
