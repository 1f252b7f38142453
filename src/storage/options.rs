//! Small durable key-value store with per-key expiry.
//!
//! Holds pending job records and export bookkeeping. The file-backed variant
//! re-reads the file on every call so that a record written by one process is
//! visible to the next one.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;
use crate::core::{Error, Result};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub trait OptionStore: Send + Sync {
    /// Store `value` under `key`. `ttl = None` never expires.
    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) -> Result<()>;

    /// Live value for `key`; expired entries read as absent.
    fn get(&self, key: &str) -> Result<Option<JsonValue>>;

    fn delete(&self, key: &str) -> Result<bool>;

    /// Live keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: JsonValue,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: JsonValue, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        let expires_at = ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()).map(|ttl| now + ttl);
        Self { value, expires_at }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

type Entries = BTreeMap<String, Entry>;

fn live_keys(entries: &Entries, prefix: &str, now: DateTime<Utc>) -> Vec<String> {
    entries
        .iter()
        .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
        .map(|(k, _)| k.clone())
        .collect()
}

// ============================================================================
// In-memory store
// ============================================================================

pub struct MemoryOptionStore {
    entries: Mutex<Entries>,
    clock: Clock,
}

impl MemoryOptionStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            clock,
        }
    }
}

impl Default for MemoryOptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionStore for MemoryOptionStore {
    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) -> Result<()> {
        let now = (self.clock)();
        self.entries.lock()?.insert(key.to_string(), Entry::new(value, ttl, now));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        let now = (self.clock)();
        let mut entries = self.entries.lock()?;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock()?.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = (self.clock)();
        let entries = self.entries.lock()?;
        Ok(live_keys(&entries, prefix, now))
    }
}

// ============================================================================
// File-backed store
// ============================================================================

pub struct FileOptionStore {
    path: PathBuf,
    lock: Mutex<()>,
    clock: Clock,
}

impl FileOptionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_clock(path, system_clock())
    }

    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Clock) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create option store directory: {}", e))
            })?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Entries> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to read option store: {}", e)))?;
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&data)
            .map_err(|e| Error::Storage(format!("Corrupt option store {}: {}", self.path.display(), e)))
    }

    fn save(&self, entries: &Entries) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;
        let serialized = serde_json::to_vec_pretty(entries)?;
        temp.write_all(&serialized)
            .map_err(|e| Error::Storage(format!("Failed to write option store: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync option store: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to replace option store: {}", e)))?;
        Ok(())
    }

    /// Load, drop expired entries, apply `f`, save when anything changed.
    fn mutate<T>(&self, f: impl FnOnce(&mut Entries) -> (T, bool)) -> Result<T> {
        let _guard = self.lock.lock()?;
        let now = (self.clock)();
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        if entries.len() != before {
            warn!("Purged {} expired option(s) from {}", before - entries.len(), self.path.display());
        }
        let (out, changed) = f(&mut entries);
        if changed || entries.len() != before {
            self.save(&entries)?;
        }
        Ok(out)
    }
}

impl OptionStore for FileOptionStore {
    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) -> Result<()> {
        let now = (self.clock)();
        self.mutate(|entries| {
            entries.insert(key.to_string(), Entry::new(value, ttl, now));
            ((), true)
        })
    }

    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        let _guard = self.lock.lock()?;
        let now = (self.clock)();
        Ok(self
            .load()?
            .remove(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.mutate(|entries| {
            let removed = entries.remove(key).is_some();
            (removed, removed)
        })
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock()?;
        let now = (self.clock)();
        Ok(live_keys(&self.load()?, prefix, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn manual_clock() -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(Utc::now()));
        let handle = now.clone();
        (Arc::new(move || *handle.lock().unwrap()), now)
    }

    #[test]
    fn test_memory_set_get_delete() {
        let store = MemoryOptionStore::new();
        store.set("a", json!({"x": 1}), None).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"x": 1})));
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_keys_by_prefix() {
        let store = MemoryOptionStore::new();
        store.set("task_1_site_export", json!(1), None).unwrap();
        store.set("task_2_site_export", json!(2), None).unwrap();
        store.set("export_time_3", json!(1200), None).unwrap();

        let mut keys = store.keys("task_").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["task_1_site_export", "task_2_site_export"]);
        assert_eq!(store.keys("").unwrap().len(), 3);
        assert!(store.keys("pending_").unwrap().is_empty());
    }

    #[test]
    fn test_memory_ttl_expiry() {
        let (clock, now) = manual_clock();
        let store = MemoryOptionStore::with_clock(clock);
        store.set("job", json!(1), Some(Duration::from_secs(60))).unwrap();
        assert!(store.get("job").unwrap().is_some());

        *now.lock().unwrap() += chrono::Duration::seconds(61);
        assert!(store.get("job").unwrap().is_none());
        assert!(store.keys("").unwrap().is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("options.json");
        {
            let store = FileOptionStore::open(&path).unwrap();
            store.set("pending_import_abc", json!("queued"), Some(Duration::from_secs(7200))).unwrap();
            store.set("export_time_3", json!(1200), None).unwrap();
        }
        let store = FileOptionStore::open(&path).unwrap();
        assert_eq!(store.get("pending_import_abc").unwrap(), Some(json!("queued")));
        assert_eq!(store.keys("pending_").unwrap(), vec!["pending_import_abc"]);
    }

    #[test]
    fn test_file_store_expiry_is_purged_on_write() {
        let dir = TempDir::new().unwrap();
        let (clock, now) = manual_clock();
        let store = FileOptionStore::open_with_clock(dir.path().join("o.json"), clock).unwrap();
        store.set("short", json!(true), Some(Duration::from_secs(10))).unwrap();
        *now.lock().unwrap() += chrono::Duration::seconds(11);
        store.set("other", json!(false), None).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("short"));
    }
}
