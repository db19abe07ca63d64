//! Durable key-value storage
//!
//! The BLE core treats storage as synchronous and always available: every
//! `put` replaces the full value for its key and is flushed before returning.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A single JSON object on disk holding all keys.
///
/// Writes go to a sibling temp file which is then renamed over the original,
/// so a reader never sees a half-written file.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("Could not read store {}: {}. Starting empty.", path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("led_controller_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_memory_store_overwrites() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k"), None);
        store.put("k", "a").unwrap();
        store.put("k", "b").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("b"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let path = temp_path("store_reopen.json");
        let _ = fs::remove_file(&path);
        {
            let store = JsonFileStore::open(&path);
            store.put("last_device_address", "AA:BB:CC:DD:EE:FF").unwrap();
        }
        let store = JsonFileStore::open(&path);
        assert_eq!(
            store.get("last_device_address").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_file_store_corrupt_starts_empty() {
        let path = temp_path("store_corrupt.json");
        fs::write(&path, "[1, 2").unwrap();
        let store = JsonFileStore::open(&path);
        assert_eq!(store.get("anything"), None);
        let _ = fs::remove_file(path);
    }
}
