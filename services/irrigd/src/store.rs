//! Persisted runtime settings
//!
//! A flat key/value store for the settings an operator can change while the
//! daemon runs (watering thresholds, calibration factors). Values are strings
//! and parsed by their owners, so an unreadable entry degrades to the owner's
//! default instead of failing startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{IrrigError, Result};

/// Key/value settings persistence
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several keys; implementations may persist them in one step
    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

/// Parse `key` from the store, falling back to `default` when absent or
/// unparsable
pub fn load_or<T>(store: &dyn ConfigStore, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match store.get(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => {
                debug!(key, %value, "Loaded setting");
                value
            },
            Err(_) => {
                warn!(key, raw = %raw, %default, "Unparsable setting, using default");
                default
            },
        },
        None => {
            debug!(key, %default, "Setting absent, using default");
            default
        },
    }
}

/// Settings file holding one JSON object of string values
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store; a missing file is an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(map) => {
                    info!("Loaded {} settings from {}", map.len(), path.display());
                    map
                },
                Err(e) => {
                    warn!(
                        "Settings file {} is corrupt ({}), starting empty",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                },
            }
        } else {
            info!("No settings file at {}, using defaults", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            IrrigError::storage(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value.to_string())])
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut guard = self.entries.lock();
        let mut next = guard.clone();
        for (key, value) in entries {
            next.insert((*key).to_string(), value.clone());
        }
        // Memory is only updated once the file is on disk
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}

/// Volatile store for tests and simulated runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        {
            let mut map = store.entries.lock();
            for (key, value) in entries {
                map.insert(key.to_string(), value.to_string());
            }
        }
        store
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn load_or_falls_back() {
        let store = MemoryStore::with_entries([("a", "42"), ("b", "not-a-number")]);
        assert_eq!(load_or(&store, "a", 0u32), 42);
        assert_eq!(load_or(&store, "b", 7u32), 7);
        assert_eq!(load_or(&store, "missing", 1.5f32), 1.5);
    }

    #[test]
    fn json_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("watering.duration_secs"), None);
        store.set("watering.duration_secs", "25").unwrap();
        store
            .set_many(&[
                ("calibration.ph", "1.1".to_string()),
                ("watering.enabled", "false".to_string()),
            ])
            .unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("watering.duration_secs").as_deref(), Some("25"));
        assert_eq!(reopened.get("calibration.ph").as_deref(), Some("1.1"));
        assert_eq!(reopened.get("watering.enabled").as_deref(), Some("false"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("anything"), None);
    }
}
