// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Key holding the serialized podcast library
pub const LIBRARY_KEY: &str = "library";
/// Key holding the set of downloaded episode ids
pub const DOWNLOADED_KEY: &str = "downloaded_episodes";
/// Key holding the episode id -> last position map
pub const POSITIONS_KEY: &str = "playback_positions";

/// Durable key-value storage for small JSON documents
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value for a key
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value for a key
    fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed JSON accessors available on every store
pub trait KeyValueStoreExt: KeyValueStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    source: e,
                }),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value)?;
        self.put(key, json)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

/// Store that keeps one `<key>.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadFailed { path, source: e }),
        }
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key);
        // Readers must never observe a half-written document.
        let partial = self.dir.join(format!("{key}.json.partial"));
        std::fs::write(&partial, value).map_err(|e| StoreError::WriteFailed {
            path: partial.clone(),
            source: e,
        })?;
        std::fs::rename(&partial, &path).map_err(|e| {
            let _ = std::fs::remove_file(&partial);
            StoreError::WriteFailed { path, source: e }
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::WriteFailed { path, source: e }),
        }
    }
}

/// In-memory store, useful for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn file_store_returns_none_for_missing_key() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.get("nothing").unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            let mut positions = BTreeMap::new();
            positions.insert("ep1".to_string(), 42.5);
            store.put_json(POSITIONS_KEY, &positions).unwrap();
        }

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        let positions: BTreeMap<String, f64> = reopened.get_json(POSITIONS_KEY).unwrap().unwrap();
        assert_eq!(positions.get("ep1"), Some(&42.5));
    }

    #[test]
    fn file_store_leaves_no_partial_file_behind() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.put(LIBRARY_KEY, "[]".to_string()).unwrap();

        assert!(dir.path().join("library.json").exists());
        assert!(!dir.path().join("library.json.partial").exists());
    }

    #[test]
    fn file_store_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = JsonFileStore::open(&nested).unwrap();
        store.put("k", "1".to_string()).unwrap();
        assert!(nested.join("k.json").exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.put("k", "1".to_string()).unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());

        let memory = MemoryStore::new();
        memory.remove("k").unwrap();
    }

    #[test]
    fn corrupt_json_is_reported_with_key() {
        let store = MemoryStore::new();
        store.put(DOWNLOADED_KEY, "{not json".to_string()).unwrap();

        let result: Result<Option<Vec<String>>, _> = store.get_json(DOWNLOADED_KEY);
        match result {
            Err(StoreError::Corrupt { key, .. }) => assert_eq!(key, DOWNLOADED_KEY),
            other => panic!("Expected Corrupt error, got {:?}", other),
        }
    }
}
