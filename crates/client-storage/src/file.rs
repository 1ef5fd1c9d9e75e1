//! File-backed durable storage.

use crate::{DurableStorage, StorageError, StorageResult};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

/// Durable key/value storage backed by a JSON map file.
///
/// The whole map is rewritten on every mutation; individual keys are
/// atomic, but there is no transaction spanning multiple keys. A missing
/// or unreadable file starts an empty map rather than failing the client.
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or create) the storage file at `path`.
    pub fn open(path: PathBuf) -> StorageResult<Self> {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "storage file is corrupt, starting empty"
                );
                HashMap::new()
            }),
            Err(error) if error.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl DurableStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.remove(key).is_some();
        if removed {
            self.persist(&entries)?;
        }
        Ok(removed)
    }
}
