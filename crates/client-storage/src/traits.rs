//! Storage trait definitions.

use crate::StorageResult;

/// Trait for durable key/value storage backends.
///
/// The client's analog of browser local storage: values survive a
/// restart, reads of absent keys return `None`, and writes are atomic at
/// the key level only.
pub trait DurableStorage: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
