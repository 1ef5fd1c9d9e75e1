//! Durable storage for the Commons client session.
//!
//! This crate provides:
//! - A `DurableStorage` trait over restart-surviving key/value storage
//! - A JSON-file backend (the desktop analog of browser local storage)
//! - The `TokenStore` accessor for the three persisted credential keys
//! - Unverified JWT payload inspection for expiry and user-id claims

pub mod claims;
mod file;
mod keys;
mod tokens;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use tokens::TokenStore;
pub use traits::DurableStorage;

use client_config_and_utils::Paths;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default file-backed storage under the client's base directory.
pub fn create_storage(paths: &Paths) -> StorageResult<Box<dyn DurableStorage>> {
    let storage = FileStorage::open(paths.session_file())?;
    Ok(Box::new(storage))
}

/// Create a TokenStore with the default file-backed storage.
pub fn create_token_store(paths: &Paths) -> StorageResult<TokenStore> {
    let storage = create_storage(paths)?;
    Ok(TokenStore::new(storage))
}
