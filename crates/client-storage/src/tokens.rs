//! High-level API for the persisted session credentials.

use crate::{claims, DurableStorage, StorageKeys, StorageResult};

/// High-level accessor for the three persisted credential keys.
///
/// All credential reads and writes in the client go through this type;
/// nothing else touches the underlying keys.
pub struct TokenStore {
    storage: Box<dyn DurableStorage>,
}

impl TokenStore {
    /// Create a new token store with the given storage backend.
    pub fn new(storage: Box<dyn DurableStorage>) -> Self {
        Self { storage }
    }

    /// Retrieve the access token.
    pub fn access_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::ACCESS_TOKEN)
    }

    /// Store the access token.
    pub fn set_access_token(&self, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::ACCESS_TOKEN, token)
    }

    /// Retrieve the refresh token.
    pub fn refresh_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::REFRESH_TOKEN)
    }

    /// Store the refresh token.
    pub fn set_refresh_token(&self, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::REFRESH_TOKEN, token)
    }

    /// Retrieve the user id, falling back to the `userId` claim of the
    /// stored access token when the key is absent.
    pub fn user_id(&self) -> StorageResult<Option<String>> {
        if let Some(user_id) = self.storage.get(StorageKeys::USER_ID)? {
            return Ok(Some(user_id));
        }

        let derived = self
            .access_token()?
            .as_deref()
            .and_then(claims::user_id_from_token);
        Ok(derived)
    }

    /// Store the user id.
    pub fn set_user_id(&self, user_id: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::USER_ID, user_id)
    }

    /// Store a complete session.
    ///
    /// The access token is written last: if an earlier write fails, the
    /// leftover state has no access token and simply forces
    /// re-authentication instead of leaving a half-session behind.
    pub fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        user_id: &str,
    ) -> StorageResult<()> {
        self.set_refresh_token(refresh_token)?;
        self.set_user_id(user_id)?;
        self.set_access_token(access_token)?;
        Ok(())
    }

    /// Remove all three credential keys.
    ///
    /// Idempotent and safe when already empty. The access token goes
    /// first for the same reason `set_session` writes it last.
    pub fn clear_tokens(&self) -> StorageResult<()> {
        let _ = self.storage.delete(StorageKeys::ACCESS_TOKEN);
        let _ = self.storage.delete(StorageKeys::REFRESH_TOKEN);
        let _ = self.storage.delete(StorageKeys::USER_ID);
        Ok(())
    }

    /// Whether a session exists (access token and user id both present).
    pub fn has_session(&self) -> StorageResult<bool> {
        let has_token = self.storage.has(StorageKeys::ACCESS_TOKEN)?;
        Ok(has_token && self.user_id()?.is_some())
    }

    /// Whether the stored access token is expired (or absent).
    pub fn is_access_token_expired(&self, buffer_secs: i64) -> StorageResult<bool> {
        match self.access_token()? {
            Some(token) => Ok(claims::is_token_expired(&token, buffer_secs)),
            None => Ok(true),
        }
    }
}
