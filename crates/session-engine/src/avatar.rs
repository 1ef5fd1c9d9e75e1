//! Avatar URL resolution.
//!
//! A stored avatar reference is either a usable URL already or an opaque
//! storage key that has to be exchanged for a time-limited signed URL.
//! Resolution is best-effort and bounded: any failure or timeout falls
//! back to the default asset so it can never wedge session setup.

use crate::api::AuthBackend;
use std::time::Duration;

/// Whether a stored reference can be used as an image source directly.
pub fn looks_like_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://") || value.starts_with('/')
}

/// Resolve a stored avatar reference to a displayable URL.
pub async fn resolve_avatar_url<B: AuthBackend>(
    backend: &B,
    access_token: &str,
    avatar_ref: Option<&str>,
    timeout: Duration,
    default_avatar: &str,
) -> String {
    let Some(key) = avatar_ref.filter(|key| !key.is_empty()) else {
        return default_avatar.to_string();
    };

    if looks_like_url(key) {
        return key.to_string();
    }

    match tokio::time::timeout(timeout, backend.avatar_url(key, access_token)).await {
        Ok(Ok(url)) => url,
        Ok(Err(error)) => {
            tracing::warn!(error = %error, "failed to resolve avatar URL");
            default_avatar.to_string()
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "avatar URL resolution timed out");
            default_avatar.to_string()
        }
    }
}
