//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Login or registration rejected by the backend
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Backend reported failure or returned an unusable envelope
    #[error("API error: {0}")]
    Api(String),

    /// Token refresh error
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// No session credentials are stored
    #[error("Not logged in")]
    NotLoggedIn,

    /// Session expired and refresh failed
    #[error("Session expired")]
    SessionExpired,

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// A newer operation superseded this one; no state was applied
    #[error("Operation superseded")]
    Superseded,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] client_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be
    /// retried.
    ///
    /// Transient errors include connection failures, timeouts, and 5xx
    /// responses. Auth rejections are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Timeout => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// The string the UI shows inline for this failure.
    ///
    /// Backend messages pass through verbatim; everything else collapses
    /// to a generic line so transport details never reach the user.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials(message)
            | AuthError::Api(message)
            | AuthError::TokenRefresh(message) => message.clone(),
            AuthError::SessionExpired => "Your session has expired. Please sign in again.".to_string(),
            AuthError::Http(_) | AuthError::Timeout => {
                "Cannot reach the server. Please try again.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
