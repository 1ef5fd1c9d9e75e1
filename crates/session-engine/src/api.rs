//! HTTP client for the Commons backend API.
//!
//! Every response arrives in the `{success, data, message}` envelope. A
//! non-2xx status or `success: false` is a failure; the envelope message
//! is surfaced verbatim when the backend provides one.

use crate::error::{AuthError, AuthResult};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Signed-in user profile as the backend returns it.
///
/// Only `id` is guaranteed; everything else is filled in as far as the
/// backend knows it, so the fields stay lenient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User UUID
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Direct URL or opaque storage key; see avatar resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    /// Whether the profile is hidden from non-friends
    #[serde(default)]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Credentials for `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Credentials for `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCredentials {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
    pub country: String,
    pub contact: String,
}

/// Successful login/registration payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// Successful refresh payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub access_token: String,
}

/// Token refresh request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

/// Presigned avatar URL payload.
#[derive(Debug, Deserialize)]
struct PresignedUrlPayload {
    url: String,
}

/// Response envelope used by every backend endpoint.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// The seam between the session manager and the network.
///
/// The session manager is generic over this trait so its control flow
/// (refresh-once, cancellation, logout resilience) is testable against a
/// scripted backend.
pub trait AuthBackend: Send + Sync {
    /// Authenticate with email/password.
    fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> impl Future<Output = AuthResult<AuthPayload>> + Send;

    /// Create an account.
    fn register(
        &self,
        credentials: &RegisterCredentials,
    ) -> impl Future<Output = AuthResult<AuthPayload>> + Send;

    /// Exchange the refresh token for a new access token.
    fn refresh(&self, refresh_token: &str) -> impl Future<Output = AuthResult<String>> + Send;

    /// Invalidate the session server-side (best effort).
    fn logout(&self) -> impl Future<Output = AuthResult<()>> + Send;

    /// Fetch a user profile by id.
    fn fetch_user(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> impl Future<Output = AuthResult<User>> + Send;

    /// Exchange an avatar storage key for a time-limited signed URL.
    fn avatar_url(
        &self,
        key: &str,
        access_token: &str,
    ) -> impl Future<Output = AuthResult<String>> + Send;
}

/// HTTP client for the Commons backend.
#[derive(Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Arguments
    /// * `base_url` - The backend base URL (e.g., `https://api.commons.app/v1`)
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the URL for an API path.
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Read a response body and unwrap the `{success, data, message}` envelope.
    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        fallback: &str,
    ) -> AuthResult<T> {
        let status = response.status();
        let body = response.text().await?;
        parse_envelope(status, &body, fallback)
    }
}

/// Unwrap the `{success, data, message}` envelope.
///
/// Failure is any non-2xx status or `success: false`; the backend's
/// `message` passes through verbatim, else `fallback` is used. A
/// non-JSON body is treated the same as a failed envelope.
fn parse_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    fallback: &str,
) -> AuthResult<T> {
    let envelope: ApiEnvelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(status = %status, error = %error, "response body was not a JSON envelope");
            return Err(AuthError::Api(fallback.to_string()));
        }
    };

    if !status.is_success() || !envelope.success {
        let message = envelope.message.unwrap_or_else(|| fallback.to_string());
        tracing::warn!(status = %status, message = %message, "request rejected");
        return Err(AuthError::Api(message));
    }

    envelope
        .data
        .ok_or_else(|| AuthError::Api(fallback.to_string()))
}

impl AuthBackend for ApiClient {
    async fn login(&self, credentials: &LoginCredentials) -> AuthResult<AuthPayload> {
        let url = self.endpoint("/auth/login");
        tracing::debug!(url = %url, email = %credentials.email, "attempting login");

        let response = self.http_client.post(&url).json(credentials).send().await?;

        Self::read_envelope(response, "Login failed. Please try again.")
            .await
            .map_err(|error| match error {
                AuthError::Api(message) => AuthError::InvalidCredentials(message),
                other => other,
            })
    }

    async fn register(&self, credentials: &RegisterCredentials) -> AuthResult<AuthPayload> {
        let url = self.endpoint("/auth/register");
        tracing::debug!(url = %url, email = %credentials.email, "attempting registration");

        let response = self.http_client.post(&url).json(credentials).send().await?;

        Self::read_envelope(response, "Registration failed. Please try again.")
            .await
            .map_err(|error| match error {
                AuthError::Api(message) => AuthError::InvalidCredentials(message),
                other => other,
            })
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<String> {
        let url = self.endpoint("/auth/refresh");
        tracing::debug!(url = %url, "refreshing access token");

        let response = self
            .http_client
            .post(&url)
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await?;

        let payload: RefreshPayload =
            Self::read_envelope(response, "Session refresh failed. Please sign in again.")
                .await
                .map_err(|error| match error {
                    AuthError::Api(message) => AuthError::TokenRefresh(message),
                    other => other,
                })?;

        Ok(payload.access_token)
    }

    async fn logout(&self) -> AuthResult<()> {
        let url = self.endpoint("/auth/logout");
        tracing::debug!(url = %url, "notifying backend of logout");

        let response = self.http_client.post(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AuthError::Api(format!(
                "Logout request rejected: HTTP {}",
                status
            )));
        }

        Ok(())
    }

    async fn fetch_user(&self, user_id: &str, access_token: &str) -> AuthResult<User> {
        let url = self.endpoint(&format!("/users/{}", user_id));
        tracing::debug!(url = %url, "fetching user profile");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        Self::read_envelope(response, "API request failed").await
    }

    async fn avatar_url(&self, key: &str, access_token: &str) -> AuthResult<String> {
        let url = self.endpoint("/users/avatar/presigned-url/");
        tracing::debug!(url = %url, "requesting presigned avatar URL");

        let response = self
            .http_client
            .get(&url)
            .query(&[("key", key)])
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let payload: PresignedUrlPayload =
            Self::read_envelope(response, "API request failed").await?;
        Ok(payload.url)
    }
}
