//! Unverified JWT payload inspection.
//!
//! These helpers decode the middle segment of a three-part token to read
//! claims the client cares about (`userId`, `exp`). This is **not** a
//! trust boundary: signatures are never checked here, only the backend
//! verifies them. Being able to decode a claim says nothing about whether
//! the token is valid.
//!
//! Every helper degrades to `None`/`false` on malformed input and never
//! panics.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Seconds subtracted from `exp` before a token counts as expired, to
/// tolerate clock skew and in-flight request latency.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

/// Decode the payload segment of a JWT as a JSON object.
///
/// Returns `None` unless the token has exactly three dot-separated
/// segments and the middle one is base64url JSON. Padded payloads are
/// tolerated.
pub fn payload_claims(token: &str) -> Option<Value> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() || payload.is_empty() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Extract the `userId` claim, if present.
pub fn user_id_from_token(token: &str) -> Option<String> {
    payload_claims(token)?
        .get("userId")?
        .as_str()
        .map(String::from)
}

/// Extract the `exp` claim (unix seconds), if present.
pub fn token_expiry(token: &str) -> Option<i64> {
    let claims = payload_claims(token)?;
    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

/// Whether the token is expired: `now >= exp - buffer`.
///
/// A token without an `exp` claim is treated as never expiring. The
/// backend always stamps `exp`; if that ever changes this policy is a
/// trust gap to revisit.
pub fn is_token_expired(token: &str, buffer_secs: i64) -> bool {
    match token_expiry(token) {
        Some(exp) => chrono::Utc::now().timestamp() >= exp.saturating_sub(buffer_secs),
        None => false,
    }
}
