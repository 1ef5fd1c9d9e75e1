//! Storage key constants.

/// Storage keys used by the client.
///
/// The names match the web client's persisted keys so a session written
/// by either surface reads back identically.
pub struct StorageKeys;

impl StorageKeys {
    /// Access token (short-lived bearer credential)
    pub const ACCESS_TOKEN: &'static str = "accessToken";

    /// Refresh token (exchanged for new access tokens)
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    /// User id of the signed-in account
    pub const USER_ID: &'static str = "userId";
}
