//! Session management with FSM-based state tracking.
//!
//! `SessionManager` owns the client's authentication lifecycle: it
//! reconstructs a session from stored credentials on startup, performs
//! login/registration/logout, keeps the observable auth state truthful
//! over time via the expiry watchdog, and guarantees that a superseded
//! operation never clobbers the result of a later one.
//!
//! Concurrency model: every mutating operation captures an epoch at
//! entry; every post-await write re-checks that epoch and applies
//! nothing when a newer operation (or `teardown`) has bumped it. That
//! gives user-initiated operations precedence over a still-in-flight
//! initializer without any locking across suspension points.

use crate::api::{AuthBackend, LoginCredentials, RegisterCredentials, User};
use crate::auth_fsm::{SessionMachine, SessionMachineInput, SessionState};
use crate::avatar::resolve_avatar_url;
use crate::error::{AuthError, AuthResult};
use client_config_and_utils::Config;
use client_storage::{claims, TokenStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tunables for a session manager instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Route pushed after a successful login/registration.
    pub landing_route: String,
    /// Route pushed when the session ends.
    pub login_route: String,
    /// Fallback avatar asset.
    pub default_avatar_path: String,
    /// Seconds of slack before `exp` at which a token counts as expired.
    pub expiry_buffer_secs: i64,
    /// Watchdog re-check period.
    pub watchdog_interval: Duration,
    /// Upper bound on avatar presigned-URL resolution.
    pub avatar_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            landing_route: client_config_and_utils::DEFAULT_LANDING_ROUTE.to_string(),
            login_route: client_config_and_utils::DEFAULT_LOGIN_ROUTE.to_string(),
            default_avatar_path: client_config_and_utils::DEFAULT_AVATAR_PATH.to_string(),
            expiry_buffer_secs: client_config_and_utils::DEFAULT_EXPIRY_BUFFER_SECS,
            watchdog_interval: Duration::from_secs(
                client_config_and_utils::DEFAULT_WATCHDOG_INTERVAL_SECS,
            ),
            avatar_timeout: Duration::from_secs(
                client_config_and_utils::DEFAULT_AVATAR_TIMEOUT_SECS,
            ),
        }
    }
}

impl SessionConfig {
    /// Build a session config from the loaded client configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            landing_route: config.landing_route.clone(),
            login_route: config.login_route.clone(),
            default_avatar_path: config.default_avatar_path.clone(),
            expiry_buffer_secs: config.expiry_buffer_secs,
            watchdog_interval: Duration::from_secs(config.watchdog_interval_secs),
            avatar_timeout: Duration::from_secs(config.avatar_timeout_secs),
        }
    }
}

/// Observable session state, consumed by route guards and views.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Last known profile, if any.
    pub user: Option<User>,
    /// Displayable avatar URL (always set; defaults to the bundled asset).
    pub avatar_url: String,
    /// Derived truth: profile present and access token present and fresh.
    pub is_authenticated: bool,
    /// True while a session-mutating operation is unsettled.
    pub is_loading: bool,
}

/// Callback type for session state change notifications.
pub type SessionCallback = Box<dyn Fn(SessionSnapshot) + Send + Sync>;

/// Callback type for navigation requests (route guards own the router).
pub type NavigateCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Mutable state owned by the session.
struct SharedState {
    user: Option<User>,
    avatar_url: String,
}

/// Session manager for the client's authentication lifecycle.
pub struct SessionManager<B: AuthBackend> {
    store: TokenStore,
    backend: B,
    config: SessionConfig,
    /// Internal FSM for tracking session state transitions.
    fsm: Mutex<SessionMachine>,
    /// Profile and avatar owned by the session.
    shared: Mutex<SharedState>,
    /// Bumped by every mutating operation; stale operations discard writes.
    epoch: AtomicU64,
    /// Optional observer for state change notifications.
    state_callback: Mutex<Option<SessionCallback>>,
    /// Optional navigation sink.
    navigate: Mutex<Option<NavigateCallback>>,
    /// Expiry watchdog task, if spawned.
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl<B: AuthBackend> SessionManager<B> {
    /// Create a new session manager.
    pub fn new(store: TokenStore, backend: B, config: SessionConfig) -> Self {
        let default_avatar = config.default_avatar_path.clone();
        Self {
            store,
            backend,
            config,
            fsm: Mutex::new(SessionMachine::new()),
            shared: Mutex::new(SharedState {
                user: None,
                avatar_url: default_avatar,
            }),
            epoch: AtomicU64::new(0),
            state_callback: Mutex::new(None),
            navigate: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    /// Set a callback to be notified of session state changes.
    pub fn set_state_callback(&self, callback: SessionCallback) {
        let mut cb = self.state_callback.lock().unwrap();
        *cb = Some(callback);
    }

    /// Set the navigation sink invoked with the landing/login routes.
    pub fn set_navigator(&self, callback: NavigateCallback) {
        let mut cb = self.navigate.lock().unwrap();
        *cb = Some(callback);
    }

    /// Get the current FSM state.
    pub fn state(&self) -> SessionState {
        let fsm = self.fsm.lock().unwrap();
        SessionState::from(fsm.state())
    }

    /// Current observable session state.
    ///
    /// `is_authenticated` is derived on every read rather than cached, so
    /// it can never disagree with the stored token's expiry.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        let shared = self.shared.lock().unwrap();
        let is_authenticated = shared.user.is_some() && self.access_token_is_fresh();

        SessionSnapshot {
            is_loading: state.is_loading(),
            is_authenticated,
            user: shared.user.clone(),
            avatar_url: shared.avatar_url.clone(),
            state,
        }
    }

    fn access_token_is_fresh(&self) -> bool {
        match self.store.access_token() {
            Ok(Some(token)) => !claims::is_token_expired(&token, self.config.expiry_buffer_secs),
            _ => false,
        }
    }

    /// Transition the FSM and notify the observer if the state changed.
    fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionState> {
        let mut fsm = self.fsm.lock().unwrap();
        let old_state = SessionState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = SessionState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
            self.notify_observers();
        }

        Ok(new_state)
    }

    fn notify_observers(&self) {
        let snapshot = self.snapshot();
        let cb = self.state_callback.lock().unwrap();
        if let Some(callback) = cb.as_ref() {
            callback(snapshot);
        }
    }

    fn navigate_to(&self, route: &str) {
        let cb = self.navigate.lock().unwrap();
        if let Some(callback) = cb.as_ref() {
            callback(route);
        }
    }

    /// Start a mutating operation, superseding anything still in flight.
    fn begin_op(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Reconstruct the session from stored credentials.
    ///
    /// Settles into `Authenticated` or `Unauthenticated` and never errors
    /// outward; returns the state it settled in. Performs at most one
    /// token refresh. A cancelled/superseded run applies no mutation.
    pub async fn init(&self) -> SessionState {
        let epoch = self.begin_op();
        let _ = self.transition(&SessionMachineInput::ValidateSession);

        let access_token = self.store.access_token().ok().flatten();
        let user_id = self.store.user_id().ok().flatten();
        let (Some(access_token), Some(user_id)) = (access_token, user_id) else {
            info!("No stored session found");
            if self.is_current(epoch) {
                let _ = self.transition(&SessionMachineInput::NoSession);
            }
            return self.state();
        };

        match self.backend.fetch_user(&user_id, &access_token).await {
            Ok(user) => {
                if !self.is_current(epoch) {
                    return self.state();
                }
                info!(user_id = %user.id, "Session restored from stored credentials");
                self.finish_sign_in(epoch, user, &access_token, SessionMachineInput::ProfileFetched)
                    .await
            }
            Err(error) => {
                if !self.is_current(epoch) {
                    return self.state();
                }
                debug!(error = %error, "Profile fetch failed, attempting token refresh");
                let _ = self.transition(&SessionMachineInput::FetchRejected);
                self.refresh_and_retry(epoch, &user_id).await
            }
        }
    }

    /// The single refresh attempt of an initialization cycle, followed by
    /// one profile re-fetch. Any failure here is terminal for the stored
    /// session.
    async fn refresh_and_retry(&self, epoch: u64, user_id: &str) -> SessionState {
        let refresh_token = self.store.refresh_token().ok().flatten();
        let Some(refresh_token) = refresh_token else {
            warn!("No refresh token available, signing out");
            return self.hard_logout(epoch, &SessionMachineInput::RefreshFailed);
        };

        match self.backend.refresh(&refresh_token).await {
            Ok(access_token) => {
                if !self.is_current(epoch) {
                    return self.state();
                }
                if let Err(error) = self.store.set_access_token(&access_token) {
                    warn!(error = %error, "Failed to persist refreshed access token");
                }
                let _ = self.transition(&SessionMachineInput::RefreshSucceeded);

                match self.backend.fetch_user(user_id, &access_token).await {
                    Ok(user) => {
                        if !self.is_current(epoch) {
                            return self.state();
                        }
                        info!(user_id = %user.id, "Session restored after token refresh");
                        self.finish_sign_in(
                            epoch,
                            user,
                            &access_token,
                            SessionMachineInput::ProfileFetched,
                        )
                        .await
                    }
                    Err(error) => {
                        warn!(error = %error, "Profile fetch failed again after refresh, signing out");
                        self.hard_logout(epoch, &SessionMachineInput::FetchRejected)
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, "Token refresh failed, signing out");
                self.hard_logout(epoch, &SessionMachineInput::RefreshFailed)
            }
        }
    }

    /// Apply a fetched profile: resolve the avatar, publish the user, and
    /// settle the FSM with `success_input`.
    async fn finish_sign_in(
        &self,
        epoch: u64,
        user: User,
        access_token: &str,
        success_input: SessionMachineInput,
    ) -> SessionState {
        let avatar_url = resolve_avatar_url(
            &self.backend,
            access_token,
            user.avatar_url.as_deref(),
            self.config.avatar_timeout,
            &self.config.default_avatar_path,
        )
        .await;

        if !self.is_current(epoch) {
            return self.state();
        }

        {
            let mut shared = self.shared.lock().unwrap();
            shared.user = Some(user);
            shared.avatar_url = avatar_url;
        }
        let _ = self.transition(&success_input);
        self.state()
    }

    /// Clear everything and send the client to the login surface.
    ///
    /// Navigation fires before the state notification so guards never
    /// render an unauthenticated frame ahead of the redirect.
    fn hard_logout(&self, epoch: u64, input: &SessionMachineInput) -> SessionState {
        if !self.is_current(epoch) {
            return self.state();
        }

        if let Err(error) = self.store.clear_tokens() {
            warn!(error = %error, "Failed to clear stored tokens");
        }
        {
            let mut shared = self.shared.lock().unwrap();
            shared.user = None;
            shared.avatar_url = self.config.default_avatar_path.clone();
        }
        self.navigate_to(&self.config.login_route);
        let _ = self.transition(input);
        self.state()
    }

    /// Authenticate with email/password.
    ///
    /// On success the session is persisted (access token last), the
    /// profile published, and the client navigated to the landing route.
    /// On failure the session is untouched and the error carries the
    /// user-displayable message (`AuthError::user_message`).
    pub async fn login(&self, credentials: &LoginCredentials) -> AuthResult<User> {
        let epoch = self.begin_op();
        let _ = self.transition(&SessionMachineInput::Interrupted);
        self.transition(&SessionMachineInput::LoginAttempt)?;

        match self.backend.login(credentials).await {
            Ok(payload) => {
                self.complete_sign_in(epoch, payload, SessionMachineInput::LoginSucceeded)
                    .await
            }
            Err(error) => {
                warn!(error = %error, "Login failed");
                if self.is_current(epoch) {
                    let _ = self.transition(&SessionMachineInput::LoginFailed);
                }
                Err(error)
            }
        }
    }

    /// Create an account; same contract as [`SessionManager::login`].
    pub async fn register(&self, credentials: &RegisterCredentials) -> AuthResult<User> {
        let epoch = self.begin_op();
        let _ = self.transition(&SessionMachineInput::Interrupted);
        self.transition(&SessionMachineInput::RegisterAttempt)?;

        match self.backend.register(credentials).await {
            Ok(payload) => {
                self.complete_sign_in(epoch, payload, SessionMachineInput::RegisterSucceeded)
                    .await
            }
            Err(error) => {
                warn!(error = %error, "Registration failed");
                if self.is_current(epoch) {
                    let _ = self.transition(&SessionMachineInput::RegisterFailed);
                }
                Err(error)
            }
        }
    }

    async fn complete_sign_in(
        &self,
        epoch: u64,
        payload: crate::api::AuthPayload,
        success_input: SessionMachineInput,
    ) -> AuthResult<User> {
        if !self.is_current(epoch) {
            return Err(AuthError::Superseded);
        }

        self.store.set_session(
            &payload.access_token,
            &payload.refresh_token,
            &payload.user.id,
        )?;

        let user = payload.user.clone();
        let state = self
            .finish_sign_in(epoch, payload.user, &payload.access_token, success_input)
            .await;

        if !state.is_authenticated() {
            return Err(AuthError::Superseded);
        }

        info!(user_id = %user.id, "Signed in");
        self.navigate_to(&self.config.landing_route);
        Ok(user)
    }

    /// End the session.
    ///
    /// The backend call is best effort; local state always clears and the
    /// client always lands on the login route, even offline.
    pub async fn logout(&self) {
        let epoch = self.begin_op();
        let _ = self.transition(&SessionMachineInput::Interrupted);
        let _ = self.transition(&SessionMachineInput::LogoutRequested);

        if let Err(error) = self.backend.logout().await {
            warn!(error = %error, "Remote logout failed, clearing local session anyway");
        }

        if !self.is_current(epoch) {
            return;
        }

        if let Err(error) = self.store.clear_tokens() {
            warn!(error = %error, "Failed to clear stored tokens");
        }
        {
            let mut shared = self.shared.lock().unwrap();
            shared.user = None;
            shared.avatar_url = self.config.default_avatar_path.clone();
        }
        self.navigate_to(&self.config.login_route);
        let _ = self.transition(&SessionMachineInput::LogoutComplete);
        info!("Logged out");
    }

    /// Get a valid access token for an authenticated request, refreshing
    /// it silently when expired.
    ///
    /// A failed silent refresh is terminal: the session is cleared and
    /// the client sent to the login route.
    pub async fn valid_access_token(&self) -> AuthResult<String> {
        let access_token = self.store.access_token()?.ok_or(AuthError::NotLoggedIn)?;
        if !claims::is_token_expired(&access_token, self.config.expiry_buffer_secs) {
            return Ok(access_token);
        }

        info!("Access token expired, attempting silent refresh");
        let epoch = self.begin_op();
        let _ = self.transition(&SessionMachineInput::TokenExpired);

        let user_id = self.store.user_id()?.ok_or(AuthError::NotLoggedIn)?;
        let Some(refresh_token) = self.store.refresh_token()? else {
            self.hard_logout(epoch, &SessionMachineInput::RefreshFailed);
            return Err(AuthError::SessionExpired);
        };

        match self.backend.refresh(&refresh_token).await {
            Ok(new_token) => {
                if !self.is_current(epoch) {
                    return Err(AuthError::Superseded);
                }
                self.store.set_access_token(&new_token)?;
                let _ = self.transition(&SessionMachineInput::RefreshSucceeded);

                match self.backend.fetch_user(&user_id, &new_token).await {
                    Ok(user) => {
                        if !self.is_current(epoch) {
                            return Err(AuthError::Superseded);
                        }
                        self.finish_sign_in(
                            epoch,
                            user,
                            &new_token,
                            SessionMachineInput::ProfileFetched,
                        )
                        .await;
                        Ok(new_token)
                    }
                    Err(error) => {
                        warn!(error = %error, "Session could not be revalidated after refresh");
                        self.hard_logout(epoch, &SessionMachineInput::FetchRejected);
                        Err(AuthError::SessionExpired)
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, "Silent refresh failed");
                if self.is_current(epoch) {
                    self.hard_logout(epoch, &SessionMachineInput::RefreshFailed);
                }
                Err(AuthError::SessionExpired)
            }
        }
    }

    /// Re-check the stored token's expiry; flip to `Unauthenticated` when
    /// an authenticated session's token has lapsed.
    ///
    /// Reads only stored state; the watchdog never performs network I/O.
    fn watchdog_tick(&self) {
        if self.state() != SessionState::Authenticated {
            return;
        }

        let expired = self
            .store
            .is_access_token_expired(self.config.expiry_buffer_secs)
            .unwrap_or(true);
        if expired {
            info!("Access token expired, marking session unauthenticated");
            let _ = self.transition(&SessionMachineInput::ExpiryDetected);
        }
    }

    /// Spawn the expiry watchdog.
    ///
    /// The task holds only a weak reference, so dropping the manager (or
    /// calling [`SessionManager::teardown`]) stops it.
    pub fn spawn_watchdog(self: &Arc<Self>)
    where
        B: 'static,
    {
        let weak = Arc::downgrade(self);
        let period = self.config.watchdog_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                manager.watchdog_tick();
            }
        });

        if let Some(previous) = self.watchdog.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel any in-flight operation and stop the watchdog.
    pub fn teardown(&self) {
        self.begin_op();
        if let Some(handle) = self.watchdog.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl<B: AuthBackend> Drop for SessionManager<B> {
    fn drop(&mut self) {
        if let Ok(watchdog) = self.watchdog.get_mut() {
            if let Some(handle) = watchdog.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthPayload;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use client_storage::{DurableStorage, StorageResult};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// In-memory storage for testing.
    struct MemoryStorage {
        data: Mutex<HashMap<String, String>>,
    }

    impl MemoryStorage {
        fn new() -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
            }
        }
    }

    impl DurableStorage for MemoryStorage {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        fn delete(&self, key: &str) -> StorageResult<bool> {
            Ok(self.data.lock().unwrap().remove(key).is_some())
        }
    }

    /// Scripted backend: each operation pops its next result off a queue.
    #[derive(Clone, Default)]
    struct MockBackend {
        inner: Arc<MockInner>,
    }

    #[derive(Default)]
    struct MockInner {
        login_results: Mutex<VecDeque<AuthResult<AuthPayload>>>,
        register_results: Mutex<VecDeque<AuthResult<AuthPayload>>>,
        refresh_results: Mutex<VecDeque<AuthResult<String>>>,
        fetch_user_results: Mutex<VecDeque<AuthResult<User>>>,
        logout_results: Mutex<VecDeque<AuthResult<()>>>,
        fetch_gate: Mutex<Option<Arc<Notify>>>,
        refresh_calls: AtomicUsize,
        fetch_user_calls: AtomicUsize,
        logout_calls: AtomicUsize,
    }

    impl MockBackend {
        fn push_fetch(&self, result: AuthResult<User>) {
            self.inner
                .fetch_user_results
                .lock()
                .unwrap()
                .push_back(result);
        }

        fn push_refresh(&self, result: AuthResult<String>) {
            self.inner.refresh_results.lock().unwrap().push_back(result);
        }

        fn push_login(&self, result: AuthResult<AuthPayload>) {
            self.inner.login_results.lock().unwrap().push_back(result);
        }

        fn push_register(&self, result: AuthResult<AuthPayload>) {
            self.inner
                .register_results
                .lock()
                .unwrap()
                .push_back(result);
        }

        fn push_logout(&self, result: AuthResult<()>) {
            self.inner.logout_results.lock().unwrap().push_back(result);
        }

        fn gate_fetches(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.inner.fetch_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn refresh_calls(&self) -> usize {
            self.inner.refresh_calls.load(Ordering::SeqCst)
        }

        fn fetch_user_calls(&self) -> usize {
            self.inner.fetch_user_calls.load(Ordering::SeqCst)
        }

        fn logout_calls(&self) -> usize {
            self.inner.logout_calls.load(Ordering::SeqCst)
        }
    }

    fn unexpected(op: &str) -> AuthError {
        AuthError::Api(format!("unexpected {} call", op))
    }

    impl AuthBackend for MockBackend {
        async fn login(&self, _credentials: &LoginCredentials) -> AuthResult<AuthPayload> {
            self.inner
                .login_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(unexpected("login")))
        }

        async fn register(&self, _credentials: &RegisterCredentials) -> AuthResult<AuthPayload> {
            self.inner
                .register_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(unexpected("register")))
        }

        async fn refresh(&self, _refresh_token: &str) -> AuthResult<String> {
            self.inner.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .refresh_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(unexpected("refresh")))
        }

        async fn logout(&self) -> AuthResult<()> {
            self.inner.logout_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .logout_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn fetch_user(&self, _user_id: &str, _access_token: &str) -> AuthResult<User> {
            self.inner.fetch_user_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.inner.fetch_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.inner
                .fetch_user_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(unexpected("fetch_user")))
        }

        async fn avatar_url(&self, _key: &str, _access_token: &str) -> AuthResult<String> {
            Err(unexpected("avatar_url"))
        }
    }

    fn make_token(exp: Option<i64>) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#);
        let payload = match exp {
            Some(exp) => serde_json::json!({ "userId": "user-1", "exp": exp }),
            None => serde_json::json!({ "userId": "user-1" }),
        };
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.sig", header, body)
    }

    fn fresh_token() -> String {
        make_token(Some(chrono::Utc::now().timestamp() + 3600))
    }

    fn test_user(id: &str, first_name: &str) -> User {
        serde_json::from_value(serde_json::json!({ "id": id, "firstName": first_name })).unwrap()
    }

    fn auth_payload(id: &str, first_name: &str, access_token: &str) -> AuthPayload {
        serde_json::from_value(serde_json::json!({
            "user": { "id": id, "firstName": first_name },
            "accessToken": access_token,
            "refreshToken": "rt",
        }))
        .unwrap()
    }

    struct Harness {
        manager: Arc<SessionManager<MockBackend>>,
        backend: MockBackend,
        routes: Arc<Mutex<Vec<String>>>,
    }

    fn make_harness() -> Harness {
        let backend = MockBackend::default();
        let store = TokenStore::new(Box::new(MemoryStorage::new()));
        let config = SessionConfig {
            watchdog_interval: Duration::from_secs(1),
            ..SessionConfig::default()
        };
        let manager = Arc::new(SessionManager::new(store, backend.clone(), config));

        let routes = Arc::new(Mutex::new(Vec::new()));
        let recorded = routes.clone();
        manager.set_navigator(Box::new(move |route| {
            recorded.lock().unwrap().push(route.to_string());
        }));

        Harness {
            manager,
            backend,
            routes,
        }
    }

    fn seed_session(harness: &Harness, access_token: &str) {
        harness
            .manager
            .store
            .set_session(access_token, "rt", "user-1")
            .unwrap();
    }

    fn assert_auth_invariant(manager: &SessionManager<MockBackend>) {
        let snapshot = manager.snapshot();
        let token_fresh = match manager.store.access_token().unwrap() {
            Some(token) => !claims::is_token_expired(&token, manager.config.expiry_buffer_secs),
            None => false,
        };
        assert_eq!(
            snapshot.is_authenticated,
            snapshot.user.is_some() && token_fresh,
            "auth invariant violated in state {:?}",
            snapshot.state
        );
    }

    #[tokio::test]
    async fn test_init_without_credentials_is_unauthenticated() {
        let harness = make_harness();

        let state = harness.manager.init().await;

        assert_eq!(state, SessionState::Unauthenticated);
        assert_eq!(harness.backend.fetch_user_calls(), 0);
        let snapshot = harness.manager.snapshot();
        assert!(!snapshot.is_authenticated);
        assert!(!snapshot.is_loading);
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_init_restores_session() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "ExistingUser")));

        let state = harness.manager.init().await;

        assert_eq!(state, SessionState::Authenticated);
        let snapshot = harness.manager.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(!snapshot.is_loading);
        assert_eq!(
            snapshot.user.unwrap().first_name.as_deref(),
            Some("ExistingUser")
        );
        assert_eq!(
            snapshot.avatar_url,
            client_config_and_utils::DEFAULT_AVATAR_PATH
        );
        assert_eq!(harness.backend.refresh_calls(), 0);
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_init_uses_user_id_claim_when_key_absent() {
        let harness = make_harness();
        // only the access token is stored; userId comes from its claim
        harness
            .manager
            .store
            .set_access_token(&fresh_token())
            .unwrap();
        harness.manager.store.set_refresh_token("rt").unwrap();
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "FromClaim")));

        let state = harness.manager.init().await;

        assert_eq!(state, SessionState::Authenticated);
        assert_eq!(harness.backend.fetch_user_calls(), 1);
    }

    #[tokio::test]
    async fn test_init_refreshes_once_then_retries_fetch() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Err(AuthError::Api("Unauthorized".to_string())));
        harness.backend.push_refresh(Ok("new-token".to_string()));
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "RefreshedUser")));

        let state = harness.manager.init().await;

        assert_eq!(state, SessionState::Authenticated);
        assert_eq!(harness.backend.refresh_calls(), 1);
        assert_eq!(harness.backend.fetch_user_calls(), 2);
        // the refreshed access token was persisted
        assert_eq!(
            harness.manager.store.access_token().unwrap(),
            Some("new-token".to_string())
        );
        assert_eq!(
            harness
                .manager
                .snapshot()
                .user
                .unwrap()
                .first_name
                .as_deref(),
            Some("RefreshedUser")
        );
    }

    #[tokio::test]
    async fn test_init_refresh_failure_clears_everything() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Err(AuthError::Api("Unauthorized".to_string())));
        harness
            .backend
            .push_refresh(Err(AuthError::TokenRefresh("revoked".to_string())));

        let state = harness.manager.init().await;

        assert_eq!(state, SessionState::Unauthenticated);
        // exactly one refresh attempt, no second fetch
        assert_eq!(harness.backend.refresh_calls(), 1);
        assert_eq!(harness.backend.fetch_user_calls(), 1);
        // tokens cleared atomically with the user
        assert_eq!(harness.manager.store.access_token().unwrap(), None);
        assert_eq!(harness.manager.store.refresh_token().unwrap(), None);
        assert!(harness.manager.snapshot().user.is_none());
        // redirected to the login surface
        assert_eq!(harness.routes.lock().unwrap().as_slice(), ["/login"]);
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_init_second_fetch_failure_clears_everything() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Err(AuthError::Api("Unauthorized".to_string())));
        harness.backend.push_refresh(Ok("new-token".to_string()));
        harness
            .backend
            .push_fetch(Err(AuthError::Api("Still unauthorized".to_string())));

        let state = harness.manager.init().await;

        assert_eq!(state, SessionState::Unauthenticated);
        assert_eq!(harness.backend.refresh_calls(), 1);
        assert_eq!(harness.backend.fetch_user_calls(), 2);
        assert_eq!(harness.manager.store.access_token().unwrap(), None);
        assert_eq!(harness.routes.lock().unwrap().as_slice(), ["/login"]);
    }

    #[tokio::test]
    async fn test_login_success_persists_and_navigates() {
        let harness = make_harness();
        harness.manager.init().await;
        harness
            .backend
            .push_login(Ok(auth_payload("1", "A", &fresh_token())));

        let credentials = LoginCredentials {
            email: "a@b.com".to_string(),
            password: "Secret123".to_string(),
        };
        let user = harness.manager.login(&credentials).await.unwrap();

        assert_eq!(user.first_name.as_deref(), Some("A"));
        let snapshot = harness.manager.snapshot();
        assert!(snapshot.is_authenticated);
        assert_eq!(snapshot.state, SessionState::Authenticated);
        assert_eq!(harness.manager.store.user_id().unwrap().as_deref(), Some("1"));
        assert_eq!(
            harness.manager.store.refresh_token().unwrap().as_deref(),
            Some("rt")
        );
        assert_eq!(harness.routes.lock().unwrap().as_slice(), ["/dashboard"]);
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_login_failure_leaves_session_unchanged() {
        let harness = make_harness();
        harness.manager.init().await;
        harness
            .backend
            .push_login(Err(AuthError::InvalidCredentials(
                "Invalid email or password.".to_string(),
            )));

        let credentials = LoginCredentials {
            email: "a@b.com".to_string(),
            password: "wrong".to_string(),
        };
        let error = harness.manager.login(&credentials).await.unwrap_err();

        assert_eq!(error.user_message(), "Invalid email or password.");
        let snapshot = harness.manager.snapshot();
        assert!(!snapshot.is_authenticated);
        assert!(snapshot.user.is_none());
        assert_eq!(snapshot.state, SessionState::Unauthenticated);
        assert_eq!(harness.manager.store.access_token().unwrap(), None);
        assert!(harness.routes.lock().unwrap().is_empty());
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_register_success() {
        let harness = make_harness();
        harness.manager.init().await;
        harness
            .backend
            .push_register(Ok(auth_payload("2", "NewUser", &fresh_token())));

        let credentials: RegisterCredentials = serde_json::from_value(serde_json::json!({
            "email": "new@b.com",
            "password": "Secret123",
            "firstName": "NewUser",
            "lastName": "L",
            "gender": "F",
            "country": "Netherlands",
            "contact": "0600000000",
        }))
        .unwrap();
        let user = harness.manager.register(&credentials).await.unwrap();

        assert_eq!(user.first_name.as_deref(), Some("NewUser"));
        assert!(harness.manager.snapshot().is_authenticated);
        assert_eq!(harness.routes.lock().unwrap().as_slice(), ["/dashboard"]);
    }

    #[tokio::test]
    async fn test_logout_clears_locally_even_when_backend_fails() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "User")));
        harness.manager.init().await;
        assert!(harness.manager.snapshot().is_authenticated);

        harness
            .backend
            .push_logout(Err(AuthError::Api("network down".to_string())));
        harness.manager.logout().await;

        assert_eq!(harness.backend.logout_calls(), 1);
        let snapshot = harness.manager.snapshot();
        assert_eq!(snapshot.state, SessionState::Unauthenticated);
        assert!(snapshot.user.is_none());
        assert!(!snapshot.is_authenticated);
        assert_eq!(
            snapshot.avatar_url,
            client_config_and_utils::DEFAULT_AVATAR_PATH
        );
        assert_eq!(harness.manager.store.access_token().unwrap(), None);
        assert_eq!(harness.manager.store.refresh_token().unwrap(), None);
        assert_eq!(harness.manager.store.user_id().unwrap(), None);
        assert_eq!(harness.routes.lock().unwrap().last().unwrap(), "/login");
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_cancelled_init_applies_no_mutation() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        let gate = harness.backend.gate_fetches();
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "LateUser")));

        let manager = harness.manager.clone();
        let task = tokio::spawn(async move { manager.init().await });

        // let the initializer reach the gated profile fetch
        while harness.backend.fetch_user_calls() == 0 {
            tokio::task::yield_now().await;
        }

        // unmount: cancel the in-flight initialization
        harness.manager.teardown();
        gate.notify_one();
        task.await.unwrap();

        // no mutation landed after cancellation
        let snapshot = harness.manager.snapshot();
        assert!(snapshot.user.is_none());
        assert!(snapshot.is_loading, "cancelled init must not settle loading");
        assert!(harness
            .manager
            .store
            .access_token()
            .unwrap()
            .is_some(), "stored tokens must be untouched");
        assert!(harness.routes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_during_init_wins() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        let gate = harness.backend.gate_fetches();
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "LateUser")));

        let manager = harness.manager.clone();
        let task = tokio::spawn(async move { manager.init().await });
        while harness.backend.fetch_user_calls() == 0 {
            tokio::task::yield_now().await;
        }

        harness.manager.logout().await;
        gate.notify_one();
        task.await.unwrap();

        // the late-resolving initializer must not re-authenticate
        let snapshot = harness.manager.snapshot();
        assert_eq!(snapshot.state, SessionState::Unauthenticated);
        assert!(snapshot.user.is_none());
        assert!(!snapshot.is_authenticated);
        assert_eq!(harness.manager.store.access_token().unwrap(), None);
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_login_during_init_wins() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        let gate = harness.backend.gate_fetches();
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "StaleUser")));
        harness
            .backend
            .push_login(Ok(auth_payload("user-2", "FreshUser", &fresh_token())));

        let manager = harness.manager.clone();
        let task = tokio::spawn(async move { manager.init().await });
        while harness.backend.fetch_user_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let credentials = LoginCredentials {
            email: "fresh@b.com".to_string(),
            password: "Secret123".to_string(),
        };
        harness.manager.login(&credentials).await.unwrap();
        gate.notify_one();
        task.await.unwrap();

        // the direct user action's result survives
        let snapshot = harness.manager.snapshot();
        assert_eq!(
            snapshot.user.unwrap().first_name.as_deref(),
            Some("FreshUser")
        );
        assert_eq!(
            harness.manager.store.user_id().unwrap().as_deref(),
            Some("user-2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_flips_expired_session_without_network() {
        let harness = make_harness();
        // expires 30s out; with the 60s buffer it is already past the line
        seed_session(
            &harness,
            &make_token(Some(chrono::Utc::now().timestamp() + 30)),
        );
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "TimerUser")));

        let state = harness.manager.init().await;
        assert_eq!(state, SessionState::Authenticated);
        // derived truth already reflects the lapsed token
        assert!(!harness.manager.snapshot().is_authenticated);
        assert_auth_invariant(&harness.manager);

        let fetches_before = harness.backend.fetch_user_calls();
        let refreshes_before = harness.backend.refresh_calls();

        harness.manager.spawn_watchdog();
        // let the watchdog task start and arm its interval before advancing
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(Duration::from_millis(1500)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(harness.manager.state(), SessionState::Unauthenticated);
        // flip-only policy: no network traffic from the timer
        assert_eq!(harness.backend.fetch_user_calls(), fetches_before);
        assert_eq!(harness.backend.refresh_calls(), refreshes_before);
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_watchdog_leaves_fresh_session_alone() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "User")));
        harness.manager.init().await;

        harness.manager.watchdog_tick();

        assert_eq!(harness.manager.state(), SessionState::Authenticated);
        assert!(harness.manager.snapshot().is_authenticated);
    }

    #[tokio::test]
    async fn test_state_callback_fires_on_transitions() {
        let harness = make_harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        harness
            .manager
            .set_state_callback(Box::new(move |snapshot| {
                sink.lock().unwrap().push(snapshot.state);
            }));

        harness.manager.init().await;

        let states = seen.lock().unwrap().clone();
        assert_eq!(
            states,
            vec![SessionState::Initializing, SessionState::Unauthenticated]
        );
    }

    #[tokio::test]
    async fn test_valid_access_token_returns_fresh_token_directly() {
        let harness = make_harness();
        let token = fresh_token();
        seed_session(&harness, &token);
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "User")));
        harness.manager.init().await;

        let got = harness.manager.valid_access_token().await.unwrap();
        assert_eq!(got, token);
        assert_eq!(harness.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_valid_access_token_refreshes_expired_token() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "User")));
        harness.manager.init().await;

        // the token lapses while the tab sits open
        harness
            .manager
            .store
            .set_access_token(&make_token(Some(chrono::Utc::now().timestamp() - 10)))
            .unwrap();
        harness.backend.push_refresh(Ok(fresh_token()));
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "User")));

        let got = harness.manager.valid_access_token().await.unwrap();

        assert_eq!(harness.backend.refresh_calls(), 1);
        assert_eq!(
            harness.manager.store.access_token().unwrap(),
            Some(got.clone())
        );
        assert_eq!(harness.manager.state(), SessionState::Authenticated);
        assert!(harness.manager.snapshot().is_authenticated);
    }

    #[tokio::test]
    async fn test_valid_access_token_failed_refresh_is_terminal() {
        let harness = make_harness();
        seed_session(&harness, &fresh_token());
        harness
            .backend
            .push_fetch(Ok(test_user("user-1", "User")));
        harness.manager.init().await;

        harness
            .manager
            .store
            .set_access_token(&make_token(Some(chrono::Utc::now().timestamp() - 10)))
            .unwrap();
        harness
            .backend
            .push_refresh(Err(AuthError::TokenRefresh("revoked".to_string())));

        let error = harness.manager.valid_access_token().await.unwrap_err();

        assert!(matches!(error, AuthError::SessionExpired));
        assert_eq!(harness.manager.state(), SessionState::Unauthenticated);
        assert_eq!(harness.manager.store.access_token().unwrap(), None);
        assert_eq!(harness.routes.lock().unwrap().last().unwrap(), "/login");
        assert_auth_invariant(&harness.manager);
    }

    #[tokio::test]
    async fn test_valid_access_token_without_session() {
        let harness = make_harness();
        harness.manager.init().await;

        let error = harness.manager.valid_access_token().await.unwrap_err();
        assert!(matches!(error, AuthError::NotLoggedIn));
    }
}
