//! Session engine for the Commons client.
//!
//! This crate provides:
//! - Explicit FSM-based session state management
//! - Session reconstruction on startup with a single silent token refresh
//! - Login, registration, and offline-resilient logout
//! - An expiry watchdog that keeps `is_authenticated` truthful between
//!   API calls
//! - Avatar presigned-URL resolution with a bounded timeout

mod api;
mod auth_fsm;
mod avatar;
mod error;
mod session;

pub use api::{
    ApiClient, AuthBackend, AuthPayload, LoginCredentials, RegisterCredentials, User,
};
pub use auth_fsm::session_machine;
pub use auth_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionState};
pub use avatar::{looks_like_url, resolve_avatar_url};
pub use error::{AuthError, AuthResult};
pub use session::{
    NavigateCallback, SessionCallback, SessionConfig, SessionManager, SessionSnapshot,
};
