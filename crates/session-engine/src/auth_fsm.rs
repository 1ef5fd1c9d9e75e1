//! Session state machine using rust-fsm.
//!
//! The FSM makes the session lifecycle explicit instead of deriving it
//! from storage checks, and it encodes the refresh contract structurally:
//! `RetryingFetch` has no edge back to `Refreshing`, so one
//! initialization cycle can never refresh more than once.
//!
//! ## State Diagram
//!
//! ```text
//! ┌──────────────┐ ValidateSession ┌──────────────┐ ProfileFetched ┌───────────────┐
//! │   Unknown    │ ──────────────► │ Initializing │ ─────────────► │ Authenticated │
//! └──────┬───────┘                 └──────┬───────┘                └───┬───────┬───┘
//!        │ NoSession                      │ FetchRejected              │       │
//!        ▼                                ▼                            │       │ LogoutRequested
//! ┌──────────────┐ RefreshFailed  ┌──────────────┐     ExpiryDetected │       ▼
//! │Unauthenticated│◄───────────── │  Refreshing  │ ◄── TokenExpired ──┘  LoggingOut
//! └──┬───────┬───┘                └──────┬───────┘
//!    │       │ LoginAttempt /            │ RefreshSucceeded
//!    │       │ RegisterAttempt           ▼
//!    │       ▼                   ┌──────────────┐ ProfileFetched ► Authenticated
//!    │  LoggingIn / Registering  │ RetryingFetch│ FetchRejected  ► Unauthenticated
//!    │                           └──────────────┘
//!    └ ValidateSession ► Initializing
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

// Define the FSM using rust-fsm's declarative macro
// This generates a module `session_machine` with:
// - session_machine::State (enum)
// - session_machine::Input (enum)
// - session_machine::StateMachine (type alias)
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unknown)

    Unknown => {
        ValidateSession => Initializing,
        NoSession => Unauthenticated,
        LoginAttempt => LoggingIn,
        RegisterAttempt => Registering,
        Interrupted => Unauthenticated
    },
    Initializing => {
        ProfileFetched => Authenticated,
        FetchRejected => Refreshing,
        NoSession => Unauthenticated,
        Interrupted => Unauthenticated
    },
    Refreshing => {
        RefreshSucceeded => RetryingFetch,
        RefreshFailed => Unauthenticated,
        Interrupted => Unauthenticated
    },
    RetryingFetch => {
        // Deliberately no edge back to Refreshing: one refresh per cycle.
        ProfileFetched => Authenticated,
        FetchRejected => Unauthenticated,
        Interrupted => Unauthenticated
    },
    Authenticated => {
        LogoutRequested => LoggingOut,
        ExpiryDetected => Unauthenticated,
        TokenExpired => Refreshing
    },
    Unauthenticated => {
        ValidateSession => Initializing,
        LoginAttempt => LoggingIn,
        RegisterAttempt => Registering
    },
    LoggingIn => {
        LoginSucceeded => Authenticated,
        LoginFailed => Unauthenticated,
        Interrupted => Unauthenticated
    },
    Registering => {
        RegisterSucceeded => Authenticated,
        RegisterFailed => Unauthenticated,
        Interrupted => Unauthenticated
    },
    LoggingOut => {
        LogoutComplete => Unauthenticated,
        Interrupted => Unauthenticated
    }
}

// Re-export the generated types with clearer names
pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// User-friendly session state for external consumption.
///
/// This is a simplified view of the FSM state for route guards and UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session not yet reconstructed (startup).
    Unknown,
    /// Reconstructing the session from stored credentials.
    Initializing,
    /// Exchanging the refresh token for a new access token.
    Refreshing,
    /// Re-fetching the profile with a freshly refreshed token.
    RetryingFetch,
    /// Signed in with a fetched profile.
    Authenticated,
    /// No valid session.
    Unauthenticated,
    /// Login request in flight.
    LoggingIn,
    /// Registration request in flight.
    Registering,
    /// Logout in flight.
    LoggingOut,
}

impl SessionState {
    /// Returns true if the user has a valid session (Authenticated only).
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    /// Returns true if the state is a transient/in-progress state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionState::Initializing
                | SessionState::Refreshing
                | SessionState::RetryingFetch
                | SessionState::LoggingIn
                | SessionState::Registering
                | SessionState::LoggingOut
        )
    }

    /// Returns true while a session-mutating operation is unsettled.
    ///
    /// `Unknown` counts: the app has not yet learned whether stored
    /// credentials are usable.
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Unknown) || self.is_transient()
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unknown => SessionState::Unknown,
            SessionMachineState::Initializing => SessionState::Initializing,
            SessionMachineState::Refreshing => SessionState::Refreshing,
            SessionMachineState::RetryingFetch => SessionState::RetryingFetch,
            SessionMachineState::Authenticated => SessionState::Authenticated,
            SessionMachineState::Unauthenticated => SessionState::Unauthenticated,
            SessionMachineState::LoggingIn => SessionState::LoggingIn,
            SessionMachineState::Registering => SessionState::Registering,
            SessionMachineState::LoggingOut => SessionState::LoggingOut,
        }
    }
}
