//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - Connection negotiation and teardown through `SessionTransport`
//! - The session state machine and its single event loop
//! - Slot extraction from patient transcriptions
//! - At-most-once transcript persistence and the end-of-session summary

mod config;
mod session;
mod state;
mod stats;

pub use config::{SessionConfig, DEFAULT_GREETING};
pub use session::{SessionUpdate, VoiceSession};
pub use state::{next_state, SessionEvent, SessionState};
pub use stats::SessionStats;
