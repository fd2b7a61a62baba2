use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Ended,
    Error,
}

impl SessionState {
    /// Negotiating or live
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything that can move the session between states
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StartRequested,
    /// Negotiation finished; waiting for the data channel to open
    Connected,
    StartFailed(ConnectionError),
    ChannelOpened,
    ChannelMessage(String),
    ChannelClosed,
    ChannelError(String),
    GreetingDue,
    StopRequested,
    /// Host is discarding the session
    Teardown,
}

/// Transition table. Events that do not apply in a state leave it unchanged.
pub fn next_state(state: SessionState, event: &SessionEvent) -> SessionState {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Idle | S::Ended | S::Error, E::StartRequested) => S::Connecting,
        (S::Connecting | S::Active, E::StartRequested) => state,

        (S::Connecting, E::Connected) => S::Connecting,
        (S::Connecting, E::StartFailed(ConnectionError::Cancelled)) => S::Ended,
        (S::Connecting, E::StartFailed(_)) => S::Error,
        (S::Connecting | S::Active, E::ChannelOpened) => S::Active,

        (S::Connecting | S::Active, E::ChannelClosed) => S::Ended,
        (S::Connecting | S::Active, E::ChannelError(_)) => S::Error,
        (S::Connecting | S::Active, E::StopRequested | E::Teardown) => S::Ended,

        (_, E::ChannelMessage(_) | E::GreetingDue) => state,
        (S::Idle | S::Active | S::Ended | S::Error, E::Connected | E::StartFailed(_)) => state,
        (S::Idle | S::Ended | S::Error, E::ChannelOpened | E::ChannelClosed | E::ChannelError(_)) => state,
        (S::Idle | S::Ended | S::Error, E::StopRequested | E::Teardown) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = SessionState::Idle;
        for (event, expected) in [
            (SessionEvent::StartRequested, SessionState::Connecting),
            (SessionEvent::Connected, SessionState::Connecting),
            (SessionEvent::ChannelOpened, SessionState::Active),
            (SessionEvent::ChannelMessage("{}".into()), SessionState::Active),
            (SessionEvent::GreetingDue, SessionState::Active),
            (SessionEvent::StopRequested, SessionState::Ended),
            (SessionEvent::ChannelClosed, SessionState::Ended),
        ] {
            state = next_state(state, &event);
            assert_eq!(state, expected, "after {:?}", event);
        }
    }

    #[test]
    fn test_failures() {
        let failed = SessionEvent::StartFailed(ConnectionError::Credential("no key".into()));
        assert_eq!(next_state(SessionState::Connecting, &failed), SessionState::Error);
        assert_eq!(
            next_state(SessionState::Connecting, &SessionEvent::StartFailed(ConnectionError::Cancelled)),
            SessionState::Ended
        );
        assert_eq!(
            next_state(SessionState::Active, &SessionEvent::ChannelError("reset".into())),
            SessionState::Error
        );
        assert_eq!(next_state(SessionState::Error, &SessionEvent::StartRequested), SessionState::Connecting);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        assert_eq!(next_state(SessionState::Idle, &SessionEvent::StopRequested), SessionState::Idle);
        assert_eq!(next_state(SessionState::Idle, &SessionEvent::Teardown), SessionState::Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert!(SessionState::Active.is_running());
        assert!(!SessionState::Ended.is_running());
    }
}
