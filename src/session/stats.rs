use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Point-in-time view of a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub state: SessionState,

    /// When the current session was started, if ever
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start, frozen once the session ends
    pub duration_secs: f64,

    /// Role-attributed transcript turns so far
    pub turns: usize,

    /// Raw data channel messages logged so far
    pub raw_events: usize,

    /// Sends are suppressed until this instant
    pub rate_limited_until: Option<DateTime<Utc>>,

    /// The transcript save has been claimed for this session
    pub has_saved: bool,

    /// Latest assistant text
    pub current_message: Option<String>,

    pub last_error: Option<String>,
}
