use std::time::Duration;

use crate::extract::{Slot, DEFAULT_LAYOUT};
use crate::realtime::PrimingConfig;

pub const DEFAULT_GREETING: &str = "Hello, I'm ready to talk. Please help me get started.";

/// Per-session behaviour of the voice engine
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "intake-6f1c...")
    pub session_id: String,

    /// Prompt sent as the first user message once the channel opens
    pub greeting: String,

    /// Delay between channel open and the greeting
    /// Default: 600ms
    pub greeting_delay: Duration,

    /// How long sends are suppressed after a rate-limited transcription
    /// Default: 15 seconds
    pub rate_limit_cooldown: Duration,

    pub slot_layout: Vec<Slot>,

    /// Replace the greeting with a patient-context grounding message
    pub priming: Option<PrimingConfig>,

    /// Bearer token for the patient data endpoint
    pub api_token: Option<String>,

    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("intake-{}", uuid::Uuid::new_v4()),
            greeting: DEFAULT_GREETING.to_string(),
            greeting_delay: Duration::from_millis(600),
            rate_limit_cooldown: Duration::from_millis(15_000),
            slot_layout: DEFAULT_LAYOUT.to_vec(),
            priming: None,
            api_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}
