use crate::persistence::HttpTranscriptStore;
use crate::session::VoiceSession;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single voice session this process drives
    pub session: Arc<VoiceSession>,

    /// Backend client for symptom records
    pub symptoms: Arc<HttpTranscriptStore>,
}

impl AppState {
    pub fn new(session: Arc<VoiceSession>, symptoms: Arc<HttpTranscriptStore>) -> Self {
        Self { session, symptoms }
    }
}
