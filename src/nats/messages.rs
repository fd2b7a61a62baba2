use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session update published to NATS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdateMessage {
    pub session_id: String,
    /// Same as the last subject token, e.g. `slots`
    pub kind: String,
    pub timestamp: String, // RFC3339 timestamp
    /// The update itself, tagged by `kind`
    pub payload: Value,
}

/// Diagnostic event published to NATS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub session_id: String,
    pub kind: String,
    pub timestamp: String,
    pub detail: Value,
}

/// Subject for one kind of session message: `voice.session.<id>.<kind>`
pub fn session_subject(session_id: &str, kind: &str) -> String {
    format!("voice.session.{}.{}", session_id, kind)
}
