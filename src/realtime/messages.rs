use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ITEM_CREATE: &str = "conversation.item.create";
pub const RESPONSE_CREATE: &str = "response.create";
pub const ITEM_CREATED: &str = "conversation.item.created";
pub const TRANSCRIPTION_COMPLETED: &str = "conversation.item.input_audio_transcription.completed";
pub const TRANSCRIPTION_FAILED: &str = "conversation.item.input_audio_transcription.failed";
pub const ERROR: &str = "error";
pub const RESPONSE_DONE: &str = "response.done";
pub const AUDIO_TRANSCRIPT_DONE: &str = "response.audio_transcript.done";

/// One part of a conversation item's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// A conversation item as carried by `conversation.item.*` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A user message carrying typed text
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: Some("message".to_string()),
            role: Some("user".to_string()),
            content: vec![ContentPart {
                kind: "input_text".to_string(),
                text: Some(text.into()),
                transcript: None,
            }],
        }
    }

    /// Text of the first content part, if it has any
    pub fn first_text(&self) -> Option<&str> {
        self.content
            .first()
            .and_then(|part| part.text.as_deref())
            .filter(|text| !text.trim().is_empty())
    }

    pub fn role_is(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }
}

/// Events this client sends over the data channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Ask the agent to respond. Submitted items never trigger a reply on their own.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Error detail attached to `error` and `transcription.failed` events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorDetail {
    pub message: Option<String>,
    /// String or numeric codes both land here as text
    pub code: Option<String>,
}

impl ErrorDetail {
    /// Each field is read on its own so an odd sibling never hides the message
    fn from_event(value: &Value) -> Self {
        let message = value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string);
        let code = match value.pointer("/error/code") {
            Some(Value::String(code)) => Some(code.clone()),
            Some(Value::Number(code)) => Some(code.to_string()),
            _ => None,
        };
        Self { message, code }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ItemPayload {
    #[serde(default)]
    item: Option<ConversationItem>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptPayload {
    #[serde(default)]
    transcript: Option<String>,
}

/// Events received from the agent, narrowed to the kinds the engine reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ItemCreated { item: Option<ConversationItem> },
    TranscriptionCompleted { transcript: String },
    TranscriptionFailed { error: ErrorDetail },
    Error { error: ErrorDetail },
    ResponseDone,
    AudioTranscriptDone { transcript: String },
    Unknown { kind: String },
}

fn payload<T: DeserializeOwned + Default>(value: &Value) -> T {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

impl ServerEvent {
    /// Classify a parsed message by its `type` discriminator.
    ///
    /// Known kinds with unexpected field shapes degrade to empty payloads
    /// rather than failing.
    pub fn from_value(value: &Value) -> Self {
        let kind = event_type(value).unwrap_or_default();
        match kind {
            ITEM_CREATED => ServerEvent::ItemCreated {
                item: payload::<ItemPayload>(value).item,
            },
            TRANSCRIPTION_COMPLETED => ServerEvent::TranscriptionCompleted {
                transcript: payload::<TranscriptPayload>(value)
                    .transcript
                    .unwrap_or_default(),
            },
            TRANSCRIPTION_FAILED => ServerEvent::TranscriptionFailed {
                error: ErrorDetail::from_event(value),
            },
            ERROR => ServerEvent::Error {
                error: ErrorDetail::from_event(value),
            },
            RESPONSE_DONE => ServerEvent::ResponseDone,
            AUDIO_TRANSCRIPT_DONE => ServerEvent::AudioTranscriptDone {
                transcript: payload::<TranscriptPayload>(value)
                    .transcript
                    .unwrap_or_default(),
            },
            other => ServerEvent::Unknown {
                kind: other.to_string(),
            },
        }
    }
}

/// The `type` discriminator of a raw message
pub fn event_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}
