use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::{
    event_type, AUDIO_TRANSCRIPT_DONE, ITEM_CREATE, ITEM_CREATED,
    TRANSCRIPTION_COMPLETED,
};

/// Prefix of the synthetic grounding message sent in context-priming sessions
pub const CONTEXT_MARKER: &str = "PATIENT_CONTEXT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One message exactly as sent or received over the data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub direction: Direction,
    /// Send time for outbound, receipt time for inbound
    pub at: DateTime<Utc>,
    pub payload: Value,
}

impl RawEvent {
    pub fn kind(&self) -> &str {
        event_type(&self.payload).unwrap_or_default()
    }
}

/// Speaker of a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Assistant,
}

/// A role-attributed utterance derived from the raw log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub role: Role,
    pub text: String,
    pub source_event_type: String,
    pub timestamp: DateTime<Utc>,
}

/// The `{role, text}` shape sent to the persistence endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub text: String,
}

impl From<&TranscriptEvent> for ConversationMessage {
    fn from(event: &TranscriptEvent) -> Self {
        Self {
            role: event.role,
            text: event.text.clone(),
        }
    }
}

fn item_text<'a>(payload: &'a Value, roles: &[&str]) -> Option<&'a str> {
    let item = payload.get("item")?;
    let role = item.get("role")?.as_str()?;
    if !roles.iter().any(|r| *r == role) {
        return None;
    }
    item.get("content")?.get(0)?.get("text")?.as_str()
}

/// Attribute a raw message to a speaker, if it carries a conversational turn.
///
/// | direction | type | role |
/// |---|---|---|
/// | inbound | `input_audio_transcription.completed` | patient |
/// | inbound | `conversation.item.created` (assistant, text) | assistant |
/// | inbound | `response.audio_transcript.done` | assistant |
/// | outbound | `conversation.item.create` (user, text) | patient |
///
/// Blank text and context-priming messages yield nothing.
pub fn transcript_turn(entry: &RawEvent) -> Option<TranscriptEvent> {
    let kind = entry.kind();
    let (role, text) = match (entry.direction, kind) {
        (Direction::Inbound, TRANSCRIPTION_COMPLETED) | (Direction::Inbound, AUDIO_TRANSCRIPT_DONE) => {
            let role = if kind == TRANSCRIPTION_COMPLETED {
                Role::Patient
            } else {
                Role::Assistant
            };
            (role, entry.payload.get("transcript")?.as_str()?)
        }
        (Direction::Inbound, ITEM_CREATED) => {
            (Role::Assistant, item_text(&entry.payload, &["assistant"])?)
        }
        (Direction::Outbound, ITEM_CREATE) => {
            (Role::Patient, item_text(&entry.payload, &["user", "patient"])?)
        }
        _ => return None,
    };

    let text = text.trim();
    if text.is_empty() || text.starts_with(CONTEXT_MARKER) {
        return None;
    }

    Some(TranscriptEvent {
        role,
        text: text.to_string(),
        source_event_type: kind.to_string(),
        timestamp: entry.at,
    })
}

/// Append-only, chronological log of every message on the data channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    entries: Vec<RawEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<RawEvent>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, direction: Direction, at: DateTime<Utc>, payload: Value) {
        self.entries.push(RawEvent {
            direction,
            at,
            payload,
        });
    }

    /// Drop every entry. Only used when a new channel opens.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[RawEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Role-attributed turns in log order
    pub fn transcript(&self) -> Vec<TranscriptEvent> {
        self.entries.iter().filter_map(transcript_turn).collect()
    }

    /// Turns reduced to the persisted `{role, text}` shape
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.transcript().iter().map(ConversationMessage::from).collect()
    }
}
