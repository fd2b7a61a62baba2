//! Outbound sends and inbound dispatch over the data channel
//!
//! Every message that crosses the channel is appended to the `EventLog` in
//! send/receipt order; that log is the single source for transcripts,
//! summaries and persistence.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::log::{Direction, EventLog};
use super::messages::{ClientEvent, ConversationItem, ServerEvent};
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink};
use crate::error::{ConnectionError, TranscriptionError};
use crate::transport::DataChannel;

pub const DEFAULT_RATE_LIMIT_COOLDOWN_MS: i64 = 15_000;

/// Result of an outbound send
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    /// No channel, or the channel is not open. Nothing was logged.
    NotOpen,
    /// Suppressed by the transcription cooldown. Nothing was logged.
    RateLimited { until: DateTime<Utc> },
    /// Logged, but the channel rejected the write
    Failed(ConnectionError),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// What an inbound message meant to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Assistant text to show as the current message
    AssistantMessage(String),
    /// Completed patient transcription; drives slot extraction
    Transcription(String),
    TranscriptionFailed(TranscriptionError),
    /// Remote `error` event; non-fatal
    RemoteError(String),
    ResponseDone,
    /// Final transcript of the assistant's spoken reply
    AssistantTranscript(String),
    /// Logged but otherwise unhandled
    Ignored(String),
    /// Not valid JSON; not logged
    Malformed(String),
}

pub struct EventStream {
    channel: Option<Arc<dyn DataChannel>>,
    log: EventLog,
    rate_limited_until: Option<DateTime<Utc>>,
    cooldown: Duration,
    current_message: Option<String>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

fn display_timestamp(now: DateTime<Utc>) -> String {
    now.format("%H:%M:%S").to_string()
}

impl EventStream {
    pub fn new(cooldown: std::time::Duration, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            channel: None,
            log: EventLog::new(),
            rate_limited_until: None,
            cooldown: Duration::from_std(cooldown)
                .unwrap_or_else(|_| Duration::milliseconds(DEFAULT_RATE_LIMIT_COOLDOWN_MS)),
            current_message: None,
            diagnostics,
        }
    }

    pub fn attach(&mut self, channel: Arc<dyn DataChannel>) {
        self.channel = Some(channel);
    }

    pub fn detach(&mut self) -> Option<Arc<dyn DataChannel>> {
        self.channel.take()
    }

    pub fn is_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    /// Forget everything from a previous session
    pub fn reset(&mut self) {
        self.channel = None;
        self.log.clear();
        self.rate_limited_until = None;
        self.current_message = None;
    }

    /// A new channel opened: the log starts empty
    pub fn on_open(&mut self) {
        self.log.clear();
        self.current_message = None;
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn current_message(&self) -> Option<&str> {
        self.current_message.as_deref()
    }

    pub fn rate_limited_until(&self) -> Option<DateTime<Utc>> {
        self.rate_limited_until
    }

    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.rate_limited_until.is_some_and(|until| now < until)
    }

    pub async fn send(&mut self, event: ClientEvent) -> SendOutcome {
        self.send_at(event, Utc::now()).await
    }

    pub async fn send_at(&mut self, event: ClientEvent, now: DateTime<Utc>) -> SendOutcome {
        match serde_json::to_value(&event) {
            Ok(value) => self.send_value_at(value, now).await,
            Err(e) => SendOutcome::Failed(ConnectionError::Channel(e.to_string())),
        }
    }

    /// Send an arbitrary JSON object, adding `event_id` and `timestamp` if absent
    pub async fn send_value_at(&mut self, mut value: Value, now: DateTime<Utc>) -> SendOutcome {
        let channel = match &self.channel {
            Some(channel) if channel.is_open() => Arc::clone(channel),
            _ => return SendOutcome::NotOpen,
        };
        if let Some(until) = self.rate_limited_until.filter(|until| now < *until) {
            debug!("Send suppressed until {}", until);
            return SendOutcome::RateLimited { until };
        }

        if let Some(obj) = value.as_object_mut() {
            obj.entry("event_id")
                .or_insert_with(|| json!(format!("evt_{}", Uuid::new_v4().simple())));
            obj.entry("timestamp")
                .or_insert_with(|| json!(display_timestamp(now)));
        }

        let text = value.to_string();
        self.log.push(Direction::Outbound, now, value.clone());
        self.diagnostics
            .emit(DiagnosticEvent::new(DiagnosticKind::Outbound, value));

        match channel.send_text(text).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!("Data channel send failed: {}", e);
                SendOutcome::Failed(e)
            }
        }
    }

    /// Submit typed text as a user message and ask for a response. The
    /// response request is only sent when the message went out.
    pub async fn send_user_text(&mut self, text: &str) -> SendOutcome {
        self.send_user_text_at(text, Utc::now()).await
    }

    pub async fn send_user_text_at(&mut self, text: &str, now: DateTime<Utc>) -> SendOutcome {
        let item = ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        };
        let outcome = self.send_at(item, now).await;
        if !outcome.is_sent() {
            return outcome;
        }
        self.send_at(ClientEvent::ResponseCreate, now).await
    }

    pub fn dispatch(&mut self, raw: &str) -> Dispatch {
        self.dispatch_at(raw, Utc::now())
    }

    pub fn dispatch_at(&mut self, raw: &str, now: DateTime<Utc>) -> Dispatch {
        let mut value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                self.diagnostics.emit(DiagnosticEvent::new(
                    DiagnosticKind::Malformed,
                    json!({ "error": e.to_string(), "raw": raw }),
                ));
                return Dispatch::Malformed(e.to_string());
            }
        };

        if let Some(obj) = value.as_object_mut() {
            obj.entry("timestamp")
                .or_insert_with(|| json!(display_timestamp(now)));
        }

        let event = ServerEvent::from_value(&value);
        self.log.push(Direction::Inbound, now, value.clone());
        self.diagnostics
            .emit(DiagnosticEvent::new(DiagnosticKind::Inbound, value));

        match event {
            ServerEvent::ItemCreated { item: Some(item) } if item.role_is("assistant") => {
                match item.first_text() {
                    Some(text) => {
                        let text = text.trim().to_string();
                        self.current_message = Some(text.clone());
                        Dispatch::AssistantMessage(text)
                    }
                    None => Dispatch::Ignored(super::messages::ITEM_CREATED.to_string()),
                }
            }
            ServerEvent::ItemCreated { .. } => Dispatch::Ignored(super::messages::ITEM_CREATED.to_string()),
            ServerEvent::TranscriptionCompleted { transcript } => Dispatch::Transcription(transcript.trim().to_string()),
            ServerEvent::TranscriptionFailed { error } => {
                let message = error
                    .message
                    .unwrap_or_else(|| "Audio transcription failed".to_string());
                let error = TranscriptionError::from_message(message);
                if matches!(error, TranscriptionError::RateLimited(_)) {
                    let until = now + self.cooldown;
                    warn!("Transcription rate limited; pausing sends until {}", until);
                    self.rate_limited_until = Some(until);
                }
                Dispatch::TranscriptionFailed(error)
            }
            ServerEvent::Error { error } => {
                Dispatch::RemoteError(error.message.unwrap_or_else(|| "Realtime error".to_string()))
            }
            ServerEvent::ResponseDone => Dispatch::ResponseDone,
            ServerEvent::AudioTranscriptDone { transcript } => {
                Dispatch::AssistantTranscript(transcript.trim().to_string())
            }
            ServerEvent::Unknown { kind } => Dispatch::Ignored(kind),
        }
    }
}
