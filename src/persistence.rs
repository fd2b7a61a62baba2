//! At-most-once transcript persistence
//!
//! Every way a session can end (explicit stop, remote close, channel error,
//! teardown) funnels into `PersistenceGuard::save`; only the first call per
//! session reaches the store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::PersistenceError;
use crate::extract::{SlotSnapshot, SymptomType};
use crate::realtime::{ConversationMessage, EventLog};

pub const REASON_ENDED_BY_USER: &str = "ended-by-user";
pub const REASON_CHANNEL_CLOSED: &str = "channel-closed";
pub const REASON_CHANNEL_ERROR: &str = "channel-error";
pub const REASON_TEARDOWN: &str = "teardown";

/// Body of `POST /conversations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub messages: Vec<ConversationMessage>,
    pub reason: String,
}

/// Body of `POST /patient/symptoms`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomRecord {
    #[serde(rename = "type")]
    pub symptom_type: SymptomType,
    pub description: String,
    pub severity: u8,
    pub notes: String,
}

impl From<&SlotSnapshot> for SymptomRecord {
    fn from(slots: &SlotSnapshot) -> Self {
        let description = match (slots.symptom_name.is_empty(), slots.description.is_empty()) {
            (false, false) => format!("{} - {}", slots.symptom_name, slots.description),
            (false, true) => slots.symptom_name.clone(),
            _ => slots.description.clone(),
        };
        let symptom_type = match slots.symptom_type {
            SymptomType::Unset => SymptomType::Physical,
            other => other,
        };
        Self {
            symptom_type,
            description,
            severity: slots.severity,
            notes: slots.notes.clone(),
        }
    }
}

/// Where conversations end up
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn save_conversation(&self, payload: &ConversationPayload) -> Result<(), PersistenceError>;
}

/// Backend API client for conversation and symptom records
pub struct HttpTranscriptStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpTranscriptStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        }
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), PersistenceError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PersistenceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Record the extracted symptom. Best-effort like conversations.
    pub async fn submit_symptom(&self, record: &SymptomRecord) -> Result<(), PersistenceError> {
        self.post_json("/patient/symptoms", record).await
    }
}

#[async_trait]
impl TranscriptStore for HttpTranscriptStore {
    async fn save_conversation(&self, payload: &ConversationPayload) -> Result<(), PersistenceError> {
        self.post_json("/conversations", payload).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved,
    /// Nothing conversational in the log; no request was made
    Empty,
    /// An earlier trigger already claimed this session's save
    AlreadySaved,
    /// The store rejected the save; logged and dropped
    Failed,
}

pub struct PersistenceGuard {
    store: Arc<dyn TranscriptStore>,
    has_saved: AtomicBool,
}

impl PersistenceGuard {
    pub fn new(store: Arc<dyn TranscriptStore>) -> Self {
        Self {
            store,
            has_saved: AtomicBool::new(false),
        }
    }

    pub fn has_saved(&self) -> bool {
        self.has_saved.load(Ordering::SeqCst)
    }

    /// Re-arm for a new session
    pub fn reset(&self) {
        self.has_saved.store(false, Ordering::SeqCst);
    }

    /// Persist the conversation in `log` unless this session already saved.
    ///
    /// The latch is taken before any I/O, so concurrent triggers race for it
    /// and exactly one wins. An empty transcript still takes the latch.
    pub async fn save(&self, log: &EventLog, reason: &str) -> SaveOutcome {
        if self
            .has_saved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SaveOutcome::AlreadySaved;
        }

        let messages = log.messages();
        if messages.is_empty() {
            info!("No conversation to save ({})", reason);
            return SaveOutcome::Empty;
        }

        let payload = ConversationPayload {
            messages,
            reason: reason.to_string(),
        };
        match self.store.save_conversation(&payload).await {
            Ok(()) => {
                info!("Conversation saved: {} messages ({})", payload.messages.len(), reason);
                SaveOutcome::Saved
            }
            Err(PersistenceError::Status { status, body }) => {
                warn!("Conversation save rejected with {}: {}", status, body);
                SaveOutcome::Failed
            }
            Err(e) => {
                error!("Conversation save failed: {}", e);
                SaveOutcome::Failed
            }
        }
    }
}
