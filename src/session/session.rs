use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::state::{next_state, SessionEvent, SessionState};
use super::stats::SessionStats;
use crate::audio::AudioLevel;
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink};
use crate::error::{ConnectionError, ConnectionResult, TranscriptionError};
use crate::extract::{SlotExtractor, SlotSnapshot};
use crate::persistence::{
    PersistenceGuard, SaveOutcome, TranscriptStore, REASON_CHANNEL_CLOSED, REASON_CHANNEL_ERROR,
    REASON_ENDED_BY_USER, REASON_TEARDOWN,
};
use crate::realtime::{
    fetch_patient_context, priming_text, Dispatch, EventLog, EventStream, SendOutcome, TranscriptEvent,
};
use crate::summary::{build_summary, SessionSummary};
use crate::transport::{ChannelEvent, SessionTransport};

/// Domain events for presentation layers (HTTP, NATS, CLI)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionUpdate {
    StateChanged { state: SessionState },
    AssistantMessage { text: String },
    AssistantTranscript { text: String },
    Slots { snapshot: SlotSnapshot },
    Error { message: String },
    RateLimited { until: DateTime<Utc> },
    Saved { outcome: SaveOutcome, reason: String },
    Summary { summary: SessionSummary },
}

impl SessionUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionUpdate::StateChanged { .. } => "state",
            SessionUpdate::AssistantMessage { .. } => "assistant",
            SessionUpdate::AssistantTranscript { .. } => "assistant_transcript",
            SessionUpdate::Slots { .. } => "slots",
            SessionUpdate::Error { .. } => "error",
            SessionUpdate::RateLimited { .. } => "rate_limited",
            SessionUpdate::Saved { .. } => "saved",
            SessionUpdate::Summary { .. } => "summary",
        }
    }
}

/// Work the event loop performs on its own schedule
enum Control {
    GreetingDue,
    Prime(Value),
    Stop {
        event: SessionEvent,
        reason: &'static str,
        ack: oneshot::Sender<()>,
    },
}

struct SessionCore {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    stream: EventStream,
    slots: SlotExtractor,
    summary: Option<SessionSummary>,
    last_error: Option<String>,
    /// Present while the event loop runs
    control: Option<mpsc::UnboundedSender<Control>>,
}

impl SessionCore {
    fn reset(&mut self) {
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.stream.reset();
        self.slots.reset();
        self.summary = None;
        self.last_error = None;
        self.control = None;
    }
}

struct SessionInner {
    config: SessionConfig,
    core: Mutex<SessionCore>,
    transport: Arc<SessionTransport>,
    guard: PersistenceGuard,
    updates: broadcast::Sender<SessionUpdate>,
    diagnostics: Arc<dyn DiagnosticSink>,
    http: reqwest::Client,
}

/// One realtime voice intake session.
///
/// Negotiation runs on the caller's task; once connected a single event
/// loop task owns every state change until the session ends.
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<SessionTransport>,
        store: Arc<dyn TranscriptStore>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);

        let mut slots = SlotExtractor::new(config.slot_layout.clone());
        let slot_updates = updates.clone();
        slots.subscribe(move |snapshot| {
            let _ = slot_updates.send(SessionUpdate::Slots {
                snapshot: snapshot.clone(),
            });
        });

        let core = SessionCore {
            state: SessionState::Idle,
            started_at: None,
            ended_at: None,
            stream: EventStream::new(config.rate_limit_cooldown, Arc::clone(&diagnostics)),
            slots,
            summary: None,
            last_error: None,
            control: None,
        };

        info!("Created voice session: {}", config.session_id);

        Self {
            inner: Arc::new(SessionInner {
                config,
                core: Mutex::new(core),
                transport,
                guard: PersistenceGuard::new(store),
                updates,
                diagnostics,
                http: reqwest::Client::new(),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    /// Speaking indicator for the agent's audio
    pub fn level(&self) -> watch::Receiver<AudioLevel> {
        self.inner.transport.level()
    }

    /// Connect to the agent. A no-op while a session is already running.
    ///
    /// All per-session state (log, slots, cooldown, save latch) is reset.
    pub async fn start(&self) -> ConnectionResult<()> {
        let inner = &self.inner;
        {
            let mut core = inner.core.lock().await;
            if core.state.is_running() {
                warn!("Session {} already running", inner.config.session_id);
                return Ok(());
            }
            core.reset();
            // Re-armed under the lock so a stop racing this start keeps its latch
            inner.guard.reset();
            inner.apply(&mut core, &SessionEvent::StartRequested);
        }

        info!("Starting voice session: {}", inner.config.session_id);

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let result = inner.transport.start(channel_tx).await;

        let mut core = inner.core.lock().await;
        match result {
            Ok(channel) if core.state == SessionState::Connecting => {
                let (control_tx, control_rx) = mpsc::unbounded_channel();
                core.stream.attach(channel);
                core.control = Some(control_tx.clone());
                inner.apply(&mut core, &SessionEvent::Connected);
                tokio::spawn(Arc::clone(inner).run(channel_rx, control_rx, control_tx));
                Ok(())
            }
            Ok(channel) => {
                // Stopped after negotiation finished but before the loop took over
                drop(core);
                channel.close().await;
                inner.transport.stop().await;
                Err(ConnectionError::Cancelled)
            }
            Err(e) => {
                if e != ConnectionError::Cancelled {
                    core.last_error = Some(e.to_string());
                    inner.publish(SessionUpdate::Error {
                        message: e.to_string(),
                    });
                }
                inner.apply(&mut core, &SessionEvent::StartFailed(e.clone()));
                Err(e)
            }
        }
    }

    /// End the session: release media, save the transcript once and build
    /// the summary. Safe at any time and more than once.
    pub async fn stop(&self) -> SessionStats {
        self.inner
            .stop_with(SessionEvent::StopRequested, REASON_ENDED_BY_USER)
            .await;
        self.stats().await
    }

    /// Host is going away. Same as stop, saved with reason `teardown`.
    pub async fn shutdown(&self) {
        self.inner
            .stop_with(SessionEvent::Teardown, REASON_TEARDOWN)
            .await;
    }

    /// Submit typed text as a patient message
    pub async fn send_text(&self, text: &str) -> SendOutcome {
        let mut core = self.inner.core.lock().await;
        core.stream.send_user_text(text).await
    }

    pub async fn state(&self) -> SessionState {
        self.inner.core.lock().await.state
    }

    pub async fn slots(&self) -> SlotSnapshot {
        self.inner.core.lock().await.slots.snapshot().clone()
    }

    pub async fn transcript(&self) -> Vec<TranscriptEvent> {
        self.inner.core.lock().await.stream.log().transcript()
    }

    pub async fn event_log(&self) -> EventLog {
        self.inner.core.lock().await.stream.log().clone()
    }

    /// Summary of the ended session, or of the conversation so far while live.
    /// `None` when nothing was said.
    pub async fn summary(&self) -> Option<SessionSummary> {
        let core = self.inner.core.lock().await;
        if core.summary.is_some() {
            return core.summary.clone();
        }
        let transcript = core.stream.log().transcript();
        (!transcript.is_empty()).then(|| build_summary(&transcript))
    }

    pub async fn stats(&self) -> SessionStats {
        let core = self.inner.core.lock().await;
        let end = core.ended_at.unwrap_or_else(Utc::now);
        let duration_secs = core
            .started_at
            .map(|start| end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            session_id: self.inner.config.session_id.clone(),
            state: core.state,
            started_at: core.started_at,
            duration_secs,
            turns: core.stream.log().transcript().len(),
            raw_events: core.stream.log().len(),
            rate_limited_until: core.stream.rate_limited_until(),
            has_saved: self.inner.guard.has_saved(),
            current_message: core.stream.current_message().map(str::to_string),
            last_error: core.last_error.clone(),
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move {
                inner
                    .stop_with(SessionEvent::Teardown, REASON_TEARDOWN)
                    .await;
            });
        }
    }
}

impl SessionInner {
    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    /// Apply `event` to the state machine. Returns whether the state changed.
    fn apply(&self, core: &mut SessionCore, event: &SessionEvent) -> bool {
        let next = next_state(core.state, event);
        if next == core.state {
            return false;
        }

        info!("Session {}: {} -> {}", self.config.session_id, core.state, next);
        self.diagnostics.emit(DiagnosticEvent::new(
            DiagnosticKind::Transition,
            json!({ "from": core.state, "to": next }),
        ));

        core.state = next;
        if matches!(next, SessionState::Ended | SessionState::Error) {
            core.ended_at = Some(Utc::now());
        }
        self.publish(SessionUpdate::StateChanged { state: next });
        true
    }

    async fn run(
        self: Arc<Self>,
        mut channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        control_tx: mpsc::UnboundedSender<Control>,
    ) {
        debug!("Session event loop started");

        loop {
            tokio::select! {
                Some(event) = channel_rx.recv() => {
                    if !self.on_channel_event(event, &control_tx).await {
                        break;
                    }
                }
                Some(control) = control_rx.recv() => match control {
                    Control::GreetingDue => self.send_greeting().await,
                    Control::Prime(report) => self.send_priming(report).await,
                    Control::Stop { event, reason, ack } => {
                        self.finish(event, reason).await;
                        let _ = ack.send(());
                        break;
                    }
                },
                else => break,
            }
        }

        debug!("Session event loop stopped");
    }

    /// Returns false once the session is over
    async fn on_channel_event(&self, event: ChannelEvent, control: &mpsc::UnboundedSender<Control>) -> bool {
        match event {
            ChannelEvent::Open => {
                {
                    let mut core = self.core.lock().await;
                    core.stream.on_open();
                    self.apply(&mut core, &SessionEvent::ChannelOpened);
                }
                self.schedule_opening(control.clone());
                true
            }
            ChannelEvent::Message(raw) => {
                self.on_message(&raw).await;
                true
            }
            ChannelEvent::Close => {
                info!("Data channel closed by peer");
                self.finish(SessionEvent::ChannelClosed, REASON_CHANNEL_CLOSED)
                    .await;
                false
            }
            ChannelEvent::Error(message) => {
                warn!("Data channel error: {}", message);
                self.core.lock().await.last_error = Some(message.clone());
                self.publish(SessionUpdate::Error {
                    message: message.clone(),
                });
                self.finish(SessionEvent::ChannelError(message), REASON_CHANNEL_ERROR)
                    .await;
                false
            }
        }
    }

    /// Greet after the configured delay, or prime with patient context
    fn schedule_opening(&self, control: mpsc::UnboundedSender<Control>) {
        match self.config.priming.clone() {
            Some(priming) => {
                let http = self.http.clone();
                let token = self.config.api_token.clone();
                let timeout = self.config.request_timeout;
                tokio::spawn(async move {
                    let next = match fetch_patient_context(&http, &priming, token.as_deref(), timeout).await {
                        Ok(report) => Control::Prime(report),
                        Err(e) => {
                            warn!("Patient context unavailable, greeting instead: {:#}", e);
                            Control::GreetingDue
                        }
                    };
                    let _ = control.send(next);
                });
            }
            None => {
                let delay = self.config.greeting_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = control.send(Control::GreetingDue);
                });
            }
        }
    }

    async fn send_greeting(&self) {
        let mut core = self.core.lock().await;
        if core.state != SessionState::Active {
            return;
        }
        self.apply(&mut core, &SessionEvent::GreetingDue);
        let outcome = core.stream.send_user_text(&self.config.greeting).await;
        if !outcome.is_sent() {
            warn!("Greeting not sent: {:?}", outcome);
        }
    }

    async fn send_priming(&self, report: Value) {
        let mut core = self.core.lock().await;
        if core.state != SessionState::Active {
            return;
        }
        let outcome = core.stream.send_user_text(&priming_text(&report)).await;
        if !outcome.is_sent() {
            warn!("Patient context not sent: {:?}", outcome);
        }
    }

    async fn on_message(&self, raw: &str) {
        let mut core = self.core.lock().await;
        match core.stream.dispatch(raw) {
            Dispatch::Transcription(text) => {
                // The extractor's subscriber publishes the snapshot
                let snapshot = core.slots.on_transcription(&text);
                debug!("Slots after turn {}: step {}", snapshot.turns, snapshot.current_step);
            }
            Dispatch::AssistantMessage(text) => self.publish(SessionUpdate::AssistantMessage { text }),
            Dispatch::AssistantTranscript(text) => self.publish(SessionUpdate::AssistantTranscript { text }),
            Dispatch::TranscriptionFailed(TranscriptionError::RateLimited(_)) => {
                if let Some(until) = core.stream.rate_limited_until() {
                    self.publish(SessionUpdate::RateLimited { until });
                }
            }
            Dispatch::TranscriptionFailed(e) => {
                core.last_error = Some(e.to_string());
                self.publish(SessionUpdate::Error {
                    message: e.to_string(),
                });
            }
            Dispatch::RemoteError(message) => {
                warn!("Realtime error: {}", message);
                core.last_error = Some(message.clone());
                self.publish(SessionUpdate::Error { message });
            }
            Dispatch::Malformed(e) => debug!("Dropped malformed message: {}", e),
            Dispatch::ResponseDone | Dispatch::Ignored(_) => {}
        }
    }

    async fn stop_with(&self, event: SessionEvent, reason: &'static str) {
        let control = {
            let mut core = self.core.lock().await;
            if core.state == SessionState::Idle {
                return;
            }
            let control = core.control.take();
            if control.is_none() {
                // Still negotiating, or already over
                self.apply(&mut core, &event);
            }
            control
        };

        if let Some(control) = control {
            let (ack_tx, ack_rx) = oneshot::channel();
            let stop = Control::Stop {
                event: event.clone(),
                reason,
                ack: ack_tx,
            };
            if control.send(stop).is_ok() && ack_rx.await.is_ok() {
                return;
            }
        }

        self.finish(event, reason).await;
    }

    /// Terminal path shared by every way a session ends
    async fn finish(&self, event: SessionEvent, reason: &'static str) {
        let log = {
            let mut core = self.core.lock().await;
            core.control = None;
            self.apply(&mut core, &event);
            core.stream.detach();
            core.stream.log().clone()
        };

        self.transport.stop().await;

        let outcome = self.guard.save(&log, reason).await;
        self.diagnostics.emit(DiagnosticEvent::new(
            DiagnosticKind::Persistence,
            json!({ "outcome": outcome, "reason": reason }),
        ));
        if outcome == SaveOutcome::AlreadySaved {
            return;
        }
        self.publish(SessionUpdate::Saved {
            outcome,
            reason: reason.to_string(),
        });

        let transcript = log.transcript();
        if !transcript.is_empty() {
            let summary = build_summary(&transcript);
            self.core.lock().await.summary = Some(summary.clone());
            self.publish(SessionUpdate::Summary { summary });
        }
    }
}
