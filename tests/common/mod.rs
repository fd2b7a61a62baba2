// Test doubles for driving a VoiceSession without a real peer connection.
//
// The fake connector records the channel-event sender it is given so tests
// can play the remote agent: open the channel, push server messages, close it.

#![allow(dead_code)]

use async_trait::async_trait;
use loqa_voice_intake::audio::{AudioFrame, AudioSource, LevelConfig};
use loqa_voice_intake::diagnostics::MemorySink;
use loqa_voice_intake::error::{ConnectionError, ConnectionResult};
use loqa_voice_intake::persistence::HttpTranscriptStore;
use loqa_voice_intake::session::{SessionConfig, SessionState, SessionUpdate, VoiceSession};
use loqa_voice_intake::transport::{
    ChannelEvent, DataChannel, EncodingHint, PeerConnector, PeerLink, PeerOptions, SessionTransport,
    TransportConfig,
};
use loqa_voice_intake::AudioBackendConfig;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

pub const SDP_ANSWER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

#[derive(Default)]
pub struct FakeChannel {
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataChannel for FakeChannel {
    fn label(&self) -> &str {
        "oai-events"
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> ConnectionResult<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Shared view of everything the fake peer did
#[derive(Default)]
pub struct PeerProbe {
    events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    pub closes: AtomicUsize,
    pub frames_seen: AtomicUsize,
    /// When set, `create_offer` waits for `release` before returning
    pub hold_offer: AtomicBool,
    pub release: Notify,
    pub offer_reached: Notify,
}

impl PeerProbe {
    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().unwrap().clone().expect("data channel not created")
    }

    fn emit(&self, event: ChannelEvent) {
        let sender = self.events.lock().unwrap().clone().expect("peer not connected");
        let _ = sender.send(event);
    }

    /// Remote side opened the data channel
    pub fn open(&self) {
        self.channel().open.store(true, Ordering::SeqCst);
        self.emit(ChannelEvent::Open);
    }

    pub fn server_event(&self, value: Value) {
        self.emit(ChannelEvent::Message(value.to_string()));
    }

    pub fn raw(&self, text: &str) {
        self.emit(ChannelEvent::Message(text.to_string()));
    }

    pub fn patient_said(&self, transcript: &str) {
        self.server_event(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "transcript": transcript,
        }));
    }

    pub fn agent_said(&self, transcript: &str) {
        self.server_event(json!({
            "type": "response.audio_transcript.done",
            "transcript": transcript,
        }));
    }

    pub fn remote_close(&self) {
        self.emit(ChannelEvent::Close);
    }

    pub fn remote_error(&self, message: &str) {
        self.emit(ChannelEvent::Error(message.to_string()));
    }
}

pub struct FakeLink {
    probe: Arc<PeerProbe>,
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn attach_microphone(&self, mut frames: mpsc::Receiver<AudioFrame>, _hint: EncodingHint) -> ConnectionResult<()> {
        let probe = Arc::clone(&self.probe);
        tokio::spawn(async move {
            while frames.recv().await.is_some() {
                probe.frames_seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(())
    }

    async fn create_data_channel(&self, _label: &str) -> ConnectionResult<Arc<dyn DataChannel>> {
        let channel = Arc::new(FakeChannel::default());
        *self.probe.channel.lock().unwrap() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn create_offer(&self) -> ConnectionResult<String> {
        if self.probe.hold_offer.load(Ordering::SeqCst) {
            self.probe.offer_reached.notify_one();
            self.probe.release.notified().await;
        }
        Ok("v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\n".to_string())
    }

    async fn apply_answer(&self, sdp: String) -> ConnectionResult<()> {
        if sdp.starts_with("v=") {
            Ok(())
        } else {
            Err(ConnectionError::Signaling("bad answer".to_string()))
        }
    }

    async fn close(&self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeConnector {
    pub probe: Arc<PeerProbe>,
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _options: &PeerOptions,
        channel_events: mpsc::UnboundedSender<ChannelEvent>,
        _remote_audio: broadcast::Sender<AudioFrame>,
    ) -> ConnectionResult<Arc<dyn PeerLink>> {
        *self.probe.events.lock().unwrap() = Some(channel_events);
        Ok(Arc::new(FakeLink {
            probe: Arc::clone(&self.probe),
        }))
    }
}

/// Token and signaling endpoints that always succeed
pub async fn mock_agent_endpoints(server: &mut mockito::ServerGuard) -> (mockito::Mock, mockito::Mock) {
    let token = server
        .mock("GET", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"client_secret":{"value":"ek_test"}}"#)
        .create_async()
        .await;
    let sdp = server
        .mock("POST", "/realtime")
        .match_query(mockito::Matcher::Any)
        .with_status(201)
        .with_body(SDP_ANSWER)
        .create_async()
        .await;
    (token, sdp)
}

pub fn transport_config(server_url: &str) -> TransportConfig {
    TransportConfig {
        token_url: format!("{}/token", server_url),
        signaling_url: format!("{}/realtime", server_url),
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Greeting far enough out that it never fires unless a test waits for it
pub fn quiet_session_config() -> SessionConfig {
    SessionConfig {
        session_id: "intake-test".to_string(),
        greeting_delay: Duration::from_secs(3600),
        ..Default::default()
    }
}

pub struct Harness {
    pub session: Arc<VoiceSession>,
    pub probe: Arc<PeerProbe>,
    pub diagnostics: Arc<MemorySink>,
    pub store: Arc<HttpTranscriptStore>,
    pub updates: broadcast::Receiver<SessionUpdate>,
}

pub fn harness(server_url: &str, config: SessionConfig) -> Harness {
    let probe = Arc::new(PeerProbe::default());
    let transport = Arc::new(SessionTransport::new(
        transport_config(server_url),
        Arc::new(FakeConnector {
            probe: Arc::clone(&probe),
        }),
        AudioSource::Silence,
        AudioBackendConfig::default(),
        LevelConfig::default(),
    ));
    let store = Arc::new(HttpTranscriptStore::new(server_url, None, Duration::from_secs(2)));
    let diagnostics = Arc::new(MemorySink::new());
    let session = Arc::new(VoiceSession::new(config, transport, store.clone(), diagnostics.clone()));
    let updates = session.subscribe();

    Harness {
        session,
        probe,
        diagnostics,
        store,
        updates,
    }
}

/// Wait until the session reaches `state` (bounded)
pub async fn wait_for_state(session: &VoiceSession, state: SessionState) {
    for _ in 0..200 {
        if session.state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {}", state);
}

/// Wait until `check` holds for the slot snapshot or transcript (bounded)
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Start the session and open the data channel
pub async fn connect(h: &Harness) {
    h.session.start().await.expect("session start");
    h.probe.open();
    wait_for_state(&h.session, SessionState::Active).await;
}
