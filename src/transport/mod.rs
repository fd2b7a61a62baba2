//! Connection setup and teardown for one realtime session
//!
//! `SessionTransport::start` runs the negotiation steps in order and owns
//! every resource it acquires until `stop` releases them.

pub mod credentials;
pub mod peer;
pub mod rtc;
pub mod signaling;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioLevel, AudioLevelMonitor, AudioSource,
    LevelConfig,
};
use crate::error::{ConnectionError, ConnectionResult};

pub use credentials::{fetch_credential, EphemeralCredential};
pub use peer::{ChannelEvent, DataChannel, EncodingHint, PeerConnector, PeerLink, PeerOptions};
pub use rtc::WebRtcConnector;
pub use signaling::exchange_sdp;

pub const DEFAULT_CHANNEL_LABEL: &str = "oai-events";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub token_url: String,
    pub signaling_url: String,
    pub model: String,
    pub ice_servers: Vec<String>,
    /// Bound on the credential fetch and on the SDP exchange
    pub request_timeout: Duration,
    /// Application bearer token for the token endpoint
    pub api_token: Option<String>,
    pub channel_label: String,
    pub encoding: EncodingHint,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            token_url: "http://localhost:8080/voice-agent/symptom-recorder/token".to_string(),
            signaling_url: "https://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            ice_servers: PeerOptions::default().ice_servers,
            request_timeout: Duration::from_secs(10),
            api_token: None,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            encoding: EncodingHint::default(),
        }
    }
}

#[derive(Default)]
struct Resources {
    link: Option<Arc<dyn PeerLink>>,
    backend: Option<Box<dyn AudioBackend>>,
    channel: Option<Arc<dyn DataChannel>>,
    monitor: Option<JoinHandle<()>>,
}

pub struct SessionTransport {
    config: TransportConfig,
    http: reqwest::Client,
    connector: Arc<dyn PeerConnector>,
    audio_source: AudioSource,
    audio_config: AudioBackendConfig,
    level_config: LevelConfig,
    remote_audio: broadcast::Sender<AudioFrame>,
    level: watch::Sender<AudioLevel>,
    resources: Mutex<Resources>,
    cancelled: AtomicBool,
}

impl SessionTransport {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn PeerConnector>,
        audio_source: AudioSource,
        audio_config: AudioBackendConfig,
        level_config: LevelConfig,
    ) -> Self {
        let (remote_audio, _) = broadcast::channel(64);
        let (level, _) = watch::channel(AudioLevel::default());
        Self {
            config,
            http: reqwest::Client::new(),
            connector,
            audio_source,
            audio_config,
            level_config,
            remote_audio,
            level,
            resources: Mutex::new(Resources::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Decoded remote (agent) audio
    pub fn subscribe_remote_audio(&self) -> broadcast::Receiver<AudioFrame> {
        self.remote_audio.subscribe()
    }

    /// Speaking indicator for the remote audio
    pub fn level(&self) -> watch::Receiver<AudioLevel> {
        self.level.subscribe()
    }

    /// Negotiate a live session. Data channel notifications are delivered on
    /// `channel_events`. On failure everything acquired so far is released.
    pub async fn start(
        &self,
        channel_events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ConnectionResult<Arc<dyn DataChannel>> {
        self.cancelled.store(false, Ordering::SeqCst);

        match self.negotiate(channel_events).await {
            Ok(channel) => {
                info!("Realtime session connected");
                Ok(channel)
            }
            Err(e) => {
                warn!("Session start failed: {}", e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    fn check_cancelled(&self) -> ConnectionResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ConnectionError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn negotiate(
        &self,
        channel_events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ConnectionResult<Arc<dyn DataChannel>> {
        let timeout = self.config.request_timeout;

        let credential = fetch_credential(
            &self.http,
            &self.config.token_url,
            self.config.api_token.as_deref(),
            timeout,
        )
        .await?;
        self.check_cancelled()?;

        let options = PeerOptions {
            ice_servers: self.config.ice_servers.clone(),
        };
        let link = self
            .connector
            .connect(&options, channel_events, self.remote_audio.clone())
            .await?;
        self.resources.lock().await.link = Some(Arc::clone(&link));
        self.check_cancelled()?;

        let mut backend = AudioBackendFactory::create(&self.audio_source, self.audio_config.clone())
            .map_err(|e| ConnectionError::MediaPermission(e.to_string()))?;
        let frames = backend
            .start()
            .await
            .map_err(|e| ConnectionError::MediaPermission(e.to_string()))?;
        debug!(
            "Microphone backend '{}' started ({})",
            backend.name(),
            self.audio_config.constraints()
        );
        self.resources.lock().await.backend = Some(backend);
        self.check_cancelled()?;

        link.attach_microphone(frames, self.config.encoding).await?;

        let channel = link.create_data_channel(&self.config.channel_label).await?;
        self.resources.lock().await.channel = Some(Arc::clone(&channel));
        self.check_cancelled()?;

        let offer = link.create_offer().await?;
        self.check_cancelled()?;

        let answer = exchange_sdp(
            &self.http,
            &self.config.signaling_url,
            &self.config.model,
            &credential,
            offer,
            timeout,
        )
        .await?;
        self.check_cancelled()?;

        link.apply_answer(answer).await?;

        let monitor = AudioLevelMonitor::new(self.level_config.clone())
            .spawn(self.remote_audio.subscribe(), self.level.clone());
        self.resources.lock().await.monitor = Some(monitor);
        self.check_cancelled()?;

        Ok(channel)
    }

    /// Release every resource. Safe to call at any time, more than once,
    /// including while `start` is still negotiating.
    pub async fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.teardown().await;
    }

    async fn teardown(&self) {
        let resources = std::mem::take(&mut *self.resources.lock().await);

        if let Some(channel) = resources.channel {
            channel.close().await;
        }
        if let Some(mut backend) = resources.backend {
            if let Err(e) = backend.stop().await {
                warn!("Failed to stop microphone backend: {}", e);
            }
        }
        if let Some(link) = resources.link {
            link.close().await;
        }
        if let Some(monitor) = resources.monitor {
            monitor.abort();
        }
        let _ = self.level.send(AudioLevel::default());
    }
}
