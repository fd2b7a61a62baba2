use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::audio::AudioFrame;
use crate::error::ConnectionResult;

/// Lifecycle and message notifications from the application data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Close,
    Error(String),
}

/// The application data channel carrying JSON protocol messages
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> ConnectionResult<()>;

    /// Close the channel. Safe to call more than once.
    async fn close(&self);
}

/// Hints applied to the outbound audio encoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingHint {
    /// Discontinuous transmission: silent frames are not sent
    pub dtx: bool,
    /// Normalized RMS below which a frame counts as silence
    pub silence_floor: f32,
}

impl Default for EncodingHint {
    fn default() -> Self {
        Self {
            dtx: true,
            silence_floor: 0.01,
        }
    }
}

/// Options for creating a peer connection
#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub ice_servers: Vec<String>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// A live peer connection with one bidirectional audio transceiver
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Feed captured microphone frames into the outbound audio track
    async fn attach_microphone(
        &self,
        frames: mpsc::Receiver<AudioFrame>,
        hint: EncodingHint,
    ) -> ConnectionResult<()>;

    /// Create the application data channel. Its events go to the sender given to `connect`.
    async fn create_data_channel(&self, label: &str) -> ConnectionResult<Arc<dyn DataChannel>>;

    /// Create the local SDP offer, set it, and wait for candidate gathering
    async fn create_offer(&self) -> ConnectionResult<String>;

    /// Apply the remote SDP answer
    async fn apply_answer(&self, sdp: String) -> ConnectionResult<()>;

    /// Stop outbound media and close the connection. Safe to call more than once.
    async fn close(&self);
}

/// Creates peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a peer with a `sendrecv` audio transceiver.
    ///
    /// Decoded remote audio is published on `remote_audio`; data channel
    /// notifications are sent on `channel_events`.
    async fn connect(
        &self,
        options: &PeerOptions,
        channel_events: mpsc::UnboundedSender<ChannelEvent>,
        remote_audio: broadcast::Sender<AudioFrame>,
    ) -> ConnectionResult<Arc<dyn PeerLink>>;
}
