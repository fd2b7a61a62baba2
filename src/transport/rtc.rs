//! webrtc-rs implementation of the peer seam
//!
//! One `sendrecv` PCMU transceiver plus the JSON data channel.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::peer::{ChannelEvent, DataChannel, EncodingHint, PeerConnector, PeerLink, PeerOptions};
use crate::audio::codec::{decode_pcmu, encode_pcmu, is_silent, process_frame, PCMU_SAMPLE_RATE};
use crate::audio::{AudioFrame, AudioStreamSource};
use crate::error::{ConnectionError, ConnectionResult};

fn signaling_err(context: &str) -> impl Fn(webrtc::Error) -> ConnectionError + '_ {
    move |e| ConnectionError::Signaling(format!("{}: {}", context, e))
}

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_SAMPLE_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Creates webrtc-rs peer connections
#[derive(Debug, Default)]
pub struct WebRtcConnector;

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        options: &PeerOptions,
        channel_events: mpsc::UnboundedSender<ChannelEvent>,
        remote_audio: broadcast::Sender<AudioFrame>,
    ) -> ConnectionResult<Arc<dyn PeerLink>> {
        let mut media = MediaEngine::default();
        media
            .register_codec(
                RTCRtpCodecParameters {
                    capability: pcmu_capability(),
                    payload_type: 0,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(signaling_err("Failed to register PCMU"))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)
            .map_err(signaling_err("Failed to register interceptors"))?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: options.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(signaling_err("Failed to create peer connection"))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            "audio".to_owned(),
            "loqa-voice-intake".to_owned(),
        ));
        pc.add_transceiver_from_track(
            Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Sendrecv,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(signaling_err("Failed to add audio transceiver"))?;

        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let remote_audio = remote_audio.clone();
            Box::pin(async move {
                if track.kind() == RTPCodecType::Audio {
                    info!(codec = %track.codec().capability.mime_type, "Remote audio track received");
                    tokio::spawn(read_remote_audio(track, remote_audio));
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(|state| {
            debug!(state = ?state, "Peer connection state changed");
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcLink {
            pc,
            track,
            channel_events,
            writer: Mutex::new(None),
        }))
    }
}

async fn read_remote_audio(track: Arc<TrackRemote>, remote_audio: broadcast::Sender<AudioFrame>) {
    let started = std::time::Instant::now();
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if packet.payload.is_empty() {
                    continue;
                }
                let frame = AudioFrame {
                    samples: decode_pcmu(&packet.payload),
                    sample_rate: PCMU_SAMPLE_RATE,
                    channels: 1,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                    source: AudioStreamSource::Remote,
                };
                // No receivers is fine; the sink may not be attached yet
                let _ = remote_audio.send(frame);
            }
            Err(e) => {
                debug!("Remote track read ended: {}", e);
                break;
            }
        }
    }
}

pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    channel_events: mpsc::UnboundedSender<ChannelEvent>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn attach_microphone(
        &self,
        mut frames: mpsc::Receiver<AudioFrame>,
        hint: EncodingHint,
    ) -> ConnectionResult<()> {
        let track = Arc::clone(&self.track);
        let handle = tokio::spawn(async move {
            let mut skipped = 0u64;
            while let Some(frame) = frames.recv().await {
                if hint.dtx && is_silent(&frame.samples, hint.silence_floor) {
                    skipped += 1;
                    continue;
                }
                let frame = process_frame(frame, PCMU_SAMPLE_RATE, 1);
                let duration = Duration::from_millis(
                    frame.samples.len() as u64 * 1000 / PCMU_SAMPLE_RATE as u64,
                );
                let sample = Sample {
                    data: Bytes::from(encode_pcmu(&frame.samples)),
                    duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    warn!("Failed to write microphone sample: {}", e);
                    break;
                }
            }
            debug!("Microphone writer stopped ({} silent frames skipped)", skipped);
        });

        if let Some(previous) = self.writer.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> ConnectionResult<Arc<dyn DataChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(signaling_err("Failed to create data channel"))?;

        let events = self.channel_events.clone();
        dc.on_open(Box::new(move || {
            let _ = events.send(ChannelEvent::Open);
            Box::pin(async {})
        }));

        let events = self.channel_events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let event = match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => ChannelEvent::Message(text),
                Err(_) => ChannelEvent::Message(String::new()),
            };
            let _ = events.send(event);
            Box::pin(async {})
        }));

        let events = self.channel_events.clone();
        dc.on_close(Box::new(move || {
            let _ = events.send(ChannelEvent::Close);
            Box::pin(async {})
        }));

        let events = self.channel_events.clone();
        dc.on_error(Box::new(move |err| {
            let _ = events.send(ChannelEvent::Error(err.to_string()));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcDataChannel {
            label: label.to_string(),
            inner: dc,
        }))
    }

    async fn create_offer(&self) -> ConnectionResult<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(signaling_err("Failed to create offer"))?;

        let mut gathering = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(signaling_err("Failed to set local description"))?;
        let _ = gathering.recv().await;

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| ConnectionError::Signaling("No local description after gathering".to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> ConnectionResult<()> {
        let answer = RTCSessionDescription::answer(sdp).map_err(signaling_err("Invalid SDP answer"))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(signaling_err("Failed to apply SDP answer"))
    }

    async fn close(&self) {
        if let Some(writer) = self.writer.lock().await.take() {
            writer.abort();
        }
        if let Err(e) = self.pc.close().await {
            warn!("Error closing peer connection: {}", e);
        }
    }
}

struct WebRtcDataChannel {
    label: String,
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> ConnectionResult<()> {
        self.inner
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| ConnectionError::Channel(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.inner.close().await {
            debug!("Data channel close: {}", e);
        }
    }
}
