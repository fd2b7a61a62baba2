// Live capture sources without a sound card: piped PCM and generated silence

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, AudioStreamSource};

/// Reads raw 16-bit little-endian mono PCM at the target sample rate from stdin,
/// e.g. `arecord -f S16_LE -r 16000 -c 1 | loqa-voice-intake serve --audio stdin`
pub struct StdinBackend {
    config: AudioBackendConfig,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl StdinBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

/// Decode interleaved little-endian i16 bytes; a trailing odd byte is ignored
pub fn decode_le_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[async_trait::async_trait]
impl AudioBackend for StdinBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.running.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(32);
        let running = self.running.clone();
        let config = self.config.clone();
        running.store(true, Ordering::SeqCst);

        info!("Capturing PCM from stdin at {}Hz", config.target_sample_rate);

        self.task = Some(tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = vec![0u8; config.frame_samples() * config.target_channels as usize * 2];
            let started = Instant::now();

            while running.load(Ordering::SeqCst) {
                match stdin.read_exact(&mut buf).await {
                    Ok(_) => {
                        let frame = AudioFrame {
                            samples: decode_le_samples(&buf),
                            sample_rate: config.target_sample_rate,
                            channels: config.target_channels,
                            timestamp_ms: started.elapsed().as_millis() as u64,
                            source: AudioStreamSource::Microphone,
                        };
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin capture ended: {}", e);
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "stdin PCM"
    }
}

/// Emits zeroed frames at real-time pace. Used for text-only sessions so the
/// outbound track still negotiates.
pub struct SilenceBackend {
    config: AudioBackendConfig,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SilenceBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for SilenceBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.running.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(8);
        let running = self.running.clone();
        let config = self.config.clone();
        running.store(true, Ordering::SeqCst);

        self.task = Some(tokio::spawn(async move {
            let pace = Duration::from_millis(config.buffer_duration_ms.max(1));
            let mut interval = tokio::time::interval(pace);
            let mut timestamp_ms = 0;
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let frame = AudioFrame {
                    samples: vec![0; config.frame_samples() * config.target_channels as usize],
                    sample_rate: config.target_sample_rate,
                    channels: config.target_channels,
                    timestamp_ms,
                    source: AudioStreamSource::Microphone,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                timestamp_ms += config.buffer_duration_ms;
            }
            running.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "silence"
    }
}
