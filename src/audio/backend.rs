use anyhow::{bail, Result};
use std::str::FromStr;
use tokio::sync::mpsc;

/// Which side of the call an audio frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStreamSource {
    /// Local capture sent to the agent
    Microphone,
    /// Agent speech received from the peer
    Remote,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Local microphone or remote agent
    pub source: AudioStreamSource,
}

/// Capture constraints for the microphone
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz speech
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl AudioBackendConfig {
    /// Requested capture processing, as logged when a backend starts
    pub fn constraints(&self) -> String {
        let flag = |on: bool| if on { "on" } else { "off" };
        format!(
            "echo_cancellation={} noise_suppression={} auto_gain_control={}",
            flag(self.echo_cancellation),
            flag(self.noise_suppression),
            flag(self.auto_gain_control)
        )
    }

    /// Samples per channel in one buffer
    pub fn frame_samples(&self) -> usize {
        (self.target_sample_rate as u64 * self.buffer_duration_ms / 1000) as usize
    }
}

/// Microphone capture backend trait
///
/// Implementations:
/// - File: replay a WAV file at real-time pace
/// - Stdin: raw 16-bit little-endian PCM piped in (e.g. from `arecord`)
/// - Silence: generated silence, for text-only sessions
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on source and configuration
    pub fn create(source: &AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::File(path) => {
                let backend = super::file::FileBackend::new(path, config)?;
                Ok(Box::new(backend))
            }
            AudioSource::Stdin => Ok(Box::new(super::pcm::StdinBackend::new(config))),
            AudioSource::Silence => Ok(Box::new(super::pcm::SilenceBackend::new(config))),
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// WAV file input (for testing/batch processing)
    File(String),
    /// Raw PCM on standard input
    Stdin,
    /// No microphone; silence keeps the outbound track alive
    Silence,
}

impl FromStr for AudioSource {
    type Err = anyhow::Error;

    /// Accepts `silence`, `stdin`, or `file:<path>`
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "silence" => Ok(AudioSource::Silence),
            "stdin" => Ok(AudioSource::Stdin),
            other => match other.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(AudioSource::File(path.to_string())),
                _ => bail!("Unknown audio source '{}': expected silence, stdin, or file:<path>", other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_source_parsing() {
        assert_eq!("silence".parse::<AudioSource>().unwrap(), AudioSource::Silence);
        assert_eq!("stdin".parse::<AudioSource>().unwrap(), AudioSource::Stdin);
        assert_eq!(
            "file:/tmp/a.wav".parse::<AudioSource>().unwrap(),
            AudioSource::File("/tmp/a.wav".to_string())
        );
        assert!("file:".parse::<AudioSource>().is_err());
        assert!("microphone".parse::<AudioSource>().is_err());
    }

    #[test]
    fn test_frame_samples() {
        let config = AudioBackendConfig::default();
        assert_eq!(config.frame_samples(), 1600);
    }
}
