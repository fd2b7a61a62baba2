use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, LevelConfig};
use crate::realtime::PrimingConfig;
use crate::session::SessionConfig;
use crate::transport::{EncodingHint, TransportConfig, DEFAULT_CHANNEL_LABEL};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub realtime: RealtimeConfig,
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub nats: Option<NatsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    pub token_url: String,
    pub signaling_url: String,
    pub model: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Backend API base URL; conversations go to `<api_url>/conversations`
    pub api_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub greeting: String,
    pub greeting_delay_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub speaking_threshold: f32,
    /// Ask "physical, mental or emotional?" before the symptom name
    pub ask_symptom_type: bool,
    /// Prime with this patient's records instead of greeting
    pub patient_id: Option<String>,
    pub context_window_days: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            greeting: crate::session::DEFAULT_GREETING.to_string(),
            greeting_delay_ms: 600,
            rate_limit_cooldown_ms: 15_000,
            speaking_threshold: 0.06,
            ask_symptom_type: false,
            patient_id: None,
            context_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// `silence`, `stdin` or `file:<path>`
    pub source: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Normalized RMS under which outbound frames are not sent
    pub dtx_silence_floor: f32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source: "silence".to_string(),
            sample_rate: 16000,
            channels: 1,
            dtx_silence_floor: 0.01,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    pub url: String,
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load `<path>.toml` (or any format the `config` crate recognizes),
    /// overridden by `VOICE_INTAKE__SECTION__KEY` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("VOICE_INTAKE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.realtime.timeout_secs)
    }

    pub fn audio_source(&self) -> Result<AudioSource> {
        self.audio.source.parse()
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            token_url: self.realtime.token_url.clone(),
            signaling_url: self.realtime.signaling_url.clone(),
            model: self.realtime.model.clone(),
            ice_servers: self.realtime.ice_servers.clone(),
            request_timeout: self.request_timeout(),
            api_token: self.persistence.api_token.clone(),
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            encoding: EncodingHint {
                dtx: true,
                silence_floor: self.audio.dtx_silence_floor,
            },
        }
    }

    pub fn audio_backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.audio.sample_rate,
            target_channels: self.audio.channels,
            echo_cancellation: self.audio.echo_cancellation,
            noise_suppression: self.audio.noise_suppression,
            auto_gain_control: self.audio.auto_gain_control,
            ..Default::default()
        }
    }

    pub fn level_config(&self) -> LevelConfig {
        LevelConfig {
            speaking_threshold: self.session.speaking_threshold,
            ..Default::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut layout = crate::extract::DEFAULT_LAYOUT.to_vec();
        if self.session.ask_symptom_type {
            layout.insert(0, crate::extract::Slot::SymptomType);
        }

        let priming = self.session.patient_id.clone().map(|patient_id| PrimingConfig {
            url: format!(
                "{}/voice-agent/provider-report/patient-data",
                self.persistence.api_url.trim_end_matches('/')
            ),
            patient_id,
            window_days: self.session.context_window_days,
        });

        SessionConfig {
            greeting: self.session.greeting.clone(),
            greeting_delay: Duration::from_millis(self.session.greeting_delay_ms),
            rate_limit_cooldown: Duration::from_millis(self.session.rate_limit_cooldown_ms),
            slot_layout: layout,
            priming,
            api_token: self.persistence.api_token.clone(),
            request_timeout: self.request_timeout(),
            ..Default::default()
        }
    }
}
