pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod http;
pub mod nats;
pub mod persistence;
pub mod realtime;
pub mod session;
pub mod summary;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioLevel, AudioLevelMonitor,
    AudioSource, AudioStreamSource, LevelConfig,
};
pub use config::Config;
pub use diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink, FanoutSink, MemorySink, TracingSink};
pub use error::{ConnectionError, ConnectionResult, PersistenceError, TranscriptionError};
pub use extract::{classify_symptom, parse_severity, Slot, SlotExtractor, SlotSnapshot, SymptomType};
pub use http::{create_router, AppState};
pub use nats::{NatsClient, NatsDiagnosticSink, SessionUpdateMessage};
pub use persistence::{HttpTranscriptStore, PersistenceGuard, SaveOutcome, SymptomRecord, TranscriptStore};
pub use realtime::{EventLog, EventStream, Role, SendOutcome, TranscriptEvent};
pub use session::{SessionConfig, SessionState, SessionStats, SessionUpdate, VoiceSession};
pub use summary::{build_summary, SessionSummary};
pub use transport::{SessionTransport, TransportConfig, WebRtcConnector};
