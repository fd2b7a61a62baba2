pub mod backend;
pub mod codec;
pub mod file;
pub mod level;
pub mod pcm;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, AudioStreamSource};
pub use file::{AudioFile, FileBackend};
pub use level::{AudioLevel, AudioLevelMonitor, LevelConfig};
pub use pcm::{SilenceBackend, StdinBackend};
