pub mod client;
pub mod messages;

pub use client::{NatsClient, NatsDiagnosticSink};
pub use messages::{session_subject, DiagnosticMessage, SessionUpdateMessage};
