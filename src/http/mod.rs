//! HTTP API server for external control
//!
//! This module provides a REST API for driving the voice session:
//! - POST /session/start - Connect to the agent
//! - POST /session/stop - End, save and summarize
//! - POST /session/text - Send typed text as the patient
//! - POST /session/symptom - Record the extracted symptom
//! - GET /session/status - Query session status
//! - GET /session/slots - Current extraction state
//! - GET /session/summary - Session summary
//! - GET /session/transcript - Role-attributed transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, SendTextResponse, StartSessionResponse, StopSessionResponse};
pub use routes::create_router;
pub use state::AppState;
