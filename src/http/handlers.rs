use super::state::AppState;
use crate::error::ConnectionError;
use crate::extract::SlotSnapshot;
use crate::persistence::SymptomRecord;
use crate::realtime::{SendOutcome, TranscriptEvent};
use crate::session::{SessionState, SessionStats};
use crate::summary::SessionSummary;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: SessionState,
    pub stats: SessionStats,
    pub summary: Option<SessionSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendTextResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Connect the voice session
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = state.session.session_id().to_string();
    info!("Starting session: {}", session_id);

    match state.session.start().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StartSessionResponse {
                session_id: session_id.clone(),
                status: state.session.state().await,
                message: format!("Session {} connecting", session_id),
            }),
        )
            .into_response(),
        Err(ConnectionError::Cancelled) => error_response(StatusCode::CONFLICT, "Session start cancelled by stop"),
        Err(e) => {
            error!("Failed to start session: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// POST /session/stop
/// End the session, save the transcript and return the summary
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping session: {}", state.session.session_id());

    let stats = state.session.stop().await;
    let summary = state.session.summary().await;

    (
        StatusCode::OK,
        Json(StopSessionResponse {
            session_id: stats.session_id.clone(),
            status: stats.state,
            stats,
            summary,
        }),
    )
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.session.stats().await)
}

/// GET /session/slots
pub async fn get_slots(State(state): State<AppState>) -> Json<SlotSnapshot> {
    Json(state.session.slots().await)
}

/// GET /session/summary
pub async fn get_summary(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.summary().await {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Nothing has been said yet"),
    }
}

/// GET /session/transcript
/// Role-attributed turns accumulated so far
pub async fn get_transcript(State(state): State<AppState>) -> Json<Vec<TranscriptEvent>> {
    Json(state.session.transcript().await)
}

/// POST /session/text
/// Send typed text as a patient message
pub async fn send_text(State(state): State<AppState>, Json(req): Json<SendTextRequest>) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Text must not be empty");
    }

    match state.session.send_text(req.text.trim()).await {
        SendOutcome::Sent => (
            StatusCode::ACCEPTED,
            Json(SendTextResponse {
                status: "sent".to_string(),
                rate_limited_until: None,
            }),
        )
            .into_response(),
        SendOutcome::NotOpen => error_response(StatusCode::CONFLICT, "Session is not connected"),
        SendOutcome::RateLimited { until } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(SendTextResponse {
                status: "rate_limited".to_string(),
                rate_limited_until: Some(until),
            }),
        )
            .into_response(),
        SendOutcome::Failed(e) => {
            error!("Failed to send text: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// POST /session/symptom
/// Record the extracted symptom with the backend
pub async fn submit_symptom(State(state): State<AppState>) -> impl IntoResponse {
    let slots = state.session.slots().await;
    if !slots.complete {
        return error_response(StatusCode::CONFLICT, "Symptom interview is not complete");
    }

    let record = SymptomRecord::from(&slots);
    match state.symptoms.submit_symptom(&record).await {
        Ok(()) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => {
            error!("Failed to submit symptom: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
