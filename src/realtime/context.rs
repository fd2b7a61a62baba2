use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use super::log::CONTEXT_MARKER;

/// Ground the agent in a patient's recent records instead of greeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimingConfig {
    /// Patient data endpoint, e.g. `<api>/voice-agent/provider-report/patient-data`
    pub url: String,
    pub patient_id: String,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_window_days() -> u32 {
    7
}

/// Fetch the patient data window used to prime the conversation
pub async fn fetch_patient_context(
    http: &reqwest::Client,
    config: &PrimingConfig,
    api_token: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<Value> {
    let mut request = http
        .get(&config.url)
        .query(&[
            ("patientId", config.patient_id.clone()),
            ("windowDays", config.window_days.to_string()),
        ])
        .timeout(timeout);
    if let Some(token) = api_token {
        request = request.bearer_auth(token);
    }

    let report: Value = request.send().await?.error_for_status()?.json().await?;
    info!("Loaded patient context for {}", config.patient_id);
    Ok(report)
}

/// The grounding message text: marker line followed by the JSON report
pub fn priming_text(report: &Value) -> String {
    format!("{}\n{}", CONTEXT_MARKER, report)
}
