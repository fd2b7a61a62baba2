use std::time::Duration;
use tracing::{debug, warn};

use super::credentials::EphemeralCredential;
use crate::error::{ConnectionError, ConnectionResult};

/// POST the local SDP offer and return the remote answer.
///
/// The request carries the model as a query parameter, the ephemeral
/// credential as a bearer token and the offer as `application/sdp`.
pub async fn exchange_sdp(
    http: &reqwest::Client,
    url: &str,
    model: &str,
    credential: &EphemeralCredential,
    offer: String,
    timeout: Duration,
) -> ConnectionResult<String> {
    debug!("Posting SDP offer ({} bytes) to {}", offer.len(), url);

    let response = http
        .post(url)
        .query(&[("model", model)])
        .bearer_auth(credential.secret())
        .header(reqwest::header::CONTENT_TYPE, "application/sdp")
        .body(offer)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ConnectionError::Signaling(format!("SDP exchange failed: {}", e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ConnectionError::Signaling(format!("SDP answer unreadable: {}", e)))?;

    if !status.is_success() {
        warn!("Signaling endpoint returned {}", status);
        return Err(ConnectionError::Signaling(format!(
            "SDP exchange failed: {} - {}",
            status.as_u16(),
            body
        )));
    }

    if !body.trim_start().starts_with("v=") {
        return Err(ConnectionError::Signaling("Malformed SDP answer".to_string()));
    }

    Ok(body)
}
