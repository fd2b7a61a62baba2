use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConnectionError, ConnectionResult};

/// Short-lived secret authorising one realtime session
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralCredential(String);

impl EphemeralCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EphemeralCredential(***)")
    }
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    client_secret: Option<ClientSecret>,
}

/// Fetch an ephemeral credential from the token endpoint.
///
/// Expects `{"client_secret": {"value": "..."}}`. Any transport failure,
/// non-200 status or missing value is a `Credential` error.
pub async fn fetch_credential(
    http: &reqwest::Client,
    url: &str,
    api_token: Option<&str>,
    timeout: Duration,
) -> ConnectionResult<EphemeralCredential> {
    debug!("Requesting ephemeral credential from {}", url);

    let mut request = http.get(url).timeout(timeout);
    if let Some(token) = api_token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ConnectionError::Credential(format!("Token request failed: {}", e)))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        warn!("Token endpoint returned {}: {}", status, body);
        return Err(ConnectionError::Credential(format!(
            "Token endpoint returned {}",
            status.as_u16()
        )));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| ConnectionError::Credential(format!("Invalid token response: {}", e)))?;

    parsed
        .client_secret
        .and_then(|secret| secret.value)
        .filter(|value| !value.trim().is_empty())
        .map(EphemeralCredential::new)
        .ok_or_else(|| ConnectionError::Credential("Token response has no client_secret.value".to_string()))
}
