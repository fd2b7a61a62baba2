use anyhow::{Context, Result};
use async_nats::Client;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{session_subject, DiagnosticMessage, SessionUpdateMessage};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::session::SessionUpdate;

pub struct NatsClient {
    client: Client,
    session_id: String,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, session_id: String) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client, session_id })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Publish one session update on `voice.session.<id>.<kind>`
    pub async fn publish_update(&self, update: &SessionUpdate) -> Result<()> {
        let subject = session_subject(&self.session_id, update.kind());

        let message = SessionUpdateMessage {
            session_id: self.session_id.clone(),
            kind: update.kind().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload: serde_json::to_value(update)?,
        };
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish session update")?;

        debug!("Published {} to {}", message.kind, subject);

        Ok(())
    }

    pub async fn publish_diagnostic(&self, event: &DiagnosticEvent) -> Result<()> {
        let subject = session_subject(&self.session_id, "diagnostics");
        let message = DiagnosticMessage {
            session_id: self.session_id.clone(),
            kind: serde_json::to_value(event.kind)?
                .as_str()
                .unwrap_or_default()
                .to_string(),
            timestamp: event.at.to_rfc3339(),
            detail: event.detail.clone(),
        };
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject, payload.into())
            .await
            .context("Failed to publish diagnostic")?;

        Ok(())
    }

    /// Subscribe to every update of this session (`voice.session.<id>.>`)
    pub async fn subscribe_updates(&self) -> Result<async_nats::Subscriber> {
        let subject = format!("voice.session.{}.>", self.session_id);

        info!("Subscribing to session updates on {}", subject);

        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .context("Failed to subscribe to session updates")?;

        Ok(subscriber)
    }

    /// Republish every session update until the session's update channel closes
    pub fn forward_updates(self: Arc<Self>, mut updates: broadcast::Receiver<SessionUpdate>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Forwarding session updates to NATS");
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        if let Err(e) = self.publish_update(&update).await {
                            warn!("Failed to publish update: {:#}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("NATS forwarder lagged, {} updates dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("NATS update forwarder stopped");
        })
    }
}

/// Diagnostic sink that publishes every event to NATS
pub struct NatsDiagnosticSink {
    client: Arc<NatsClient>,
    runtime: tokio::runtime::Handle,
}

impl NatsDiagnosticSink {
    /// Must be created inside a Tokio runtime
    pub fn new(client: Arc<NatsClient>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().context("No Tokio runtime for NATS diagnostics")?;
        Ok(Self { client, runtime })
    }
}

impl DiagnosticSink for NatsDiagnosticSink {
    fn emit(&self, event: DiagnosticEvent) {
        let client = Arc::clone(&self.client);
        self.runtime.spawn(async move {
            if let Err(e) = client.publish_diagnostic(&event).await {
                debug!("Diagnostic not published: {:#}", e);
            }
        });
    }
}
