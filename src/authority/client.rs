use super::messages::{ClientRequest, RequestEnvelope, ServerEvent};
use anyhow::{Context, Result};
use async_nats::Client;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Subject every client publishes requests on
pub const REQUEST_SUBJECT: &str = "mediator.authority.requests";

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("authority transport failed: {0}")]
    Transport(String),

    #[error("authority channel closed")]
    Disconnected,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound half of the bidirectional channel to the session authority
#[async_trait::async_trait]
pub trait AuthorityChannel: Send + Sync {
    /// Forward a request. Delivery is acknowledged only by a later push.
    async fn send(&self, request: ClientRequest) -> Result<(), AuthorityError>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Authority reached over NATS.
///
/// Requests go to [`REQUEST_SUBJECT`] wrapped with this client's id; the
/// authority answers on `mediator.client.<client_id>.events`.
pub struct NatsAuthority {
    client: Client,
    client_id: String,
}

impl NatsAuthority {
    /// Connect to NATS server
    pub async fn connect(url: &str, client_id: String) -> Result<Self> {
        info!("Connecting to authority over NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS as client {}", client_id);

        Ok(Self { client, client_id })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Shared connection, reused by the leadership bus
    pub fn nats(&self) -> Client {
        self.client.clone()
    }

    pub fn events_subject(&self) -> String {
        format!("mediator.client.{}.events", self.client_id)
    }

    /// Subscribe to pushes addressed to this client
    pub async fn subscribe_events(&self) -> Result<mpsc::Receiver<ServerEvent>> {
        let subject = self.events_subject();

        info!("Subscribing to authority events on {}", subject);

        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to authority events")?;

        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ServerEvent>(&msg.payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            debug!("Event consumer dropped; closing {}", subject);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse authority event: {}", e);
                    }
                }
            }

            info!("Authority event subscription ended");
        });

        Ok(rx)
    }
}

#[async_trait::async_trait]
impl AuthorityChannel for NatsAuthority {
    async fn send(&self, request: ClientRequest) -> Result<(), AuthorityError> {
        let name = request.name();
        let envelope = RequestEnvelope {
            client_id: self.client_id.clone(),
            request,
        };
        let payload = serde_json::to_vec(&envelope)?;

        self.client
            .publish(REQUEST_SUBJECT.to_string(), payload.into())
            .await
            .map_err(|e| {
                error!("Failed to publish {}: {}", name, e);
                AuthorityError::Transport(e.to_string())
            })?;

        debug!("Sent {} to authority", name);

        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}
