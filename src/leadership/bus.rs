use super::messages::LeadershipMessage;
use anyhow::{Context, Result};
use async_nats::Client;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const LOCAL_CAPACITY: usize = 64;

/// Broadcast medium shared by the windows of one browser profile.
///
/// Delivery is best-effort and unacknowledged; every subscriber (including
/// the sender) sees messages in send order.
#[async_trait::async_trait]
pub trait LeadershipBus: Send + Sync {
    async fn publish(&self, message: &LeadershipMessage) -> Result<()>;

    async fn subscribe(&self) -> Result<mpsc::Receiver<LeadershipMessage>>;

    fn name(&self) -> &str;
}

/// Opens the bus scoped to one session code
#[async_trait::async_trait]
pub trait BusFactory: Send + Sync {
    async fn open(&self, session_code: &str) -> Result<Arc<dyn LeadershipBus>>;
}

type ChannelMap = HashMap<String, Weak<broadcast::Sender<LeadershipMessage>>>;
type Channels = Arc<Mutex<ChannelMap>>;

/// In-process bus hub; all windows created from clones of one hub share a
/// profile. A session's channel lives as long as one of its buses does.
#[derive(Clone, Default)]
pub struct LocalBusHub {
    channels: Channels,
}

impl LocalBusHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self, session_code: &str) -> LocalBus {
        let mut channels = lock(&self.channels);
        channels.retain(|_, tx| tx.strong_count() > 0);
        let tx = match channels.get(session_code).and_then(Weak::upgrade) {
            Some(tx) => tx,
            None => {
                let tx = Arc::new(broadcast::channel(LOCAL_CAPACITY).0);
                channels.insert(session_code.to_string(), Arc::downgrade(&tx));
                tx
            }
        };
        LocalBus {
            tx,
            session_code: session_code.to_string(),
            channels: self.channels.clone(),
        }
    }

    /// Session codes with at least one open bus
    pub fn open_sessions(&self) -> usize {
        lock(&self.channels)
            .values()
            .filter(|tx| tx.strong_count() > 0)
            .count()
    }
}

fn lock(channels: &Channels) -> MutexGuard<'_, ChannelMap> {
    channels
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl BusFactory for LocalBusHub {
    async fn open(&self, session_code: &str) -> Result<Arc<dyn LeadershipBus>> {
        Ok(Arc::new(self.bus(session_code)))
    }
}

pub struct LocalBus {
    tx: Arc<broadcast::Sender<LeadershipMessage>>,
    session_code: String,
    channels: Channels,
}

impl Drop for LocalBus {
    fn drop(&mut self) {
        // `bus` upgrades under the same lock, so the count cannot grow here.
        let mut channels = lock(&self.channels);
        if Arc::strong_count(&self.tx) == 1 {
            channels.remove(&self.session_code);
        }
        channels.retain(|_, tx| tx.strong_count() > 0);
    }
}

#[async_trait::async_trait]
impl LeadershipBus for LocalBus {
    async fn publish(&self, message: &LeadershipMessage) -> Result<()> {
        // No subscribers is fine: nobody else has the session open.
        let _ = self.tx.send(message.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<LeadershipMessage>> {
        let mut rx = self.tx.subscribe();
        let (tx, out) = mpsc::channel(LOCAL_CAPACITY);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Leadership bus lagged, {} messages skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(out)
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Leadership bus over NATS, one subject per profile and session
pub struct NatsBusFactory {
    client: Client,
    profile_id: String,
}

impl NatsBusFactory {
    pub fn new(client: Client, profile_id: impl Into<String>) -> Self {
        Self {
            client,
            profile_id: profile_id.into(),
        }
    }

    pub fn subject(&self, session_code: &str) -> String {
        format!("mediator.leadership.{}.{}", self.profile_id, session_code)
    }
}

#[async_trait::async_trait]
impl BusFactory for NatsBusFactory {
    async fn open(&self, session_code: &str) -> Result<Arc<dyn LeadershipBus>> {
        let subject = self.subject(session_code);
        info!("Leadership bus on {}", subject);
        Ok(Arc::new(NatsBus {
            client: self.client.clone(),
            subject,
        }))
    }
}

pub struct NatsBus {
    client: Client,
    subject: String,
}

#[async_trait::async_trait]
impl LeadershipBus for NatsBus {
    async fn publish(&self, message: &LeadershipMessage) -> Result<()> {
        let payload = serde_json::to_vec(message).context("Failed to encode leadership message")?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .context("Failed to publish leadership message")?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<LeadershipMessage>> {
        let mut subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .context("Failed to subscribe to leadership bus")?;

        let (tx, rx) = mpsc::channel(LOCAL_CAPACITY);
        let subject = self.subject.clone();

        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<LeadershipMessage>(&msg.payload) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed leadership message: {}", e),
                }
            }
            debug!("Leadership subscription on {} ended", subject);
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        "nats"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(sender: &str) -> LeadershipMessage {
        LeadershipMessage::LeaderClaimed {
            speaker_id: "p1".to_string(),
            sender_id: sender.to_string(),
            claimed_at: 0,
        }
    }

    #[tokio::test]
    async fn test_local_bus_scoped_by_session() {
        let hub = LocalBusHub::new();
        let a = hub.open("AAA111").await.unwrap();
        let b = hub.open("AAA111").await.unwrap();
        let other = hub.open("BBB222").await.unwrap();

        let mut rx_b = b.subscribe().await.unwrap();
        let mut rx_other = other.subscribe().await.unwrap();

        a.publish(&claim("w1")).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), claim("w1"));
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_hub_forgets_closed_sessions() {
        let hub = LocalBusHub::new();
        let a = hub.bus("AAA111");
        let b = hub.bus("AAA111");
        let other = hub.bus("BBB222");
        assert_eq!(hub.open_sessions(), 2);

        drop(a);
        assert_eq!(hub.open_sessions(), 2);
        drop(b);
        assert_eq!(hub.open_sessions(), 1);
        drop(other);
        assert_eq!(hub.open_sessions(), 0);

        // Reopening starts a fresh channel
        let bus = hub.bus("AAA111");
        let mut rx = bus.subscribe().await.unwrap();
        bus.publish(&claim("w1")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), claim("w1"));
    }

    #[tokio::test]
    async fn test_local_bus_preserves_send_order() {
        let hub = LocalBusHub::new();
        let bus = hub.bus("AAA111");
        let mut rx = bus.subscribe().await.unwrap();

        for sender in ["w1", "w2", "w3"] {
            bus.publish(&claim(sender)).await.unwrap();
        }
        for sender in ["w1", "w2", "w3"] {
            assert_eq!(rx.recv().await.unwrap().sender_id(), sender);
        }
    }
}
