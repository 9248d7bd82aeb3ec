use super::client::{AuthorityChannel, AuthorityError};
use super::messages::ClientRequest;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// In-memory authority channel.
///
/// Every request is handed to the paired receiver, which plays the
/// authority in tests and offline runs.
pub struct ChannelAuthority {
    tx: mpsc::UnboundedSender<ClientRequest>,
    connected: AtomicBool,
}

impl ChannelAuthority {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                connected: AtomicBool::new(true),
            },
            rx,
        )
    }

    /// Simulate a transport drop (or recovery)
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AuthorityChannel for ChannelAuthority {
    async fn send(&self, request: ClientRequest) -> Result<(), AuthorityError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AuthorityError::Disconnected);
        }

        debug!("Sent {} to in-memory authority", request.name());
        self.tx
            .send(request)
            .map_err(|_| AuthorityError::Disconnected)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
