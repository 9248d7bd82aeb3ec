use super::info::{PersistedSessionInfo, DEFAULT_WINDOW_MS};
use super::store::SessionInfoStore;
use crate::authority::{AuthorityChannel, AuthorityError, ClientRequest};
use crate::clock::Clock;
use crate::session::{Phase, SessionSnapshot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Directory for the session info file; in-memory when unset
    pub storage_dir: Option<PathBuf>,
    pub window_hours: u32,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            storage_dir: None,
            window_hours: 24,
        }
    }
}

impl RecoverySettings {
    pub fn window_ms(&self) -> i64 {
        i64::from(self.window_hours) * 60 * 60 * 1000
    }
}

/// Result of the load-time check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "info", rename_all = "lowercase")]
pub enum RecoveryOffer {
    /// A session the user may rejoin
    Offer(PersistedSessionInfo),
    Nothing,
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("no session is offered for recovery")]
    NothingOffered,

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("session info store failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// What was last written, to avoid rewriting on every push
#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedKey {
    session_code: String,
    participant_id: String,
    phase: Phase,
}

#[derive(Debug, Default)]
struct State {
    offered: Option<PersistedSessionInfo>,
    saved: Option<SavedKey>,
}

/// Persists the local identity while a session runs and offers it back
/// after a reload, inside a bounded window.
pub struct ReconnectionManager {
    store: Arc<dyn SessionInfoStore>,
    clock: Arc<dyn Clock>,
    window_ms: i64,
    state: Mutex<State>,
}

impl ReconnectionManager {
    pub fn new(store: Arc<dyn SessionInfoStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_window(store, clock, DEFAULT_WINDOW_MS)
    }

    pub fn with_window(
        store: Arc<dyn SessionInfoStore>,
        clock: Arc<dyn Clock>,
        window_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            window_ms,
            state: Mutex::new(State::default()),
        }
    }

    /// Entry offered by the last `check_on_load`, if still pending
    pub fn offered(&self) -> Option<PersistedSessionInfo> {
        self.state().offered.clone()
    }

    /// Read the persisted entry once; stale entries are deleted
    pub fn check_on_load(&self) -> Result<RecoveryOffer, RecoveryError> {
        let Some(info) = self.store.load()? else {
            self.state().offered = None;
            return Ok(RecoveryOffer::Nothing);
        };

        let now = self.clock.now_ms();
        if !info.is_within(self.window_ms, now) {
            info!(
                "Discarding session {} saved {}h ago",
                info.session_code,
                info.age_ms(now) / (60 * 60 * 1000)
            );
            self.store.clear()?;
            self.state().offered = None;
            return Ok(RecoveryOffer::Nothing);
        }

        info!(
            "Offering reconnection to session {} as {}",
            info.session_code, info.participant_name
        );
        self.state().offered = Some(info.clone());
        Ok(RecoveryOffer::Offer(info))
    }

    /// Ask the authority to rebind the offered identity
    pub async fn reconnect(
        &self,
        authority: &dyn AuthorityChannel,
    ) -> Result<PersistedSessionInfo, RecoveryError> {
        let info = self.offered().ok_or(RecoveryError::NothingOffered)?;

        authority
            .send(ClientRequest::SessionReconnect {
                session_code: info.session_code.clone(),
                participant_id: info.participant_id.clone(),
            })
            .await?;

        info!("Requested reconnection to {}", info.session_code);
        self.state().offered = None;
        Ok(info)
    }

    /// Drop the persisted entry and any pending offer
    pub fn start_fresh(&self) -> Result<(), RecoveryError> {
        {
            let mut state = self.state();
            state.offered = None;
            state.saved = None;
        }
        self.store.clear()?;
        info!("Starting fresh; persisted session cleared");
        Ok(())
    }

    /// Persist or clear the identity as the mirror moves through phases
    pub fn on_session_changed(&self, snapshot: &SessionSnapshot) -> Result<(), RecoveryError> {
        let session = &snapshot.session;

        if session.phase == Phase::Ended {
            let had_entry = {
                let mut state = self.state();
                state.offered = None;
                state.saved.take().is_some()
            };
            self.store.clear()?;
            if had_entry {
                info!("Conversation ended; cleared session {}", session.session_code);
            }
            return Ok(());
        }

        if session.phase == Phase::Setup || session.session_code.is_empty() {
            return Ok(());
        }
        let Some(participant_id) = snapshot.local_participant_id.clone() else {
            return Ok(());
        };

        let key = SavedKey {
            session_code: session.session_code.clone(),
            participant_id: participant_id.clone(),
            phase: session.phase,
        };
        if self.state().saved.as_ref() == Some(&key) {
            return Ok(());
        }

        let participant_name = session
            .participant(&participant_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let info = PersistedSessionInfo {
            session_code: key.session_code.clone(),
            participant_id,
            participant_name,
            saved_at: self.clock.now_ms(),
        };

        if let Err(e) = self.store.save(&info) {
            warn!("Failed to persist session info: {:#}", e);
            return Err(e.into());
        }
        debug!("Persisted session {} at {:?}", info.session_code, key.phase);
        self.state().saved = Some(key);
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
