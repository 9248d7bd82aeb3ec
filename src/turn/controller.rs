use crate::authority::{AuthorityChannel, AuthorityError, ClientRequest};
use crate::clock::Clock;
use crate::session::{PauseReason, Phase, SessionPatch, SessionSnapshot, SessionStore, TurnKey};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Turn timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnSettings {
    /// The extend option is offered when `0 < remaining <= low_time_threshold_secs`
    pub low_time_threshold_secs: i64,
    /// Countdown recompute cadence
    pub tick_interval_ms: u64,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            low_time_threshold_secs: 15,
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("conversation is {0:?}, not active")]
    NotActive(Phase),

    #[error("local participant does not hold the turn")]
    NotSpeaker,

    #[error("turn end already requested for this turn")]
    AlreadyRequested,

    #[error("extension only allowed in the last seconds of a turn (remaining: {0:?})")]
    ExtendNotAllowed(Option<i64>),

    #[error("cannot {action} while {phase:?}")]
    InvalidPhase { action: &'static str, phase: Phase },

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

/// Countdown view of the current turn
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStatus {
    pub phase: Phase,
    pub round_number: u32,
    pub speaker_id: Option<String>,
    pub remaining_seconds: Option<i64>,
    pub show_extend_option: bool,
    pub is_local_speaker: bool,
}

/// `turn_time_seconds - floor((now - turn_started_at) / 1000)`
pub fn remaining_seconds(snapshot: &SessionSnapshot, now_ms: i64) -> Option<i64> {
    let session = &snapshot.session;
    let started = session.turn_started_at?;
    let elapsed = (now_ms - started).div_euclid(1000);
    Some(i64::from(session.turn_time_seconds) - elapsed)
}

/// Forwards turn requests to the authority.
///
/// Nothing here mutates the session mirror: the authority's next push is the
/// only way a turn officially changes.
pub struct TurnController {
    store: Arc<SessionStore>,
    authority: Arc<dyn AuthorityChannel>,
    clock: Arc<dyn Clock>,
    settings: TurnSettings,
    /// Last turn this window asked to end
    end_requested: Mutex<Option<TurnKey>>,
}

impl TurnController {
    pub fn new(
        store: Arc<SessionStore>,
        authority: Arc<dyn AuthorityChannel>,
        clock: Arc<dyn Clock>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            store,
            authority,
            clock,
            settings,
            end_requested: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    pub fn status(&self) -> TurnStatus {
        self.status_of(&self.store.snapshot())
    }

    pub fn status_of(&self, snapshot: &SessionSnapshot) -> TurnStatus {
        let session = &snapshot.session;
        let remaining = match session.phase {
            Phase::Active => remaining_seconds(snapshot, self.clock.now_ms()),
            _ => None,
        };

        TurnStatus {
            phase: session.phase,
            round_number: session.round_number,
            speaker_id: session.current_speaker_id.clone(),
            remaining_seconds: remaining,
            show_extend_option: remaining
                .is_some_and(|r| r > 0 && r <= self.settings.low_time_threshold_secs),
            is_local_speaker: snapshot.is_local_speaker(),
        }
    }

    /// "I'm done", or a voice-activity turn end
    pub async fn end_turn(&self) -> Result<(), TurnError> {
        let snapshot = self.store.snapshot();
        let phase = snapshot.session.phase;
        if phase != Phase::Active {
            return Err(TurnError::NotActive(phase));
        }
        if !snapshot.is_local_speaker() {
            return Err(TurnError::NotSpeaker);
        }

        let key = snapshot.turn_key();
        {
            let mut requested = self.lock_requested();
            if key.is_some() && *requested == key {
                return Err(TurnError::AlreadyRequested);
            }
            *requested = key.clone();
        }

        info!("Requesting end of turn {:?}", key);
        if let Err(e) = self.authority.send(ClientRequest::TurnEnd).await {
            // Let a retry through.
            *self.lock_requested() = None;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn extend_turn(&self, seconds: u32) -> Result<(), TurnError> {
        let snapshot = self.store.snapshot();
        let phase = snapshot.session.phase;
        if phase != Phase::Active {
            return Err(TurnError::NotActive(phase));
        }
        if !snapshot.is_local_speaker() {
            return Err(TurnError::NotSpeaker);
        }

        let status = self.status_of(&snapshot);
        if !status.show_extend_option {
            return Err(TurnError::ExtendNotAllowed(status.remaining_seconds));
        }

        info!("Requesting {}s extension", seconds);
        self.authority.send(ClientRequest::TurnExtend(seconds)).await?;
        Ok(())
    }

    pub async fn request_pause(&self, reason: PauseReason) -> Result<(), TurnError> {
        let phase = self.store.snapshot().session.phase;
        if !matches!(phase, Phase::Active | Phase::Reflection) {
            return Err(TurnError::InvalidPhase {
                action: "pause",
                phase,
            });
        }

        info!("Requesting pause: {:?}", reason);
        self.authority.send(ClientRequest::PauseRequest(reason)).await?;
        Ok(())
    }

    pub async fn resume_from_pause(&self) -> Result<(), TurnError> {
        let phase = self.store.snapshot().session.phase;
        if phase != Phase::Paused {
            return Err(TurnError::InvalidPhase {
                action: "resume",
                phase,
            });
        }

        self.authority.send(ClientRequest::PauseResume).await?;
        Ok(())
    }

    pub async fn start_breathing(&self) -> Result<(), TurnError> {
        self.forward_in("start breathing", &[Phase::PreConversation], ClientRequest::BreathingStart)
            .await
    }

    pub async fn complete_breathing(&self) -> Result<(), TurnError> {
        self.forward_in("complete breathing", &[Phase::Breathing], ClientRequest::BreathingComplete)
            .await
    }

    pub async fn dismiss_reflection(&self) -> Result<(), TurnError> {
        self.forward_in("dismiss reflection", &[Phase::Reflection], ClientRequest::ReflectionDismiss)
            .await
    }

    pub async fn end_conversation(&self) -> Result<(), TurnError> {
        let phase = self.store.snapshot().session.phase;
        if matches!(phase, Phase::Setup | Phase::Ended) {
            return Err(TurnError::InvalidPhase {
                action: "end conversation",
                phase,
            });
        }

        self.authority.send(ClientRequest::ConversationEnd).await?;
        Ok(())
    }

    /// Offer a partial state to the authority (`session:sync`). The mirror
    /// itself only changes when the authority pushes it back.
    pub async fn sync_session(&self, patch: SessionPatch) -> Result<(), TurnError> {
        let phase = self.store.snapshot().session.phase;
        if matches!(phase, Phase::Setup | Phase::Ended) {
            return Err(TurnError::InvalidPhase {
                action: "sync session",
                phase,
            });
        }

        self.authority.send(ClientRequest::SessionSync(patch)).await?;
        Ok(())
    }

    async fn forward_in(
        &self,
        action: &'static str,
        allowed: &[Phase],
        request: ClientRequest,
    ) -> Result<(), TurnError> {
        let phase = self.store.snapshot().session.phase;
        if !allowed.contains(&phase) {
            warn!("Refusing to {} while {:?}", action, phase);
            return Err(TurnError::InvalidPhase { action, phase });
        }

        self.authority.send(request).await?;
        Ok(())
    }

    fn lock_requested(&self) -> std::sync::MutexGuard<'_, Option<TurnKey>> {
        self.end_requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
