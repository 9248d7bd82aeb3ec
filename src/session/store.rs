use super::state::{Phase, Session, SessionPatch};
use crate::clock::Clock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Immutable, versioned view of the session mirror
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    /// Incremented on every applied push
    pub version: u64,
    pub session: Session,
    /// The participant this process acts for, once the authority bound one
    pub local_participant_id: Option<String>,
    /// Pushes whose phase did not follow the expected successor table
    pub unexpected_transitions: u64,
}

impl SessionSnapshot {
    pub fn is_local_speaker(&self) -> bool {
        match (&self.local_participant_id, &self.session.current_speaker_id) {
            (Some(local), Some(speaker)) => local == speaker,
            _ => false,
        }
    }

    /// Identity of the current turn, if one is running
    pub fn turn_key(&self) -> Option<TurnKey> {
        let session = &self.session;
        Some(TurnKey {
            round: session.round_number,
            speaker_id: session.current_speaker_id.clone()?,
            started_at: session.turn_started_at?,
        })
    }
}

/// Identifies one turn: a speaker, a round and the local start time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TurnKey {
    pub round: u32,
    pub speaker_id: String,
    pub started_at: i64,
}

/// What an applied push changed
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub version: u64,
    pub previous_phase: Phase,
    pub phase: Phase,
    pub speaker_changed: bool,
    /// A new turn start was recorded
    pub turn_restarted: bool,
    pub unexpected_transition: bool,
}

impl Change {
    pub fn phase_changed(&self) -> bool {
        self.previous_phase != self.phase
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(Change),
    /// The mirror is ended; the push was dropped
    Ignored,
}

/// Versioned container for the session mirror.
///
/// Every push replaces the whole snapshot, so subscribers never observe a
/// half-applied update.
pub struct SessionStore {
    tx: watch::Sender<Arc<SessionSnapshot>>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(SessionSnapshot::default()));
        Self { tx, clock }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.tx.borrow().clone()
    }

    /// Apply a partial authority push
    pub fn apply(&self, patch: &SessionPatch) -> ApplyOutcome {
        let now = self.clock.now_ms();
        self.commit(|current| patch.merged_into(current, now))
    }

    /// Replace the whole session with a full authority snapshot (reconnect)
    pub fn replace(&self, session: Session) -> ApplyOutcome {
        let now = self.clock.now_ms();
        self.commit(move |_| {
            let mut session = session;
            if session.turn_started_at.is_some() {
                session.turn_started_at = Some(now);
            }
            session
        })
    }

    /// Mark a participant's connection state as pushed by the authority
    pub fn set_connected(&self, participant_id: &str, connected: bool) -> ApplyOutcome {
        self.commit(|current| {
            let mut next = current.clone();
            for participant in next
                .participants
                .iter_mut()
                .chain(next.observers.iter_mut())
                .filter(|p| p.id == participant_id)
            {
                participant.is_connected = connected;
            }
            next
        })
    }

    /// Record which participant this process acts for
    pub fn bind_participant(&self, participant_id: &str) {
        info!("Bound local participant {}", participant_id);
        self.tx.send_modify(|snapshot| {
            let mut next = (**snapshot).clone();
            next.local_participant_id = Some(participant_id.to_string());
            next.version += 1;
            *snapshot = Arc::new(next);
        });
    }

    /// Drop everything and return to setup (explicit "start a new session")
    pub fn reset(&self) {
        info!("Session mirror reset");
        let version = self.tx.borrow().version + 1;
        self.tx.send_replace(Arc::new(SessionSnapshot {
            version,
            ..SessionSnapshot::default()
        }));
    }

    fn commit<F>(&self, build: F) -> ApplyOutcome
    where
        F: FnOnce(&Session) -> Session,
    {
        let mut outcome = ApplyOutcome::Ignored;

        self.tx.send_if_modified(|snapshot| {
            let current = &snapshot.session;
            if current.phase.is_terminal() {
                debug!("Session ended; ignoring push");
                return false;
            }

            let next = build(current);
            let unexpected = !current.phase.can_transition_to(next.phase);
            if unexpected {
                // Still applied: the authority is the source of truth.
                warn!(
                    "Unexpected phase transition {:?} -> {:?}",
                    current.phase, next.phase
                );
            }

            let change = Change {
                version: snapshot.version + 1,
                previous_phase: current.phase,
                phase: next.phase,
                speaker_changed: current.current_speaker_id != next.current_speaker_id,
                turn_restarted: next.turn_started_at.is_some()
                    && current.turn_started_at != next.turn_started_at,
                unexpected_transition: unexpected,
            };

            if change.phase_changed() {
                info!("Phase {:?} -> {:?}", change.previous_phase, change.phase);
            }

            *snapshot = Arc::new(SessionSnapshot {
                version: change.version,
                session: next,
                local_participant_id: snapshot.local_participant_id.clone(),
                unexpected_transitions: snapshot.unexpected_transitions + u64::from(unexpected),
            });
            outcome = ApplyOutcome::Applied(change);
            true
        });

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::state::{Participant, ParticipantRole};

    fn store_at(now: i64) -> (SessionStore, ManualClock) {
        let clock = ManualClock::new(now);
        (SessionStore::new(Arc::new(clock.clone())), clock)
    }

    fn participant(id: &str) -> Participant {
        Participant {
            id: id.to_string(),
            name: id.to_uppercase(),
            role: ParticipantRole::Host,
            is_connected: true,
        }
    }

    #[test]
    fn test_apply_bumps_version_and_reports_change() {
        let (store, _clock) = store_at(1_000);
        let outcome = store.apply(&SessionPatch::phase(Phase::Connecting));

        let ApplyOutcome::Applied(change) = outcome else {
            panic!("push should apply");
        };
        assert_eq!(change.version, 1);
        assert!(change.phase_changed());
        assert!(!change.unexpected_transition);
        assert_eq!(store.snapshot().session.phase, Phase::Connecting);
    }

    #[test]
    fn test_turn_start_uses_local_clock() {
        let (store, _clock) = store_at(7_000);
        let patch = SessionPatch {
            phase: Some(Phase::Active),
            current_speaker_id: Some(Some("a".to_string())),
            turn_started_at: Some(Some(123)),
            ..SessionPatch::default()
        };
        store.apply(&SessionPatch::phase(Phase::PreConversation));
        let ApplyOutcome::Applied(change) = store.apply(&patch) else {
            panic!("push should apply");
        };

        assert!(change.turn_restarted);
        assert!(change.speaker_changed);
        assert_eq!(store.snapshot().session.turn_started_at, Some(7_000));
    }

    #[test]
    fn test_unexpected_transition_still_applied() {
        let (store, _clock) = store_at(0);
        let ApplyOutcome::Applied(change) = store.apply(&SessionPatch::phase(Phase::Summary)) else {
            panic!("push should apply");
        };

        assert!(change.unexpected_transition);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.session.phase, Phase::Summary);
        assert_eq!(snapshot.unexpected_transitions, 1);
    }

    #[test]
    fn test_ended_is_terminal() {
        let (store, _clock) = store_at(0);
        store.apply(&SessionPatch::phase(Phase::Connecting));
        store.apply(&SessionPatch::phase(Phase::Ended));
        let version = store.snapshot().version;

        assert_eq!(store.apply(&SessionPatch::phase(Phase::Active)), ApplyOutcome::Ignored);
        assert_eq!(store.replace(Session::default()), ApplyOutcome::Ignored);
        assert_eq!(store.set_connected("a", false), ApplyOutcome::Ignored);
        assert_eq!(store.snapshot().version, version);
        assert_eq!(store.snapshot().session.phase, Phase::Ended);

        store.reset();
        assert_eq!(store.snapshot().session.phase, Phase::Setup);
        assert!(store.snapshot().version > version);
    }

    #[test]
    fn test_set_connected_updates_participant() {
        let (store, _clock) = store_at(0);
        store.apply(&SessionPatch {
            participants: Some(vec![participant("a"), participant("b")]),
            ..SessionPatch::default()
        });

        store.set_connected("b", false);
        let snapshot = store.snapshot();
        assert!(snapshot.session.participant("a").unwrap().is_connected);
        assert!(!snapshot.session.participant("b").unwrap().is_connected);
    }

    #[test]
    fn test_subscribers_see_whole_snapshots() {
        let (store, _clock) = store_at(0);
        let mut rx = store.subscribe();
        store.bind_participant("a");
        store.apply(&SessionPatch {
            phase: Some(Phase::Connecting),
            session_code: Some("XYZ789".to_string()),
            ..SessionPatch::default()
        });

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.session.session_code, "XYZ789");
        assert_eq!(seen.local_participant_id.as_deref(), Some("a"));
        assert_eq!(seen.version, 2);
    }
}
