use super::bus::LeadershipBus;
use super::messages::LeadershipMessage;
use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadershipSettings {
    /// Wait between announcing a turn and claiming it
    pub debounce_ms: u64,
    /// Scope of the cross-window bus (one browser profile)
    pub profile_id: String,
}

impl Default for LeadershipSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            profile_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadershipStatus {
    pub window_id: String,
    pub participant_id: Option<String>,
    pub active_speaker_id: Option<String>,
    pub is_leader: bool,
    pub claim_pending: bool,
}

#[derive(Debug, Default)]
struct Inner {
    participant_id: Option<String>,
    active_speaker: Option<String>,
    /// Generation of the claim waiting out the debounce
    pending_claim: Option<u64>,
    generation: u64,
    /// When this window last broadcast a claim
    claimed_at: Option<i64>,
}

impl Inner {
    fn is_my_turn(&self) -> bool {
        matches!(
            (&self.participant_id, &self.active_speaker),
            (Some(me), Some(speaker)) if me == speaker
        )
    }
}

/// Decides which window of a participant captures and forwards audio.
///
/// Only the window whose participant holds the active turn may lead. On
/// the turn start it announces `TURN_STARTED`, waits one debounce window
/// and claims. When a foreign claim for the same participant meets this
/// window's own, both sides rank the two claims by their broadcast
/// timestamps: inside one debounce window the greater window id wins,
/// otherwise the later claim does.
pub struct LeadershipCoordinator {
    window_id: String,
    bus: Arc<dyn LeadershipBus>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    leader: watch::Sender<bool>,
    inner: Mutex<Inner>,
}

impl LeadershipCoordinator {
    pub fn new(
        bus: Arc<dyn LeadershipBus>,
        clock: Arc<dyn Clock>,
        settings: &LeadershipSettings,
    ) -> Arc<Self> {
        Self::with_window_id(uuid::Uuid::new_v4().to_string(), bus, clock, settings)
    }

    pub fn with_window_id(
        window_id: String,
        bus: Arc<dyn LeadershipBus>,
        clock: Arc<dyn Clock>,
        settings: &LeadershipSettings,
    ) -> Arc<Self> {
        let (leader, _rx) = watch::channel(false);
        info!("Leadership window {} on {} bus", window_id, bus.name());
        Arc::new(Self {
            window_id,
            bus,
            clock,
            debounce: Duration::from_millis(settings.debounce_ms),
            leader,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    /// Leader flag, for the audio forwarder and host signals
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader.subscribe()
    }

    pub fn status(&self) -> LeadershipStatus {
        let inner = self.inner();
        LeadershipStatus {
            window_id: self.window_id.clone(),
            participant_id: inner.participant_id.clone(),
            active_speaker_id: inner.active_speaker.clone(),
            is_leader: self.is_leader(),
            claim_pending: inner.pending_claim.is_some(),
        }
    }

    /// Subscribe to the bus and handle foreign messages until it closes
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        let mut rx = self.bus.subscribe().await?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                this.handle_message(message).await;
            }
            debug!("Leadership listener for {} ended", this.window_id);
        }))
    }

    /// Bind the local participant once the authority assigns one
    pub async fn set_participant(self: &Arc<Self>, participant_id: Option<String>) {
        let changed = {
            let mut inner = self.inner();
            if inner.participant_id == participant_id {
                false
            } else {
                inner.participant_id = participant_id;
                true
            }
        };
        if changed {
            let speaker = self.inner().active_speaker.clone();
            self.reconcile(speaker, true).await;
        }
    }

    /// Follow the authority's active speaker (`None` outside an active turn)
    pub async fn on_active_speaker(self: &Arc<Self>, speaker_id: Option<String>) {
        self.reconcile(speaker_id, false).await;
    }

    async fn reconcile(self: &Arc<Self>, speaker_id: Option<String>, force: bool) {
        let claim = {
            let mut inner = self.inner();
            if !force && inner.active_speaker == speaker_id {
                return;
            }
            inner.active_speaker = speaker_id;

            if inner.is_my_turn() {
                if self.is_leader() || inner.pending_claim.is_some() {
                    None
                } else {
                    inner.participant_id.clone()
                }
            } else {
                inner.pending_claim = None;
                None
            }
        };

        match claim {
            Some(me) => {
                self.publish(LeadershipMessage::TurnStarted {
                    speaker_id: me,
                    sender_id: self.window_id.clone(),
                })
                .await;
                self.schedule_claim();
            }
            None => {
                let my_turn = self.inner().is_my_turn();
                if !my_turn {
                    self.release().await;
                }
            }
        }
    }

    /// Claim after one debounce window unless something cancels it first
    fn schedule_claim(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner();
            inner.generation += 1;
            inner.pending_claim = Some(inner.generation);
            inner.generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;

            let me = {
                let mut inner = this.inner();
                if inner.pending_claim != Some(generation) || !inner.is_my_turn() {
                    debug!("Claim {} by {} abandoned", generation, this.window_id);
                    return;
                }
                inner.pending_claim = None;
                let claimed_at = this.clock.now_ms();
                inner.claimed_at = Some(claimed_at);
                inner.participant_id.clone().map(|me| (me, claimed_at))
            };
            let Some((me, claimed_at)) = me else {
                return;
            };

            this.leader.send_replace(true);
            info!("Window {} leads recording for {}", this.window_id, me);
            this.publish(LeadershipMessage::LeaderClaimed {
                speaker_id: me,
                sender_id: this.window_id.clone(),
                claimed_at,
            })
            .await;
        });
    }

    /// Give up leadership (turn over, listening stopped, conversation ended)
    pub async fn release(&self) {
        let me = {
            let mut inner = self.inner();
            inner.pending_claim = None;
            inner.claimed_at = None;
            inner.participant_id.clone()
        };

        if !self.leader.send_replace(false) {
            return;
        }
        info!("Window {} released recording leadership", self.window_id);
        if let Some(me) = me {
            self.publish(LeadershipMessage::LeaderReleased {
                speaker_id: me,
                sender_id: self.window_id.clone(),
            })
            .await;
        }
    }

    /// React to a message from the bus; own messages are ignored
    pub async fn handle_message(self: &Arc<Self>, message: LeadershipMessage) {
        if message.sender_id() == self.window_id {
            return;
        }

        match message {
            LeadershipMessage::TurnStarted { speaker_id, .. } => {
                let mine = self.inner().participant_id.as_deref() == Some(speaker_id.as_str());
                if !mine && self.is_leader() {
                    debug!("Turn started for {}; yielding", speaker_id);
                    self.release().await;
                }
            }
            LeadershipMessage::LeaderClaimed {
                speaker_id,
                sender_id,
                claimed_at,
            } => self.on_foreign_claim(&speaker_id, &sender_id, claimed_at),
            LeadershipMessage::LeaderReleased { .. } => {
                let claim = {
                    let inner = self.inner();
                    inner.is_my_turn() && inner.pending_claim.is_none() && !self.is_leader()
                };
                if claim {
                    debug!("Leadership released; {} claiming", self.window_id);
                    self.schedule_claim();
                }
            }
        }
    }

    fn on_foreign_claim(&self, speaker_id: &str, sender_id: &str, their_claim: i64) {
        let mut inner = self.inner();
        if inner.participant_id.as_deref() != Some(speaker_id) {
            return;
        }

        if inner.pending_claim.take().is_some() {
            debug!("Claim by {} abandoned for {}", self.window_id, sender_id);
        }
        if !self.is_leader() {
            return;
        }

        let debounce_ms = self.debounce.as_millis() as i64;
        let keeps = inner.claimed_at.is_some_and(|my_claim| {
            outranks(
                (my_claim, self.window_id.as_str()),
                (their_claim, sender_id),
                debounce_ms,
            )
        });
        if keeps {
            debug!(
                "Claim from {} loses to {}; keeping leadership",
                sender_id, self.window_id
            );
            return;
        }

        inner.claimed_at = None;
        drop(inner);
        self.leader.send_replace(false);
        info!("Window {} yields recording to {}", self.window_id, sender_id);
    }

    async fn publish(&self, message: LeadershipMessage) {
        if let Err(e) = self.bus.publish(&message).await {
            // Claims are best-effort; the next turn start corrects it.
            warn!("Failed to publish leadership message: {:#}", e);
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whether claim `mine` beats `theirs`. Depends only on what both claimers
/// broadcast, so the two sides always agree.
fn outranks(mine: (i64, &str), theirs: (i64, &str), debounce_ms: i64) -> bool {
    let (my_at, my_id) = mine;
    let (their_at, their_id) = theirs;
    if (my_at - their_at).abs() < debounce_ms || my_at == their_at {
        my_id > their_id
    } else {
        my_at > their_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tokio::sync::mpsc;

    /// Bus that only records what was published
    #[derive(Default)]
    struct RecordingBus {
        sent: Mutex<Vec<LeadershipMessage>>,
    }

    #[async_trait::async_trait]
    impl LeadershipBus for RecordingBus {
        async fn publish(&self, message: &LeadershipMessage) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<LeadershipMessage>> {
            Ok(mpsc::channel(1).1)
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn window(
        id: &str,
        debounce_ms: u64,
        clock: Arc<ManualClock>,
    ) -> (Arc<LeadershipCoordinator>, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::default());
        let settings = LeadershipSettings {
            debounce_ms,
            ..LeadershipSettings::default()
        };
        let coordinator =
            LeadershipCoordinator::with_window_id(id.to_string(), bus.clone(), clock, &settings);
        (coordinator, bus)
    }

    async fn become_leader(coordinator: &Arc<LeadershipCoordinator>) {
        coordinator.set_participant(Some("p1".to_string())).await;
        coordinator.on_active_speaker(Some("p1".to_string())).await;
        let mut rx = coordinator.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|leader| *leader))
            .await
            .unwrap()
            .unwrap();
    }

    fn claim_from(sender: &str, claimed_at: i64) -> LeadershipMessage {
        LeadershipMessage::LeaderClaimed {
            speaker_id: "p1".to_string(),
            sender_id: sender.to_string(),
            claimed_at,
        }
    }

    #[tokio::test]
    async fn test_announces_then_claims() {
        let (coordinator, bus) = window("w1", 10, Arc::new(ManualClock::new(0)));
        become_leader(&coordinator).await;

        let sent = bus.sent.lock().unwrap().clone();
        assert!(matches!(sent[0], LeadershipMessage::TurnStarted { .. }));
        assert_eq!(sent[1], claim_from("w1", 0));
        assert!(!coordinator.status().claim_pending);
    }

    #[tokio::test]
    async fn test_no_claim_for_other_speaker() {
        let (coordinator, bus) = window("w1", 10, Arc::new(ManualClock::new(0)));
        coordinator.set_participant(Some("p1".to_string())).await;
        coordinator.on_active_speaker(Some("p2".to_string())).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!coordinator.is_leader());
        assert!(bus.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_claim_abandons_pending_claim() {
        let (coordinator, _bus) = window("w1", 200, Arc::new(ManualClock::new(0)));
        coordinator.set_participant(Some("p1".to_string())).await;
        coordinator.on_active_speaker(Some("p1".to_string())).await;
        assert!(coordinator.status().claim_pending);

        coordinator.handle_message(claim_from("w0", 0)).await;
        assert!(!coordinator.status().claim_pending);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!coordinator.is_leader());
    }

    #[tokio::test]
    async fn test_own_messages_ignored() {
        let (coordinator, _bus) = window("w1", 10, Arc::new(ManualClock::new(0)));
        become_leader(&coordinator).await;

        coordinator.handle_message(claim_from("w1", 0)).await;
        assert!(coordinator.is_leader());
    }

    #[tokio::test]
    async fn test_concurrent_claims_keep_greater_window() {
        let clock = Arc::new(ManualClock::new(1_000));

        let (greater, _) = window("w9", 10, clock.clone());
        become_leader(&greater).await;
        greater.handle_message(claim_from("w1", 1_000)).await;
        assert!(greater.is_leader());

        let (lesser, _) = window("w1", 10, clock.clone());
        become_leader(&lesser).await;
        lesser.handle_message(claim_from("w9", 1_000)).await;
        assert!(!lesser.is_leader());
    }

    #[tokio::test]
    async fn test_later_claim_wins_outside_debounce() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (coordinator, _) = window("w9", 10, clock.clone());
        become_leader(&coordinator).await;

        clock.advance(500);
        coordinator.handle_message(claim_from("w1", 1_500)).await;
        assert!(!coordinator.is_leader());
    }

    #[test]
    fn test_claim_ranking_is_symmetric() {
        for (a, b) in [(1_000, 1_045), (1_000, 1_050), (1_000, 1_000), (1_200, 1_000)] {
            let a_wins = outranks((a, "w9"), (b, "w1"), 50);
            let b_wins = outranks((b, "w1"), (a, "w9"), 50);
            assert_ne!(a_wins, b_wins, "claims at {} and {}", a, b);
        }
    }

    #[tokio::test]
    async fn test_delayed_concurrent_claims_leave_one_leader() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (w9, _) = window("w9", 50, clock.clone());
        become_leader(&w9).await;

        clock.set(1_045);
        let (w1, _) = window("w1", 50, clock.clone());
        become_leader(&w1).await;

        // Each claim reaches the other window late
        clock.set(1_060);
        w1.handle_message(claim_from("w9", 1_000)).await;
        clock.set(1_105);
        w9.handle_message(claim_from("w1", 1_045)).await;

        assert!(w9.is_leader());
        assert!(!w1.is_leader());
    }

    #[tokio::test]
    async fn test_delayed_later_claim_leaves_one_leader() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (w9, _) = window("w9", 50, clock.clone());
        become_leader(&w9).await;

        clock.set(1_100);
        let (w1, _) = window("w1", 50, clock.clone());
        become_leader(&w1).await;

        // The earlier claim arrives after the later one was settled
        clock.set(1_110);
        w9.handle_message(claim_from("w1", 1_100)).await;
        clock.set(1_300);
        w1.handle_message(claim_from("w9", 1_000)).await;

        assert!(!w9.is_leader());
        assert!(w1.is_leader());
    }

    #[tokio::test]
    async fn test_turn_change_releases() {
        let (coordinator, bus) = window("w1", 10, Arc::new(ManualClock::new(0)));
        become_leader(&coordinator).await;

        coordinator.on_active_speaker(Some("p2".to_string())).await;
        assert!(!coordinator.is_leader());
        let last = bus.sent.lock().unwrap().last().cloned();
        assert_eq!(
            last,
            Some(LeadershipMessage::LeaderReleased {
                speaker_id: "p1".to_string(),
                sender_id: "w1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_release_after_foreign_turn_started() {
        let (coordinator, _bus) = window("w1", 10, Arc::new(ManualClock::new(0)));
        become_leader(&coordinator).await;

        coordinator
            .handle_message(LeadershipMessage::TurnStarted {
                speaker_id: "p2".to_string(),
                sender_id: "w7".to_string(),
            })
            .await;
        assert!(!coordinator.is_leader());
    }
}
