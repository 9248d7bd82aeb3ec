use super::signal::HostSignal;
use crate::authority::{AuthorityChannel, AuthorityError, ClientRequest, ServerEvent};
use crate::capture::{
    CaptureSource, CaptureState, ListenerCommand, ListenerSettings, VoiceListener,
};
use crate::clock::Clock;
use crate::leadership::{
    AudioForwarder, AudioStatus, AudioStatusTracker, BusFactory, LeadershipCoordinator,
    LeadershipSettings, LeadershipStatus, SegmentTarget,
};
use crate::recovery::{
    PersistedSessionInfo, ReconnectionManager, RecoveryError, RecoveryOffer, RecoverySettings,
    SessionInfoStore,
};
use crate::session::{
    ApplyOutcome, Change, PauseReason, Phase, SessionPatch, SessionSnapshot, SessionStore,
};
use crate::turn::{spawn_countdown, TurnController, TurnError, TurnSettings, TurnStatus};
use crate::vad::{ClassifierEvent, VadEvent};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SIGNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub turn: TurnSettings,
    pub listener: ListenerSettings,
    pub leadership: LeadershipSettings,
    pub recovery: RecoverySettings,
    /// Length of each forwarded WAV segment
    pub chunk_duration_ms: u64,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            turn: TurnSettings::default(),
            listener: ListenerSettings::default(),
            leadership: LeadershipSettings::default(),
            recovery: RecoverySettings::default(),
            chunk_duration_ms: 1000,
        }
    }
}

/// Collaborators a core is assembled from
pub struct CoreParts {
    pub authority: Arc<dyn AuthorityChannel>,
    pub bus_factory: Arc<dyn BusFactory>,
    pub info_store: Arc<dyn SessionInfoStore>,
    /// Microphone; `None` runs the conversation text-only
    pub capture: Option<Box<dyn CaptureSource>>,
    pub clock: Arc<dyn Clock>,
}

struct LeadershipSlot {
    session_code: String,
    coordinator: Arc<LeadershipCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for LeadershipSlot {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Default)]
struct CaptureSlot {
    listener: Option<VoiceListener>,
    /// Permission was refused; stay text-only for this session
    denied: bool,
    target: Option<SegmentTarget>,
}

/// One window's turn-taking core.
///
/// Authority pushes flow into the session store; each applied change is
/// fanned out to leadership, the voice listener and recovery. VAD events
/// flow back as turn requests and host signals.
pub struct ConversationCore {
    clock: Arc<dyn Clock>,
    authority: Arc<dyn AuthorityChannel>,
    bus_factory: Arc<dyn BusFactory>,
    store: Arc<SessionStore>,
    turns: Arc<TurnController>,
    recovery: ReconnectionManager,
    settings: CoreSettings,
    signals: broadcast::Sender<HostSignal>,
    audio_status: AudioStatusTracker,
    /// Mirror of the current coordinator's flag, read by the forwarder
    leader: Arc<watch::Sender<bool>>,
    leadership: Mutex<Option<LeadershipSlot>>,
    capture: Mutex<CaptureSlot>,
    vad_rx: StdMutex<Option<mpsc::UnboundedReceiver<VadEvent>>>,
}

impl ConversationCore {
    pub fn new(parts: CoreParts, settings: CoreSettings) -> Arc<Self> {
        let CoreParts {
            authority,
            bus_factory,
            info_store,
            capture,
            clock,
        } = parts;

        let store = Arc::new(SessionStore::new(clock.clone()));
        let turns = Arc::new(TurnController::new(
            store.clone(),
            authority.clone(),
            clock.clone(),
            settings.turn.clone(),
        ));
        let recovery = ReconnectionManager::with_window(
            info_store,
            clock.clone(),
            settings.recovery.window_ms(),
        );
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let audio_status = AudioStatusTracker::new();
        let (leader, _) = watch::channel(false);
        let leader = Arc::new(leader);
        let (vad_tx, vad_rx) = mpsc::unbounded_channel();

        let listener = capture.map(|source| {
            let forwarder = AudioForwarder::new(
                authority.clone(),
                leader.subscribe(),
                settings.chunk_duration_ms,
                audio_status.clone(),
            );
            VoiceListener::new(source, settings.listener.clone(), clock.clone(), vad_tx)
                .with_forwarder(forwarder)
        });
        if listener.is_none() {
            info!("No capture source; running text-only");
        }

        Arc::new(Self {
            clock,
            authority,
            bus_factory,
            store,
            turns,
            recovery,
            settings,
            signals,
            audio_status,
            leader,
            leadership: Mutex::new(None),
            capture: Mutex::new(CaptureSlot {
                listener,
                ..CaptureSlot::default()
            }),
            vad_rx: StdMutex::new(Some(vad_rx)),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.store.snapshot()
    }

    pub fn turns(&self) -> &Arc<TurnController> {
        &self.turns
    }

    pub fn turn_status(&self) -> TurnStatus {
        self.turns.status()
    }

    pub fn recovery(&self) -> &ReconnectionManager {
        &self.recovery
    }

    pub fn audio_status(&self) -> AudioStatus {
        self.audio_status.current()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<HostSignal> {
        self.signals.subscribe()
    }

    pub fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    pub async fn leadership_status(&self) -> Option<LeadershipStatus> {
        self.leadership
            .lock()
            .await
            .as_ref()
            .map(|slot| slot.coordinator.status())
    }

    pub async fn capture_state(&self) -> Option<CaptureState> {
        self.capture
            .lock()
            .await
            .listener
            .as_ref()
            .map(|listener| listener.state())
    }

    /// Ask the authority for a new session hosted by `host_name`
    pub async fn create_session(
        &self,
        host_name: &str,
        turn_duration_seconds: Option<u32>,
    ) -> Result<(), AuthorityError> {
        self.leave_ended_session().await;
        self.authority
            .send(ClientRequest::SessionCreate {
                host_name: host_name.to_string(),
                turn_duration_seconds,
            })
            .await
    }

    pub async fn join_session(&self, code: &str, guest_name: &str) -> Result<(), AuthorityError> {
        self.leave_ended_session().await;
        self.authority
            .send(ClientRequest::SessionJoin {
                code: code.to_uppercase(),
                guest_name: guest_name.to_string(),
            })
            .await
    }

    /// Push a partial state to the authority (`session:sync`)
    pub async fn sync_session(&self, patch: SessionPatch) -> Result<(), TurnError> {
        debug!("Syncing session state");
        self.turns.sync_session(patch).await
    }

    /// Load-time recovery check
    pub fn check_recovery(&self) -> Result<RecoveryOffer, RecoveryError> {
        self.recovery.check_on_load()
    }

    /// Rejoin the offered session
    pub async fn reconnect(&self) -> Result<PersistedSessionInfo, RecoveryError> {
        self.recovery.reconnect(self.authority.as_ref()).await
    }

    /// Discard any persisted session and return to setup if the last one ended
    pub async fn start_fresh(&self) -> Result<(), RecoveryError> {
        self.recovery.start_fresh()?;
        self.leave_ended_session().await;
        Ok(())
    }

    /// Feed a decision from an external speech classifier
    pub async fn classifier_event(&self, event: ClassifierEvent) -> bool {
        let capture = self.capture.lock().await;
        match &capture.listener {
            Some(listener) => listener.command(ListenerCommand::Classifier(event)),
            None => false,
        }
    }

    /// Consume authority pushes and VAD events until the authority stream
    /// closes
    pub async fn run(self: &Arc<Self>, mut events: mpsc::Receiver<ServerEvent>) -> Result<()> {
        let mut vad_rx = self
            .vad_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| anyhow::anyhow!("conversation core is already running"))?;

        let countdown = self.spawn_turn_signals();
        info!("Conversation core running");

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Authority event stream closed");
                            break;
                        }
                    }
                }
                Some(event) = vad_rx.recv() => self.handle_vad(event).await,
            }
        }

        for task in countdown {
            task.abort();
        }
        self.shutdown().await;
        Ok(())
    }

    /// Apply one authority push
    pub async fn handle_event(&self, event: ServerEvent) {
        let outcome = match event {
            ServerEvent::SessionCreated {
                session_id,
                session_code,
                participant_id,
            } => {
                info!("Created session {}", session_code);
                self.store.bind_participant(&participant_id);
                // The authority holds a new session in `connecting` until a
                // guest joins.
                self.store.apply(&SessionPatch {
                    session_id: Some(session_id),
                    session_code: Some(session_code),
                    phase: Some(Phase::Connecting),
                    ..SessionPatch::default()
                })
            }
            ServerEvent::SessionJoined {
                session_id,
                session_code,
                participant_id,
                participants,
            } => {
                info!("Joined session {}", session_code);
                self.store.bind_participant(&participant_id);
                self.store.apply(&SessionPatch {
                    session_id: Some(session_id),
                    session_code: Some(session_code),
                    participants: Some(participants),
                    ..SessionPatch::default()
                })
            }
            ServerEvent::SessionUpdated(patch) => self.store.apply(&patch),
            ServerEvent::SessionReconnected {
                session,
                participant_id,
            } => {
                info!("Reconnected to session {}", session.session_code);
                self.store.bind_participant(&participant_id);
                self.store.replace(session)
            }
            ServerEvent::SessionError(message) => {
                warn!("Authority reported: {}", message);
                self.signal(HostSignal::SessionError(message));
                return;
            }
            ServerEvent::ParticipantDisconnected(id) => self.store.set_connected(&id, false),
            ServerEvent::ParticipantReconnected(id) => self.store.set_connected(&id, true),
            ack @ (ServerEvent::AudioChunkReceived { .. }
            | ServerEvent::AudioChunkError { .. }
            | ServerEvent::AudioFinalized { .. }) => {
                self.audio_status.record(&ack);
                self.signal(HostSignal::Audio(self.audio_status.current()));
                return;
            }
        };

        match outcome {
            ApplyOutcome::Applied(change) => self.on_change(Some(&change)).await,
            ApplyOutcome::Ignored => debug!("Push ignored by ended session"),
        }
    }

    /// React to one detector event
    pub async fn handle_vad(&self, event: VadEvent) {
        match event {
            VadEvent::Level { volume, speaking } => {
                self.signal(HostSignal::Volume {
                    level: volume,
                    speaking,
                });
            }
            VadEvent::SpeakingStarted => self.signal(HostSignal::Speaking(true)),
            VadEvent::SpeakingEnded => self.signal(HostSignal::Speaking(false)),
            VadEvent::TurnShouldEnd(cause) => {
                self.signal(HostSignal::TurnShouldEnd(cause));
                let snapshot = self.store.snapshot();
                if snapshot.session.phase != Phase::Active || !snapshot.is_local_speaker() {
                    return;
                }
                info!("Voice activity ended the turn ({:?})", cause);
                match self.turns.end_turn().await {
                    Ok(()) => {}
                    Err(TurnError::AlreadyRequested) => debug!("Turn end already requested"),
                    Err(e) => warn!("Could not end turn: {}", e),
                }
            }
            VadEvent::HighVolume(volume) => {
                self.signal(HostSignal::HighVolume(volume));
                if !self.settings.listener.escalation.auto_pause {
                    return;
                }
                match self.turns.request_pause(PauseReason::VolumeEscalation).await {
                    Ok(()) => info!("Requested pause for volume escalation"),
                    Err(e) => warn!("Could not request escalation pause: {}", e),
                }
            }
        }
    }

    /// Release the capture device and then leadership, so the last
    /// recording is closed by the leader
    pub async fn shutdown(&self) {
        self.stop_listening().await;
        let slot = self.leadership.lock().await.take();
        if let Some(slot) = slot {
            self.close_leadership(slot).await;
        }
    }

    async fn on_change(&self, change: Option<&Change>) {
        let snapshot = self.store.snapshot();
        let session = &snapshot.session;

        if let Some(change) = change {
            if change.phase_changed() {
                self.signal(HostSignal::PhaseChanged(change.phase));
            }
        }

        if let Err(e) = self.recovery.on_session_changed(&snapshot) {
            warn!("Session recovery bookkeeping failed: {}", e);
        }

        if session.phase == Phase::Ended {
            info!("Conversation ended");
            self.shutdown().await;
            return;
        }

        // Capture first: the recording of a finished turn is closed before
        // leadership moves on.
        self.sync_capture(&snapshot, change).await;
        self.sync_leadership(&snapshot).await;
    }

    async fn sync_leadership(&self, snapshot: &SessionSnapshot) {
        let session = &snapshot.session;
        let Some(participant_id) = snapshot.local_participant_id.clone() else {
            return;
        };
        if session.session_code.is_empty() {
            return;
        }

        let mut slot = self.leadership.lock().await;
        let stale = slot
            .as_ref()
            .is_some_and(|s| s.session_code != session.session_code);
        if stale {
            if let Some(old) = slot.take() {
                self.close_leadership(old).await;
            }
        }

        if slot.is_none() {
            match self.open_leadership(&session.session_code).await {
                Ok(new_slot) => *slot = Some(new_slot),
                Err(e) => {
                    error!("Leadership bus unavailable: {:#}", e);
                    return;
                }
            }
        }

        if let Some(slot) = slot.as_ref() {
            slot.coordinator
                .set_participant(Some(participant_id))
                .await;
            slot.coordinator
                .on_active_speaker(session.active_speaker().map(str::to_string))
                .await;
        }
    }

    async fn open_leadership(&self, session_code: &str) -> Result<LeadershipSlot> {
        let bus = self.bus_factory.open(session_code).await?;
        let coordinator =
            LeadershipCoordinator::new(bus, self.clock.clone(), &self.settings.leadership);
        let listener = coordinator.start().await?;

        // Bridge this coordinator's flag into the shared mirror.
        let mut flag = coordinator.subscribe();
        let mirror = self.leader.clone();
        let signals = self.signals.clone();
        let bridge = tokio::spawn(async move {
            while flag.changed().await.is_ok() {
                let leader = *flag.borrow_and_update();
                if mirror.send_replace(leader) != leader {
                    let _ = signals.send(HostSignal::LeadershipChanged(leader));
                }
            }
        });

        Ok(LeadershipSlot {
            session_code: session_code.to_string(),
            coordinator,
            tasks: vec![listener, bridge],
        })
    }

    /// Release and drop a coordinator. The mirror is cleared here since the
    /// bridge task dies with the slot.
    async fn close_leadership(&self, slot: LeadershipSlot) {
        slot.coordinator.release().await;
        drop(slot);
        if self.leader.send_replace(false) {
            self.signal(HostSignal::LeadershipChanged(false));
        }
    }

    async fn sync_capture(&self, snapshot: &SessionSnapshot, change: Option<&Change>) {
        let session = &snapshot.session;
        let mut guard = self.capture.lock().await;
        let capture = &mut *guard;
        let Some(listener) = capture.listener.as_mut() else {
            return;
        };

        let live = matches!(
            session.phase,
            Phase::Active | Phase::Paused | Phase::Reflection | Phase::Closing
        );

        if !live {
            if listener.is_listening() && session.phase == Phase::Summary {
                listener.stop().await;
                capture.target = None;
                self.signal(HostSignal::Capture(listener_state(capture)));
            }
            return;
        }

        if !listener.is_listening() && !capture.denied {
            let started = listener.start().await;
            let state = listener.state();
            if let Err(e) = started {
                warn!("Continuing without audio: {}", e);
                capture.denied = true;
            }
            self.signal(HostSignal::Capture(state));
        }

        let Some(listener) = capture.listener.as_ref() else {
            return;
        };
        if !listener.is_listening() {
            return;
        }

        if change.is_some_and(|c| c.turn_restarted) {
            listener.command(ListenerCommand::ResetTurn);
        }

        // A paused turn keeps its recording; leadership gates the frames.
        let holds_turn = snapshot.is_local_speaker()
            && matches!(session.phase, Phase::Active | Phase::Paused);
        let target = match (holds_turn, &snapshot.local_participant_id) {
            (true, Some(participant_id)) => Some(SegmentTarget {
                session_code: session.session_code.clone(),
                participant_id: participant_id.clone(),
                round: session.round_number,
            }),
            _ => None,
        };

        if target != capture.target {
            let command = match &target {
                Some(target) => ListenerCommand::BeginSegment(target.clone()),
                None => ListenerCommand::FinishSegment,
            };
            listener.command(command);
            capture.target = target;
        }
    }

    async fn stop_listening(&self) {
        let mut capture = self.capture.lock().await;
        capture.target = None;
        if let Some(listener) = capture.listener.as_mut() {
            if listener.is_listening() {
                listener.stop().await;
                let state = listener.state();
                self.signal(HostSignal::Capture(state));
            }
        }
    }

    /// Return an ended mirror to setup before a new session
    async fn leave_ended_session(&self) {
        if self.store.snapshot().session.phase != Phase::Ended {
            return;
        }
        self.shutdown().await;
        self.store.reset();
        self.capture.lock().await.denied = false;
    }

    fn spawn_turn_signals(&self) -> Vec<JoinHandle<()>> {
        let (mut status_rx, countdown) = spawn_countdown(self.turns.clone(), self.store.subscribe());
        let signals = self.signals.clone();
        let forward = tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = status_rx.borrow_and_update().clone();
                let _ = signals.send(HostSignal::Turn(status));
            }
        });
        vec![countdown, forward]
    }

    fn signal(&self, signal: HostSignal) {
        // No host subscribed is fine.
        let _ = self.signals.send(signal);
    }
}

fn listener_state(capture: &CaptureSlot) -> CaptureState {
    capture
        .listener
        .as_ref()
        .map(|listener| listener.state())
        .unwrap_or_default()
}
