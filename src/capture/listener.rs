use super::backend::{AudioFrame, CaptureConstraints, CaptureError, CaptureSource};
use super::state::CaptureState;
use crate::clock::Clock;
use crate::leadership::{AudioForwarder, SegmentTarget};
use crate::vad::{
    create_detector, ClassifierEvent, EscalationMonitor, EscalationSettings, VadEvent,
    VadSettings, VoiceActivityDetector,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub vad: VadSettings,
    pub escalation: EscalationSettings,
    pub constraints: CaptureConstraints,
    /// Cadence of time-driven VAD checks
    pub tick_interval_ms: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            vad: VadSettings::default(),
            escalation: EscalationSettings::default(),
            constraints: CaptureConstraints::default(),
            tick_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerCommand {
    /// A new turn started; re-arm the turn-end latch
    ResetTurn,
    Classifier(ClassifierEvent),
    /// Record the local participant's turn
    BeginSegment(SegmentTarget),
    /// Flush and finalize the current recording
    FinishSegment,
    Stop,
}

struct Parts {
    source: Box<dyn CaptureSource>,
    forwarder: Option<AudioForwarder>,
}

struct Running {
    commands: mpsc::UnboundedSender<ListenerCommand>,
    task: JoinHandle<Parts>,
}

/// Owns the capture device and runs detection on its frames.
///
/// Detector, escalation monitor and forwarder all live in one task; the
/// device is acquired on `start` and released on `stop`.
pub struct VoiceListener {
    parts: Option<Parts>,
    running: Option<Running>,
    settings: ListenerSettings,
    clock: Arc<dyn Clock>,
    state: watch::Sender<CaptureState>,
    events: mpsc::UnboundedSender<VadEvent>,
}

impl VoiceListener {
    pub fn new(
        source: Box<dyn CaptureSource>,
        settings: ListenerSettings,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<VadEvent>,
    ) -> Self {
        let (state, _rx) = watch::channel(CaptureState::Idle);
        Self {
            parts: Some(Parts {
                source,
                forwarder: None,
            }),
            running: None,
            settings,
            clock,
            state,
            events,
        }
    }

    /// Forward captured audio through `forwarder` while listening
    pub fn with_forwarder(mut self, forwarder: AudioForwarder) -> Self {
        if let Some(parts) = self.parts.as_mut() {
            parts.forwarder = Some(forwarder);
        }
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.running.is_some()
    }

    /// Acquire the device and start the detection task
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Ok(());
        }
        let Some(mut parts) = self.parts.take() else {
            return Err(CaptureError::DeviceUnavailable(
                "capture source lost".to_string(),
            ));
        };

        self.transition(|state| state.begin_acquire());
        info!("Acquiring capture device ({})", parts.source.name());

        let frames = match parts.source.acquire(self.settings.constraints).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Capture unavailable: {}", e);
                self.transition(|state| state.failed(e.to_string()));
                self.parts = Some(parts);
                return Err(e);
            }
        };

        self.transition(|state| state.acquired());
        info!("Listening on {}", parts.source.name());

        let (commands, command_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            detector: create_detector(&self.settings.vad),
            escalation: EscalationMonitor::new(self.settings.escalation.clone()),
            clock: self.clock.clone(),
            events: self.events.clone(),
            tick: Duration::from_millis(self.settings.tick_interval_ms.max(1)),
        };
        let task = tokio::spawn(worker.run(parts, frames, command_rx));
        self.running = Some(Running { commands, task });
        Ok(())
    }

    /// Send a command to the detection task. Ignored while not listening.
    pub fn command(&self, command: ListenerCommand) -> bool {
        match &self.running {
            Some(running) => running.commands.send(command).is_ok(),
            None => false,
        }
    }

    /// Stop detection, flush the forwarder and release the device
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.commands.send(ListenerCommand::Stop);
        match running.task.await {
            Ok(mut parts) => {
                if let Err(e) = parts.source.release().await {
                    warn!("Failed to release {}: {}", parts.source.name(), e);
                }
                self.parts = Some(parts);
            }
            Err(e) => error!("Listener task failed: {}", e),
        }

        self.transition(|state| state.stop());
        info!("Stopped listening");
    }

    fn transition(
        &self,
        apply: impl FnOnce(&mut CaptureState) -> Result<(), super::state::TransitionError>,
    ) {
        self.state.send_modify(|state| {
            if let Err(e) = apply(state) {
                debug!("{}", e);
            }
        });
    }
}

struct Worker {
    detector: Box<dyn VoiceActivityDetector>,
    escalation: EscalationMonitor,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<VadEvent>,
    tick: Duration,
}

impl Worker {
    async fn run(
        mut self,
        mut parts: Parts,
        frames: mpsc::Receiver<AudioFrame>,
        mut commands: mpsc::UnboundedReceiver<ListenerCommand>,
    ) -> Parts {
        let mut frames = Some(frames);
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.detector.reset_turn(self.clock.now_ms());

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        None | Some(ListenerCommand::Stop) => break,
                        Some(command) => self.handle_command(command, &mut parts).await,
                    }
                }
                frame = next_frame(&mut frames) => {
                    match frame {
                        Some(frame) => self.handle_frame(&frame, &mut parts).await,
                        None => {
                            info!("Capture stream ended");
                            frames = None;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let events = self.detector.tick(self.clock.now_ms());
                    self.emit(events);
                }
            }
        }

        if let Some(forwarder) = parts.forwarder.as_mut() {
            forwarder.finish().await;
        }
        parts
    }

    async fn handle_command(&mut self, command: ListenerCommand, parts: &mut Parts) {
        let now = self.clock.now_ms();
        match command {
            ListenerCommand::ResetTurn => {
                debug!("Turn reset on {} detector", self.detector.name());
                self.detector.reset_turn(now);
            }
            ListenerCommand::Classifier(event) => {
                let events = self.detector.apply_classifier(event, now);
                self.emit(events);
            }
            ListenerCommand::BeginSegment(target) => {
                if let Some(forwarder) = parts.forwarder.as_mut() {
                    forwarder.begin(target).await;
                }
            }
            ListenerCommand::FinishSegment => {
                if let Some(forwarder) = parts.forwarder.as_mut() {
                    forwarder.finish().await;
                }
            }
            ListenerCommand::Stop => {}
        }
    }

    async fn handle_frame(&mut self, frame: &AudioFrame, parts: &mut Parts) {
        let now = self.clock.now_ms();
        let events = self.detector.process_frame(frame, now);
        self.emit(events);

        if let Some(event) = self.escalation.observe(self.detector.volume(), now) {
            self.emit(vec![event]);
        }

        if let Some(forwarder) = parts.forwarder.as_mut() {
            forwarder.push(frame).await;
        }
    }

    fn emit(&self, events: Vec<VadEvent>) {
        for event in events {
            // Nobody listening is not an error for the detector.
            let _ = self.events.send(event);
        }
    }
}

async fn next_frame(frames: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
