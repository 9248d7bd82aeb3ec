use super::level::{pcm_level, Smoother};
use super::tracker::TurnTracker;
use super::{VadEvent, VadSettings, VoiceActivityDetector};
use crate::capture::AudioFrame;
use serde::{Deserialize, Serialize};

/// Decision reported by an external speech classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClassifierEvent {
    SpeechStart,
    /// End of an utterance, with the classifier's own length if it has one
    SpeechEnd {
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    /// The last speech start turned out not to be speech
    Misfire,
}

/// Model-driven detector.
///
/// Speaking state comes from classifier events; captured frames only feed
/// the volume level shown to the user and the escalation monitor.
pub struct ClassifierVad {
    smoother: Smoother,
    tracker: TurnTracker,
}

impl ClassifierVad {
    pub fn new(settings: VadSettings) -> Self {
        Self {
            smoother: Smoother::new(settings.smoothing_factor),
            tracker: TurnTracker::new(&settings),
        }
    }

    fn level_event(&self) -> VadEvent {
        VadEvent::Level {
            volume: self.smoother.current(),
            speaking: self.tracker.in_burst(),
        }
    }
}

impl VoiceActivityDetector for ClassifierVad {
    fn reset_turn(&mut self, now_ms: i64) {
        let speaking = self.tracker.in_burst();
        self.tracker.reset(now_ms);
        if speaking {
            self.tracker.speech_started(now_ms);
        }
    }

    fn process_frame(&mut self, frame: &AudioFrame, now_ms: i64) -> Vec<VadEvent> {
        self.smoother.push(pcm_level(&frame.samples));
        let mut events = vec![self.level_event()];
        events.extend(self.tick(now_ms));
        events
    }

    fn apply_classifier(&mut self, event: ClassifierEvent, now_ms: i64) -> Vec<VadEvent> {
        let transition = match event {
            ClassifierEvent::SpeechStart => self
                .tracker
                .speech_started(now_ms)
                .then_some(VadEvent::SpeakingStarted),
            ClassifierEvent::SpeechEnd { duration_ms } => self
                .tracker
                .speech_ended(now_ms, duration_ms)
                .then_some(VadEvent::SpeakingEnded),
            ClassifierEvent::Misfire => self
                .tracker
                .speech_withdrawn()
                .then_some(VadEvent::SpeakingEnded),
        };

        let mut events = vec![self.level_event()];
        events.extend(transition);
        events.extend(self.tick(now_ms));
        events
    }

    fn tick(&mut self, now_ms: i64) -> Vec<VadEvent> {
        self.tracker
            .check(now_ms)
            .map(VadEvent::TurnShouldEnd)
            .into_iter()
            .collect()
    }

    fn is_speaking(&self) -> bool {
        self.tracker.in_burst()
    }

    fn speaking_duration_ms(&self, now_ms: i64) -> u64 {
        self.tracker.speaking_ms(now_ms)
    }

    fn volume(&self) -> u8 {
        self.smoother.current()
    }

    fn name(&self) -> &str {
        "classifier"
    }
}
