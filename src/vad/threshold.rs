use super::level::{pcm_level, Smoother};
use super::tracker::TurnTracker;
use super::{VadEvent, VadSettings, VoiceActivityDetector};
use crate::capture::AudioFrame;

/// Energy-based detector: smoothed level against a fixed voice threshold.
///
/// Smoothing delays the speech-to-silence transition. With the default
/// factor (0.3) and threshold (15), a full-scale voice fed at 100 ms frames
/// reads as silent on the sixth quiet frame, so the silence timer starts
/// 500 ms after the voice actually stops.
pub struct ThresholdVad {
    voice_threshold: u8,
    smoother: Smoother,
    speaking: bool,
    tracker: TurnTracker,
}

impl ThresholdVad {
    pub fn new(settings: VadSettings) -> Self {
        Self {
            voice_threshold: settings.voice_threshold,
            smoother: Smoother::new(settings.smoothing_factor),
            speaking: false,
            tracker: TurnTracker::new(&settings),
        }
    }

    /// Feed one normalized (0-100) level reading
    pub fn process_level(&mut self, raw_level: u8, now_ms: i64) -> Vec<VadEvent> {
        let volume = self.smoother.push(raw_level);
        let speaking = volume >= self.voice_threshold;
        let mut events = vec![VadEvent::Level { volume, speaking }];

        if speaking && !self.speaking {
            self.speaking = true;
            self.tracker.speech_started(now_ms);
            events.push(VadEvent::SpeakingStarted);
        } else if !speaking && self.speaking {
            self.speaking = false;
            self.tracker.speech_ended(now_ms, None);
            events.push(VadEvent::SpeakingEnded);
        }

        if let Some(cause) = self.tracker.check(now_ms) {
            events.push(VadEvent::TurnShouldEnd(cause));
        }
        events
    }
}

impl VoiceActivityDetector for ThresholdVad {
    fn reset_turn(&mut self, now_ms: i64) {
        self.tracker.reset(now_ms);
        // A speaker mid-sentence at the turn boundary starts a fresh burst.
        if self.speaking {
            self.tracker.speech_started(now_ms);
        }
    }

    fn process_frame(&mut self, frame: &AudioFrame, now_ms: i64) -> Vec<VadEvent> {
        self.process_level(pcm_level(&frame.samples), now_ms)
    }

    fn tick(&mut self, now_ms: i64) -> Vec<VadEvent> {
        self.tracker
            .check(now_ms)
            .map(VadEvent::TurnShouldEnd)
            .into_iter()
            .collect()
    }

    fn is_speaking(&self) -> bool {
        self.speaking
    }

    fn speaking_duration_ms(&self, now_ms: i64) -> u64 {
        self.tracker.speaking_ms(now_ms)
    }

    fn volume(&self) -> u8 {
        self.smoother.current()
    }

    fn name(&self) -> &str {
        "threshold"
    }
}
