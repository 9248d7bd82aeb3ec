//! Voice activity detection
//!
//! Two interchangeable strategies behind one trait:
//! - `ThresholdVad`: smoothed energy against a fixed voice threshold
//! - `ClassifierVad`: discrete speech start/end events from an external model
//!
//! Both share the same turn bookkeeping: a one-shot turn-end latch fired by
//! enough speech followed by enough silence, or by the hard turn ceiling.
//! The escalation monitor watches for sustained high volume independently.

mod classifier;
mod escalation;
pub mod level;
mod threshold;
mod tracker;

pub use classifier::{ClassifierEvent, ClassifierVad};
pub use escalation::{EscalationMonitor, EscalationSettings};
pub use threshold::ThresholdVad;

use crate::capture::AudioFrame;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadStrategy {
    #[default]
    Threshold,
    Classifier,
}

/// Speaker detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub strategy: VadStrategy,
    /// Silence after speech that ends the turn
    pub silence_threshold_ms: u64,
    /// Speech required before silence may end the turn
    pub min_speaking_duration_ms: u64,
    /// Hard ceiling on a turn regardless of speech
    pub max_turn_duration_ms: u64,
    /// Smoothed level (0-100) that counts as speaking
    pub voice_threshold: u8,
    pub smoothing_factor: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            strategy: VadStrategy::Threshold,
            silence_threshold_ms: 2000,
            min_speaking_duration_ms: 3000,
            max_turn_duration_ms: 180_000, // 3 minutes
            voice_threshold: 15,
            smoothing_factor: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnEndCause {
    /// Enough speech followed by enough silence
    Silence,
    /// The turn ceiling was reached
    MaxDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Reported on every sample for live UI
    Level { volume: u8, speaking: bool },
    SpeakingStarted,
    SpeakingEnded,
    /// One-shot per turn
    TurnShouldEnd(TurnEndCause),
    /// Sustained high volume; one-shot until volume drops
    HighVolume(u8),
}

/// Common interface of the detection strategies
pub trait VoiceActivityDetector: Send {
    /// Start bookkeeping for a new turn and re-arm the turn-end latch
    fn reset_turn(&mut self, now_ms: i64);

    /// Feed captured audio
    fn process_frame(&mut self, frame: &AudioFrame, now_ms: i64) -> Vec<VadEvent>;

    /// Feed a classifier decision. Energy-based detectors ignore these.
    fn apply_classifier(&mut self, _event: ClassifierEvent, _now_ms: i64) -> Vec<VadEvent> {
        Vec::new()
    }

    /// Time-driven checks (silence timer, turn ceiling)
    fn tick(&mut self, now_ms: i64) -> Vec<VadEvent>;

    fn is_speaking(&self) -> bool;

    /// Speech accumulated in the current turn
    fn speaking_duration_ms(&self, now_ms: i64) -> u64;

    /// Latest smoothed level (0-100)
    fn volume(&self) -> u8;

    fn name(&self) -> &str;
}

/// Create the detector selected by `settings.strategy`
pub fn create_detector(settings: &VadSettings) -> Box<dyn VoiceActivityDetector> {
    match settings.strategy {
        VadStrategy::Threshold => Box::new(ThresholdVad::new(settings.clone())),
        VadStrategy::Classifier => Box::new(ClassifierVad::new(settings.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_strategy() {
        let mut settings = VadSettings::default();
        assert_eq!(create_detector(&settings).name(), "threshold");

        settings.strategy = VadStrategy::Classifier;
        assert_eq!(create_detector(&settings).name(), "classifier");
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: VadSettings =
            serde_json::from_str(r#"{"strategy":"classifier","silence_threshold_ms":1500}"#)
                .unwrap();
        assert_eq!(settings.strategy, VadStrategy::Classifier);
        assert_eq!(settings.silence_threshold_ms, 1500);
        assert_eq!(settings.min_speaking_duration_ms, 3000);
        assert_eq!(settings.voice_threshold, 15);
    }
}
