use super::{TurnEndCause, VadSettings};

/// Per-turn speech bookkeeping shared by both strategies
#[derive(Debug, Clone)]
pub(crate) struct TurnTracker {
    silence_threshold_ms: u64,
    min_speaking_duration_ms: u64,
    max_turn_duration_ms: u64,
    turn_started_at: Option<i64>,
    burst_started_at: Option<i64>,
    /// Speech from completed bursts
    spoken_ms: u64,
    silence_started_at: Option<i64>,
    /// Silence start to restore if the current burst is withdrawn
    silence_before_burst: Option<i64>,
    fired: bool,
}

impl TurnTracker {
    pub fn new(settings: &VadSettings) -> Self {
        Self {
            silence_threshold_ms: settings.silence_threshold_ms,
            min_speaking_duration_ms: settings.min_speaking_duration_ms,
            max_turn_duration_ms: settings.max_turn_duration_ms,
            turn_started_at: None,
            burst_started_at: None,
            spoken_ms: 0,
            silence_started_at: None,
            silence_before_burst: None,
            fired: false,
        }
    }

    pub fn reset(&mut self, now_ms: i64) {
        self.turn_started_at = Some(now_ms);
        self.burst_started_at = None;
        self.spoken_ms = 0;
        self.silence_started_at = None;
        self.silence_before_burst = None;
        self.fired = false;
    }

    pub fn in_burst(&self) -> bool {
        self.burst_started_at.is_some()
    }

    /// Returns true on a silence-to-speech transition
    pub fn speech_started(&mut self, now_ms: i64) -> bool {
        if self.in_burst() {
            return false;
        }
        self.turn_started_at.get_or_insert(now_ms);
        self.burst_started_at = Some(now_ms);
        self.silence_before_burst = self.silence_started_at.take();
        true
    }

    /// Returns true on a speech-to-silence transition. `reported_ms`
    /// overrides the locally measured burst length.
    pub fn speech_ended(&mut self, now_ms: i64, reported_ms: Option<u64>) -> bool {
        let Some(started) = self.burst_started_at.take() else {
            return false;
        };
        let measured = elapsed(started, now_ms);
        self.spoken_ms += reported_ms.unwrap_or(measured);
        self.silence_started_at = Some(now_ms);
        self.silence_before_burst = None;
        true
    }

    /// Drop the current burst without counting it
    pub fn speech_withdrawn(&mut self) -> bool {
        if self.burst_started_at.take().is_none() {
            return false;
        }
        self.silence_started_at = self.silence_before_burst.take();
        true
    }

    pub fn speaking_ms(&self, now_ms: i64) -> u64 {
        let current = self
            .burst_started_at
            .map(|started| elapsed(started, now_ms))
            .unwrap_or(0);
        self.spoken_ms + current
    }

    /// Silence since the latest burst ended; `None` before any speech
    pub fn silence_ms(&self, now_ms: i64) -> Option<u64> {
        if self.in_burst() {
            return None;
        }
        self.silence_started_at.map(|started| elapsed(started, now_ms))
    }

    /// Evaluate the turn-end conditions; fires at most once per turn
    pub fn check(&mut self, now_ms: i64) -> Option<TurnEndCause> {
        if self.fired {
            return None;
        }

        let silence_met = self
            .silence_ms(now_ms)
            .is_some_and(|silence| silence >= self.silence_threshold_ms)
            && self.speaking_ms(now_ms) >= self.min_speaking_duration_ms;
        if silence_met {
            self.fired = true;
            return Some(TurnEndCause::Silence);
        }

        let ceiling_met = self
            .turn_started_at
            .is_some_and(|started| elapsed(started, now_ms) >= self.max_turn_duration_ms);
        if ceiling_met {
            self.fired = true;
            return Some(TurnEndCause::MaxDuration);
        }

        None
    }
}

fn elapsed(from_ms: i64, to_ms: i64) -> u64 {
    u64::try_from(to_ms - from_ms).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TurnTracker {
        let mut tracker = TurnTracker::new(&VadSettings::default());
        tracker.reset(0);
        tracker
    }

    #[test]
    fn test_speech_accumulates_across_bursts() {
        let mut t = tracker();
        t.speech_started(0);
        t.speech_ended(1_000, None);
        t.speech_started(1_500);
        assert_eq!(t.speaking_ms(2_000), 1_500);
        t.speech_ended(3_500, None);
        assert_eq!(t.speaking_ms(4_000), 3_000);
        assert_eq!(t.silence_ms(4_000), Some(500));
    }

    #[test]
    fn test_no_silence_before_first_speech() {
        let mut t = tracker();
        assert_eq!(t.silence_ms(10_000), None);
        assert_eq!(t.check(10_000), None);
    }

    #[test]
    fn test_withdrawn_burst_restores_silence() {
        let mut t = tracker();
        t.speech_started(0);
        t.speech_ended(3_000, None);
        t.speech_started(4_000);
        t.speech_withdrawn();

        assert_eq!(t.speaking_ms(4_500), 3_000);
        assert_eq!(t.silence_ms(5_000), Some(2_000));
        assert_eq!(t.check(5_000), Some(TurnEndCause::Silence));
    }

    #[test]
    fn test_latch_fires_once_until_reset() {
        let mut t = tracker();
        assert_eq!(t.check(180_000), Some(TurnEndCause::MaxDuration));
        assert_eq!(t.check(200_000), None);

        t.reset(200_000);
        assert_eq!(t.check(200_001), None);
        assert_eq!(t.check(380_000), Some(TurnEndCause::MaxDuration));
    }

    #[test]
    fn test_short_speech_guard_at_default_thresholds() {
        let mut t = tracker();
        t.speech_started(0);
        t.speech_ended(1_500, None);
        assert_eq!(t.check(4_000), None);
        assert_eq!(t.check(20_000), None);
    }

    #[test]
    fn test_silence_ends_turn_at_threshold() {
        let mut t = tracker();
        t.speech_started(0);
        t.speech_ended(4_000, None);
        assert_eq!(t.check(5_999), None);
        assert_eq!(t.check(6_100), Some(TurnEndCause::Silence));
    }
}

