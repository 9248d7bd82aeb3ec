use super::VadEvent;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
    pub enabled: bool,
    /// Smoothed level (0-100) considered raised
    pub high_volume_threshold: u8,
    /// How long the level must stay raised
    pub sustained_ms: u64,
    /// Ask the authority for a pause when escalation fires
    pub auto_pause: bool,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            high_volume_threshold: 75,
            sustained_ms: 10_000,
            auto_pause: true,
        }
    }
}

/// Fires once per continuous stretch of high volume
#[derive(Debug, Clone)]
pub struct EscalationMonitor {
    settings: EscalationSettings,
    high_since: Option<i64>,
    fired: bool,
}

impl EscalationMonitor {
    pub fn new(settings: EscalationSettings) -> Self {
        Self {
            settings,
            high_since: None,
            fired: false,
        }
    }

    pub fn observe(&mut self, volume: u8, now_ms: i64) -> Option<VadEvent> {
        if !self.settings.enabled {
            return None;
        }

        if volume < self.settings.high_volume_threshold {
            // Dropping below re-arms the latch.
            self.high_since = None;
            self.fired = false;
            return None;
        }

        let since = *self.high_since.get_or_insert(now_ms);
        let sustained = u64::try_from(now_ms - since).unwrap_or(0);
        if !self.fired && sustained >= self.settings.sustained_ms {
            self.fired = true;
            info!("Sustained high volume ({}) for {}ms", volume, sustained);
            return Some(VadEvent::HighVolume(volume));
        }
        None
    }

    pub fn reset(&mut self) {
        self.high_since = None;
        self.fired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(monitor: &mut EscalationMonitor, volume: u8, from: i64, to: i64) -> usize {
        (from..=to)
            .step_by(100)
            .filter_map(|t| monitor.observe(volume, t))
            .count()
    }

    #[test]
    fn test_fires_after_sustained_period() {
        let mut monitor = EscalationMonitor::new(EscalationSettings::default());

        assert_eq!(feed(&mut monitor, 80, 0, 9_900), 0);
        assert_eq!(monitor.observe(80, 10_000), Some(VadEvent::HighVolume(80)));
    }

    #[test]
    fn test_disabled_never_fires() {
        let mut monitor = EscalationMonitor::new(EscalationSettings {
            enabled: false,
            ..EscalationSettings::default()
        });
        assert_eq!(feed(&mut monitor, 100, 0, 30_000), 0);
    }
}
