use serde::{Deserialize, Serialize};

/// Default recovery window: 24 hours
pub const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Minimal identity kept across reloads to rejoin a running session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionInfo {
    pub session_code: String,
    pub participant_id: String,
    pub participant_name: String,
    /// Unix milliseconds
    pub saved_at: i64,
}

impl PersistedSessionInfo {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.saved_at
    }

    /// Honored only while strictly younger than the window
    pub fn is_within(&self, window_ms: i64, now_ms: i64) -> bool {
        self.age_ms(now_ms) < window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 60 * 60 * 1000;

    fn saved_at(saved_at: i64) -> PersistedSessionInfo {
        PersistedSessionInfo {
            session_code: "ABC123".to_string(),
            participant_id: "p1".to_string(),
            participant_name: "Alex".to_string(),
            saved_at,
        }
    }

    #[test]
    fn test_window_boundaries() {
        let now = 100 * HOUR;
        assert!(saved_at(now - 23 * HOUR).is_within(DEFAULT_WINDOW_MS, now));
        assert!(!saved_at(now - 24 * HOUR).is_within(DEFAULT_WINDOW_MS, now));
        assert!(!saved_at(now - 25 * HOUR).is_within(DEFAULT_WINDOW_MS, now));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(saved_at(1_700_000_000_000)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "sessionCode": "ABC123",
                "participantId": "p1",
                "participantName": "Alex",
                "savedAt": 1_700_000_000_000i64
            })
        );
    }
}
