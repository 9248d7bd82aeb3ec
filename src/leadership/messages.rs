use serde::{Deserialize, Serialize};

/// Message exchanged between windows of one browser profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum LeadershipMessage {
    /// A window saw its participant's turn begin and is about to claim
    TurnStarted { speaker_id: String, sender_id: String },
    /// `claimed_at` is the claimer's clock, so every window ranks two
    /// claims the same way
    LeaderClaimed {
        speaker_id: String,
        sender_id: String,
        #[serde(default)]
        claimed_at: i64,
    },
    LeaderReleased { speaker_id: String, sender_id: String },
}

impl LeadershipMessage {
    pub fn speaker_id(&self) -> &str {
        match self {
            Self::TurnStarted { speaker_id, .. }
            | Self::LeaderClaimed { speaker_id, .. }
            | Self::LeaderReleased { speaker_id, .. } => speaker_id,
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            Self::TurnStarted { sender_id, .. }
            | Self::LeaderClaimed { sender_id, .. }
            | Self::LeaderReleased { sender_id, .. } => sender_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let message = LeadershipMessage::LeaderClaimed {
            speaker_id: "p1".to_string(),
            sender_id: "w1".to_string(),
            claimed_at: 1_000,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "LEADER_CLAIMED",
                "speakerId": "p1",
                "senderId": "w1",
                "claimedAt": 1000
            })
        );

        let parsed: LeadershipMessage = serde_json::from_str(
            r#"{"type":"TURN_STARTED","speakerId":"p2","senderId":"w9"}"#,
        )
        .unwrap();
        assert_eq!(parsed.speaker_id(), "p2");
        assert_eq!(parsed.sender_id(), "w9");
    }
}
