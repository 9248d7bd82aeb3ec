use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle stage of a conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Entering names and preferences
    #[default]
    Setup,
    /// Waiting for the other participant to join
    Connecting,
    /// Setting intentions before the conversation
    PreConversation,
    /// Synced breathing before starting
    Breathing,
    /// Conversation in progress, one speaker at a time
    Active,
    /// Temporary pause (trigger detected, volume escalation, user request)
    Paused,
    /// Reflection prompt between turns
    Reflection,
    /// Final round
    Closing,
    /// Reviewing the summary
    Summary,
    /// Conversation complete (terminal)
    Ended,
}

impl Phase {
    /// Phases the authority is expected to move to from this one
    pub fn successors(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Setup => &[Connecting, PreConversation],
            Connecting => &[PreConversation],
            PreConversation => &[Breathing, Active],
            Breathing => &[Active],
            Active => &[Paused, Reflection, Closing, Summary, Ended],
            Paused => &[Active, Ended],
            Reflection => &[Active, Paused, Closing, Summary, Ended],
            Closing => &[Summary, Ended],
            Summary => &[Ended],
            Ended => &[],
        }
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        self == next || self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Ended
    }
}

/// Why the conversation was paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PauseReason {
    TriggerDetected,
    VolumeEscalation,
    UserRequested,
    BreathingExercise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[serde(alias = "speaker")]
    Host,
    #[serde(alias = "listener")]
    Guest,
    Observer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: ParticipantRole,
    pub is_connected: bool,
}

/// Client-side mirror of the authority's session.
///
/// Unknown fields pushed by the authority (transcript, summary, ...) are
/// ignored; this core only needs the turn-taking subset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub session_id: String,
    pub session_code: String,
    pub phase: Phase,
    pub round_number: u32,
    pub current_speaker_id: Option<String>,
    /// Local receipt time of the turn start, never the authority's clock
    pub turn_started_at: Option<i64>,
    pub turn_time_seconds: u32,
    pub pause_reason: Option<PauseReason>,
    pub participants: Vec<Participant>,
    pub observers: Vec<Participant>,
}

impl Session {
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .chain(self.observers.iter())
            .find(|p| p.id == id)
    }

    /// Speaker holding the floor right now. Only an active conversation has one.
    pub fn active_speaker(&self) -> Option<&str> {
        match self.phase {
            Phase::Active => self.current_speaker_id.as_deref(),
            _ => None,
        }
    }
}

/// Partial session update pushed by (or synced to) the authority.
///
/// Nullable fields are tri-state: absent keeps the current value, `null`
/// clears it, a value replaces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<u32>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_speaker_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub turn_started_at: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_time_seconds: Option<u32>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub pause_reason: Option<Option<PauseReason>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observers: Option<Vec<Participant>>,
}

/// Distinguishes an explicit `null` from a missing field.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl SessionPatch {
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    /// Merge into a copy of `base`. A pushed turn start is replaced by `now_ms`.
    pub fn merged_into(&self, base: &Session, now_ms: i64) -> Session {
        let mut next = base.clone();

        if let Some(id) = &self.session_id {
            next.session_id = id.clone();
        }
        if let Some(code) = &self.session_code {
            next.session_code = code.clone();
        }
        if let Some(phase) = self.phase {
            next.phase = phase;
        }
        if let Some(round) = self.round_number {
            next.round_number = round;
        }
        if let Some(speaker) = &self.current_speaker_id {
            next.current_speaker_id = speaker.clone();
        }
        if let Some(started) = self.turn_started_at {
            next.turn_started_at = started.map(|_| now_ms);
        }
        if let Some(seconds) = self.turn_time_seconds {
            next.turn_time_seconds = seconds;
        }
        if let Some(reason) = self.pause_reason {
            next.pause_reason = reason;
        }
        if let Some(participants) = &self.participants {
            next.participants = participants.clone();
        }
        if let Some(observers) = &self.observers {
            next.observers = observers.clone();
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(
            serde_json::to_string(&Phase::PreConversation).unwrap(),
            "\"pre-conversation\""
        );
        let phase: Phase = serde_json::from_str("\"ended\"").unwrap();
        assert_eq!(phase, Phase::Ended);
    }

    #[test]
    fn test_transitions() {
        assert!(Phase::Active.can_transition_to(Phase::Paused));
        assert!(Phase::Paused.can_transition_to(Phase::Active));
        assert!(Phase::Reflection.can_transition_to(Phase::Active));
        assert!(!Phase::Setup.can_transition_to(Phase::Active));
        assert!(!Phase::Ended.can_transition_to(Phase::Active));
        assert!(Phase::Ended.is_terminal());
    }

    #[test]
    fn test_patch_distinguishes_null_from_missing() {
        let patch: SessionPatch =
            serde_json::from_str(r#"{"phase":"paused","turnStartedAt":null}"#).unwrap();
        assert_eq!(patch.phase, Some(Phase::Paused));
        assert_eq!(patch.turn_started_at, Some(None));
        assert_eq!(patch.current_speaker_id, None);

        let base = Session {
            current_speaker_id: Some("p1".to_string()),
            turn_started_at: Some(10),
            ..Session::default()
        };
        let merged = patch.merged_into(&base, 99);
        assert_eq!(merged.turn_started_at, None);
        assert_eq!(merged.current_speaker_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_patch_substitutes_local_turn_start() {
        let patch: SessionPatch =
            serde_json::from_str(r#"{"phase":"active","turnStartedAt":1}"#).unwrap();
        let merged = patch.merged_into(&Session::default(), 42_000);
        assert_eq!(merged.turn_started_at, Some(42_000));
    }

    #[test]
    fn test_session_ignores_unknown_fields() {
        let json = r#"{
            "sessionId": "s1",
            "sessionCode": "ABC234",
            "phase": "active",
            "roundNumber": 2,
            "currentSpeakerId": "p1",
            "turnStartedAt": 5,
            "turnTimeSeconds": 90,
            "transcript": [],
            "participants": [
                {"id": "p1", "name": "Ana", "role": "host", "isConnected": true}
            ]
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.active_speaker(), Some("p1"));
        assert_eq!(session.participant("p1").map(|p| p.name.as_str()), Some("Ana"));
        assert!(session.observers.is_empty());
    }
}
