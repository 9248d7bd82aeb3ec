use crate::session::{Participant, PauseReason, Session, SessionPatch};
use serde::{Deserialize, Serialize};

/// Request sent to the session authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    #[serde(rename = "session:create", rename_all = "camelCase")]
    SessionCreate {
        host_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_duration_seconds: Option<u32>,
    },

    #[serde(rename = "session:join", rename_all = "camelCase")]
    SessionJoin { code: String, guest_name: String },

    #[serde(rename = "session:reconnect", rename_all = "camelCase")]
    SessionReconnect {
        session_code: String,
        participant_id: String,
    },

    #[serde(rename = "session:sync")]
    SessionSync(SessionPatch),

    #[serde(rename = "turn:end")]
    TurnEnd,

    #[serde(rename = "turn:extend")]
    TurnExtend(u32),

    #[serde(rename = "pause:request")]
    PauseRequest(PauseReason),

    #[serde(rename = "pause:resume")]
    PauseResume,

    #[serde(rename = "breathing:start")]
    BreathingStart,

    #[serde(rename = "breathing:complete")]
    BreathingComplete,

    #[serde(rename = "reflection:dismiss")]
    ReflectionDismiss,

    #[serde(rename = "conversation:end")]
    ConversationEnd,

    /// Base64-encoded audio segment (leader window only)
    #[serde(rename = "audio:chunk", rename_all = "camelCase")]
    AudioChunk {
        data: String,
        filename: String,
        mime_type: String,
    },

    #[serde(rename = "audio:finalize")]
    AudioFinalize { filename: String },
}

impl ClientRequest {
    /// Wire name of the request, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionCreate { .. } => "session:create",
            Self::SessionJoin { .. } => "session:join",
            Self::SessionReconnect { .. } => "session:reconnect",
            Self::SessionSync(_) => "session:sync",
            Self::TurnEnd => "turn:end",
            Self::TurnExtend(_) => "turn:extend",
            Self::PauseRequest(_) => "pause:request",
            Self::PauseResume => "pause:resume",
            Self::BreathingStart => "breathing:start",
            Self::BreathingComplete => "breathing:complete",
            Self::ReflectionDismiss => "reflection:dismiss",
            Self::ConversationEnd => "conversation:end",
            Self::AudioChunk { .. } => "audio:chunk",
            Self::AudioFinalize { .. } => "audio:finalize",
        }
    }
}

/// Push received from the session authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "session:created", rename_all = "camelCase")]
    SessionCreated {
        session_id: String,
        session_code: String,
        participant_id: String,
    },

    #[serde(rename = "session:joined", rename_all = "camelCase")]
    SessionJoined {
        session_id: String,
        session_code: String,
        participant_id: String,
        participants: Vec<Participant>,
    },

    #[serde(rename = "session:updated")]
    SessionUpdated(SessionPatch),

    #[serde(rename = "session:reconnected", rename_all = "camelCase")]
    SessionReconnected {
        session: Session,
        participant_id: String,
    },

    #[serde(rename = "session:error")]
    SessionError(String),

    #[serde(rename = "participant:disconnected")]
    ParticipantDisconnected(String),

    #[serde(rename = "participant:reconnected")]
    ParticipantReconnected(String),

    #[serde(rename = "audio:chunk:received")]
    AudioChunkReceived { filename: String },

    #[serde(rename = "audio:chunk:error")]
    AudioChunkError { filename: String, message: String },

    #[serde(rename = "audio:finalized")]
    AudioFinalized { filename: String },
}

/// Request wrapper published on the authority subject
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub client_id: String,
    pub request: ClientRequest,
}
