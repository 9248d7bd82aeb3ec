use crate::capture::CaptureState;
use crate::leadership::AudioStatus;
use crate::session::Phase;
use crate::turn::TurnStatus;
use crate::vad::TurnEndCause;
use serde::Serialize;

/// Notification for the host application (UI layer)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", content = "data", rename_all = "kebab-case")]
pub enum HostSignal {
    /// Live level reading, every sample
    Volume { level: u8, speaking: bool },
    Speaking(bool),
    TurnShouldEnd(TurnEndCause),
    HighVolume(u8),
    LeadershipChanged(bool),
    Capture(CaptureState),
    SessionError(String),
    Audio(AudioStatus),
    PhaseChanged(Phase),
    Turn(TurnStatus),
}
