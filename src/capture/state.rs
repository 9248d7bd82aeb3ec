use serde::Serialize;

/// Lifecycle of the capture device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    Idle,
    /// Waiting for device permission/acquisition
    Acquiring,
    Listening,
    Stopped,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid capture transition: {from:?} -> {to}")]
pub struct TransitionError {
    pub from: CaptureState,
    pub to: &'static str,
}

impl CaptureState {
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening)
    }

    /// idle | stopped | error -> acquiring
    pub fn begin_acquire(&mut self) -> Result<(), TransitionError> {
        match self {
            Self::Idle | Self::Stopped | Self::Error(_) => {
                *self = Self::Acquiring;
                Ok(())
            }
            _ => Err(self.invalid("acquiring")),
        }
    }

    /// acquiring -> listening
    pub fn acquired(&mut self) -> Result<(), TransitionError> {
        match self {
            Self::Acquiring => {
                *self = Self::Listening;
                Ok(())
            }
            _ => Err(self.invalid("listening")),
        }
    }

    /// acquiring | listening -> error
    pub fn failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        match self {
            Self::Acquiring | Self::Listening => {
                *self = Self::Error(reason.into());
                Ok(())
            }
            _ => Err(self.invalid("error")),
        }
    }

    /// listening | acquiring -> stopped. Stopping twice is harmless.
    pub fn stop(&mut self) -> Result<(), TransitionError> {
        match self {
            Self::Listening | Self::Acquiring | Self::Stopped => {
                *self = Self::Stopped;
                Ok(())
            }
            _ => Err(self.invalid("stopped")),
        }
    }

    fn invalid(&self, to: &'static str) -> TransitionError {
        TransitionError {
            from: self.clone(),
            to,
        }
    }
}
