//! Microphone capture lifecycle
//!
//! A `CaptureSource` hides the device behind an async acquire/release pair;
//! `VoiceListener` drives one source through the `CaptureState` machine and
//! runs detection on the frames it produces.

mod backend;
mod listener;
mod scripted;
mod state;
mod wav;

pub use backend::{AudioFrame, CaptureConstraints, CaptureError, CaptureSource};
pub use listener::{ListenerCommand, ListenerSettings, VoiceListener};
pub use scripted::{ScriptedCapture, ScriptedFeed};
pub use state::{CaptureState, TransitionError};
pub use wav::WavFileCapture;
