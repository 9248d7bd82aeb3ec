//! Composition of the turn-taking core for one window

mod core;
mod signal;

pub use self::core::{ConversationCore, CoreParts, CoreSettings};
pub use self::signal::HostSignal;
