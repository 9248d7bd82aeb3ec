//! Session phase machine
//!
//! This module holds the client-side mirror of the authority's session:
//! - `Session` / `SessionPatch`: the turn-taking subset of the shared state
//! - `Phase`: lifecycle stages and their expected successors
//! - `SessionStore`: versioned container applying pushes as whole-snapshot
//!   replacements, with the turn start re-stamped on the local clock

mod state;
mod store;

pub use state::{Participant, ParticipantRole, PauseReason, Phase, Session, SessionPatch};
pub use store::{ApplyOutcome, Change, SessionSnapshot, SessionStore, TurnKey};
