//! Turn controller
//!
//! Remaining-time countdown, the extend window, and the turn/pause requests
//! forwarded to the authority.

mod controller;
mod countdown;

pub use controller::{remaining_seconds, TurnController, TurnError, TurnSettings, TurnStatus};
pub use countdown::spawn_countdown;
