//! Recording leadership across windows of one participant
//!
//! Exactly one window per participant captures and forwards audio: the one
//! that claimed the participant's active turn over the profile-scoped bus.

mod bus;
mod coordinator;
mod forwarder;
mod messages;

pub use bus::{BusFactory, LeadershipBus, LocalBus, LocalBusHub, NatsBusFactory};
pub use coordinator::{LeadershipCoordinator, LeadershipSettings, LeadershipStatus};
pub use forwarder::{
    encode_wav, AudioForwarder, AudioStatus, AudioStatusTracker, SegmentTarget, AUDIO_MIME_TYPE,
};
pub use messages::LeadershipMessage;
