//! Session authority contract
//!
//! Outbound requests and inbound pushes exchanged with the authoritative
//! session server, plus two transports: NATS and an in-memory channel.

mod channel;
pub mod client;
pub mod messages;

pub use channel::ChannelAuthority;
pub use client::{AuthorityChannel, AuthorityError, NatsAuthority};
pub use messages::{ClientRequest, RequestEnvelope, ServerEvent};
