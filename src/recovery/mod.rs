//! Session recovery after reloads and transient disconnects

mod info;
mod manager;
mod store;

pub use info::{PersistedSessionInfo, DEFAULT_WINDOW_MS};
pub use manager::{ReconnectionManager, RecoveryError, RecoveryOffer, RecoverySettings};
pub use store::{FileInfoStore, MemoryInfoStore, SessionInfoStore, SESSION_INFO_FILE};
