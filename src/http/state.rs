use crate::conversation::ConversationCore;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<ConversationCore>,
}

impl AppState {
    pub fn new(core: Arc<ConversationCore>) -> Self {
        Self { core }
    }
}
