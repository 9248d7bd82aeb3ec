pub mod authority;
pub mod capture;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod http;
pub mod leadership;
pub mod recovery;
pub mod session;
pub mod turn;
pub mod vad;

pub use authority::{AuthorityChannel, ChannelAuthority, ClientRequest, NatsAuthority, ServerEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use conversation::{ConversationCore, CoreParts, CoreSettings, HostSignal};
pub use http::{create_router, AppState};
pub use leadership::{LeadershipCoordinator, LeadershipMessage, LocalBusHub};
pub use recovery::{PersistedSessionInfo, ReconnectionManager, RecoveryOffer};
pub use session::{Phase, Session, SessionPatch, SessionStore};
pub use turn::{TurnController, TurnError, TurnStatus};
pub use vad::{VadEvent, VoiceActivityDetector};
