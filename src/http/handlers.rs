use super::state::AppState;
use crate::authority::AuthorityError;
use crate::recovery::RecoveryError;
use crate::session::{PauseReason, Session, SessionPatch};
use crate::turn::TurnError;
use crate::vad::ClassifierEvent;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub host_name: String,
    pub turn_duration_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionRequest {
    pub code: String,
    pub guest_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub seconds: u32,
}

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    pub reason: PauseReason,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub version: u64,
    pub session: Session,
    pub local_participant_id: Option<String>,
    pub unexpected_transitions: u64,
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub status: &'static str,
    pub request: &'static str,
}

impl Accepted {
    fn new(request: &'static str) -> Json<Self> {
        Json(Self {
            status: "sent",
            request,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler failure mapped onto a status code
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<AuthorityError> for ApiError {
    fn from(e: AuthorityError) -> Self {
        warn!("Authority unreachable: {}", e);
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: e.to_string(),
        }
    }
}

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        match e {
            TurnError::Authority(e) => e.into(),
            other => Self {
                status: StatusCode::CONFLICT,
                message: other.to_string(),
            },
        }
    }
}

impl From<RecoveryError> for ApiError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::Authority(e) => e.into(),
            RecoveryError::NothingOffered => Self {
                status: StatusCode::CONFLICT,
                message: e.to_string(),
            },
            RecoveryError::Store(_) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: e.to_string(),
            },
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Queries
// ============================================================================

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    let snapshot = state.core.snapshot();
    Json(SessionView {
        version: snapshot.version,
        session: snapshot.session.clone(),
        local_participant_id: snapshot.local_participant_id.clone(),
        unexpected_transitions: snapshot.unexpected_transitions,
    })
}

/// GET /turn
pub async fn get_turn(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.core.turn_status())
}

/// GET /leadership
pub async fn get_leadership(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "leadership": state.core.leadership_status().await,
        "capture": state.core.capture_state().await,
        "audio": state.core.audio_status(),
    }))
}

/// GET /recovery
pub async fn get_recovery(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "offered": state.core.recovery().offered() }))
}

// ============================================================================
// Session requests
// ============================================================================

/// POST /session/create
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Json<Accepted>> {
    info!("Creating session for {}", req.host_name);
    state
        .core
        .create_session(&req.host_name, req.turn_duration_seconds)
        .await?;
    Ok(Accepted::new("session:create"))
}

/// POST /session/join
pub async fn join_session(
    State(state): State<AppState>,
    Json(req): Json<JoinSessionRequest>,
) -> ApiResult<Json<Accepted>> {
    info!("Joining session {} as {}", req.code, req.guest_name);
    state.core.join_session(&req.code, &req.guest_name).await?;
    Ok(Accepted::new("session:join"))
}

/// POST /session/sync
pub async fn sync_session(
    State(state): State<AppState>,
    Json(patch): Json<SessionPatch>,
) -> ApiResult<Json<Accepted>> {
    state.core.sync_session(patch).await?;
    Ok(Accepted::new("session:sync"))
}

// ============================================================================
// Turn requests
// ============================================================================

/// POST /turn/end
pub async fn end_turn(State(state): State<AppState>) -> ApiResult<Json<Accepted>> {
    state.core.turns().end_turn().await?;
    Ok(Accepted::new("turn:end"))
}

/// POST /turn/extend
pub async fn extend_turn(
    State(state): State<AppState>,
    Json(req): Json<ExtendRequest>,
) -> ApiResult<Json<Accepted>> {
    state.core.turns().extend_turn(req.seconds).await?;
    Ok(Accepted::new("turn:extend"))
}

/// POST /pause
pub async fn request_pause(
    State(state): State<AppState>,
    Json(req): Json<PauseRequest>,
) -> ApiResult<Json<Accepted>> {
    state.core.turns().request_pause(req.reason).await?;
    Ok(Accepted::new("pause:request"))
}

/// POST /pause/resume
pub async fn resume(State(state): State<AppState>) -> ApiResult<Json<Accepted>> {
    state.core.turns().resume_from_pause().await?;
    Ok(Accepted::new("pause:resume"))
}

/// POST /breathing/start
pub async fn start_breathing(State(state): State<AppState>) -> ApiResult<Json<Accepted>> {
    state.core.turns().start_breathing().await?;
    Ok(Accepted::new("breathing:start"))
}

/// POST /breathing/complete
pub async fn complete_breathing(State(state): State<AppState>) -> ApiResult<Json<Accepted>> {
    state.core.turns().complete_breathing().await?;
    Ok(Accepted::new("breathing:complete"))
}

/// POST /reflection/dismiss
pub async fn dismiss_reflection(State(state): State<AppState>) -> ApiResult<Json<Accepted>> {
    state.core.turns().dismiss_reflection().await?;
    Ok(Accepted::new("reflection:dismiss"))
}

/// POST /conversation/end
pub async fn end_conversation(State(state): State<AppState>) -> ApiResult<Json<Accepted>> {
    state.core.turns().end_conversation().await?;
    Ok(Accepted::new("conversation:end"))
}

/// POST /vad/classifier
/// Speech decisions from an external classifier
pub async fn classifier_event(
    State(state): State<AppState>,
    Json(event): Json<ClassifierEvent>,
) -> impl IntoResponse {
    if state.core.classifier_event(event).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    }
}

// ============================================================================
// Recovery
// ============================================================================

/// POST /recovery/reconnect
pub async fn reconnect(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let info = state.core.reconnect().await?;
    Ok(Json(info))
}

/// POST /recovery/fresh
pub async fn start_fresh(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.core.start_fresh().await?;
    Ok(StatusCode::NO_CONTENT)
}
