//! HTTP API for the host UI
//!
//! Exposes the conversation core to the host application:
//! - GET /session, /turn, /leadership, /recovery - Current state
//! - POST /session/create, /session/join - Start or join a session
//! - POST /turn/end, /turn/extend, /pause, /pause/resume - Turn requests
//! - POST /recovery/reconnect, /recovery/fresh - Recovery choice
//! - GET /health - Health check
//!
//! Turn guard violations answer 409, authority transport failures 502.

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{ChannelAuthority, ClientRequest, ServerEvent};
    use crate::clock::ManualClock;
    use crate::conversation::{ConversationCore, CoreParts, CoreSettings};
    use crate::leadership::LocalBusHub;
    use crate::recovery::MemoryInfoStore;
    use crate::session::{Phase, SessionPatch};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn app() -> (
        axum::Router,
        Arc<ConversationCore>,
        Arc<ChannelAuthority>,
        mpsc::UnboundedReceiver<ClientRequest>,
    ) {
        let (authority, requests) = ChannelAuthority::new();
        let authority = Arc::new(authority);
        let core = ConversationCore::new(
            CoreParts {
                authority: authority.clone(),
                bus_factory: Arc::new(LocalBusHub::new()),
                info_store: Arc::new(MemoryInfoStore::new()),
                capture: None,
                clock: Arc::new(ManualClock::new(0)),
            },
            CoreSettings::default(),
        );
        (
            create_router(AppState::new(core.clone())),
            core,
            authority,
            requests,
        )
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, ..) = app();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_session_forwards_request() {
        let (app, _core, _authority, mut requests) = app();
        let response = app
            .oneshot(post("/session/create", r#"{"hostName":"Ana"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            requests.recv().await.unwrap(),
            ClientRequest::SessionCreate {
                host_name: "Ana".to_string(),
                turn_duration_seconds: None,
            }
        );
    }

    #[tokio::test]
    async fn test_turn_guard_is_conflict() {
        let (app, ..) = app();
        let response = app.oneshot(post("/turn/end", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json(response).await;
        assert!(body["error"].as_str().unwrap().contains("not active"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_bad_gateway() {
        let (app, core, authority, _requests) = app();
        core.handle_event(ServerEvent::SessionCreated {
            session_id: "s1".to_string(),
            session_code: "ABC123".to_string(),
            participant_id: "p1".to_string(),
        })
        .await;
        core.handle_event(ServerEvent::SessionUpdated(SessionPatch::phase(
            Phase::PreConversation,
        )))
        .await;
        core.handle_event(ServerEvent::SessionUpdated(SessionPatch::phase(Phase::Active)))
            .await;

        authority.set_connected(false);
        let response = app
            .oneshot(post("/pause", r#"{"reason":"user-requested"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        core.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_view() {
        let (app, core, ..) = app();
        core.handle_event(ServerEvent::SessionCreated {
            session_id: "s1".to_string(),
            session_code: "ABC123".to_string(),
            participant_id: "p1".to_string(),
        })
        .await;

        let body = json(app.oneshot(get("/session")).await.unwrap()).await;
        assert_eq!(body["session"]["sessionCode"], "ABC123");
        assert_eq!(body["session"]["phase"], "connecting");
        assert_eq!(body["localParticipantId"], "p1");
        core.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_forwards_partial_state() {
        let (app, core, _authority, mut requests) = app();
        core.handle_event(ServerEvent::SessionCreated {
            session_id: "s1".to_string(),
            session_code: "ABC123".to_string(),
            participant_id: "p1".to_string(),
        })
        .await;

        let response = app
            .oneshot(post(
                "/session/sync",
                r#"{"turnTimeSeconds":60,"currentSpeakerId":null}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["request"], "session:sync");
        assert_eq!(
            requests.recv().await.unwrap(),
            ClientRequest::SessionSync(SessionPatch {
                turn_time_seconds: Some(60),
                current_speaker_id: Some(None),
                ..SessionPatch::default()
            })
        );
        core.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_refused_once_ended() {
        let (app, core, _authority, mut requests) = app();
        core.handle_event(ServerEvent::SessionCreated {
            session_id: "s1".to_string(),
            session_code: "ABC123".to_string(),
            participant_id: "p1".to_string(),
        })
        .await;
        core.handle_event(ServerEvent::SessionUpdated(SessionPatch::phase(Phase::Ended)))
            .await;

        let response = app
            .oneshot(post("/session/sync", r#"{"turnTimeSeconds":60}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_without_offer_is_conflict() {
        let (app, ..) = app();
        let response = app
            .oneshot(post("/recovery/reconnect", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
