use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Queries
        .route("/session", get(handlers::get_session))
        .route("/turn", get(handlers::get_turn))
        .route("/leadership", get(handlers::get_leadership))
        .route("/recovery", get(handlers::get_recovery))
        // Session
        .route("/session/create", post(handlers::create_session))
        .route("/session/join", post(handlers::join_session))
        .route("/session/sync", post(handlers::sync_session))
        // Turn requests
        .route("/turn/end", post(handlers::end_turn))
        .route("/turn/extend", post(handlers::extend_turn))
        .route("/pause", post(handlers::request_pause))
        .route("/pause/resume", post(handlers::resume))
        .route("/breathing/start", post(handlers::start_breathing))
        .route("/breathing/complete", post(handlers::complete_breathing))
        .route("/reflection/dismiss", post(handlers::dismiss_reflection))
        .route("/conversation/end", post(handlers::end_conversation))
        .route("/vad/classifier", post(handlers::classifier_event))
        // Recovery
        .route("/recovery/reconnect", post(handlers::reconnect))
        .route("/recovery/fresh", post(handlers::start_fresh))
        // Host UI runs on another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
