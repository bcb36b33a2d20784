//! API route definitions.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use crate::ws::ws_handler;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/models", get(handlers::list_models))
        // Prompt catalog
        .route(
            "/api/prompts",
            get(handlers::list_prompts).post(handlers::create_prompt),
        )
        .route(
            "/api/prompts/{id}",
            get(handlers::get_prompt).put(handlers::update_prompt),
        )
        // Questions & sessions
        .route("/api/questions", post(handlers::ask_question))
        .route(
            "/api/sessions/{session_id}/signals",
            get(handlers::poll_signals),
        )
        .route(
            "/api/sessions/{session_id}/reset",
            post(handlers::reset_session),
        )
        // Chat browsing
        .route("/api/chats", get(handlers::list_chats))
        .route("/api/chats/{id}", get(handlers::get_chat))
        // Streaming edge
        .route("/api/ws", get(ws_handler))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
