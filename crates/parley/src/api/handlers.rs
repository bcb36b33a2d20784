//! REST handlers for the relay's HTTP surface.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::chat::Chat;
use crate::markdown;
use crate::prompt::{NewPrompt, Prompt};
use crate::relay::{TurnAccepted, TurnRequest};
use crate::settings::DeliveryMode;

// ============================================================================
// Health & catalog
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    if !state.db.is_healthy().await {
        return Err(ApiError::service_unavailable("database unreachable"));
    }
    Ok(Json(HealthResponse { status: "ok" }))
}

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.models())
}

// ============================================================================
// Prompt catalog
// ============================================================================

/// GET /api/prompts
pub async fn list_prompts(State(state): State<AppState>) -> ApiResult<Json<Vec<Prompt>>> {
    Ok(Json(state.prompts.list().await?))
}

/// POST /api/prompts
pub async fn create_prompt(
    State(state): State<AppState>,
    Json(prompt): Json<NewPrompt>,
) -> ApiResult<(StatusCode, Json<Prompt>)> {
    if prompt.title.trim().is_empty() {
        return Err(ApiError::bad_request("prompt title must not be empty"));
    }
    let created = state.prompts.create(prompt).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/prompts/{id}
pub async fn get_prompt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Prompt>> {
    let prompt = state
        .prompts
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("prompt {id} not found")))?;
    Ok(Json(prompt))
}

/// PUT /api/prompts/{id}
pub async fn update_prompt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(prompt): Json<NewPrompt>,
) -> ApiResult<Json<Prompt>> {
    if prompt.title.trim().is_empty() {
        return Err(ApiError::bad_request("prompt title must not be empty"));
    }
    let updated = state
        .prompts
        .update(id, prompt)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("prompt {id} not found")))?;
    Ok(Json(updated))
}

// ============================================================================
// Questions & sessions
// ============================================================================

/// Request body for submitting a question.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    /// Session to continue; generated when absent.
    pub session_id: Option<String>,
    pub prompt_id: i64,
    pub model: String,
    pub question: String,
}

/// POST /api/questions
///
/// The response is only an acknowledgement; the answer arrives through
/// the delivery channel (websocket events or signal polling).
pub async fn ask_question(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ApiResult<(StatusCode, Json<TurnAccepted>)> {
    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let accepted = state
        .relay
        .submit_turn(TurnRequest {
            session_id,
            prompt_id: request.prompt_id,
            model: request.model,
            question: request.question,
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "question rejected");
            ApiError::from(e)
        })?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/sessions/{id}/signals
///
/// Pull-mode delivery: drains and returns everything queued for the
/// session since the last poll.
pub async fn poll_signals(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<crate::delivery::StreamSignal>>> {
    if state.delivery_mode != DeliveryMode::Pull {
        return Err(ApiError::bad_request(
            "server is configured for push delivery; connect to /api/ws instead",
        ));
    }
    Ok(Json(state.mailbox.drain(&session_id).await))
}

/// POST /api/sessions/{id}/reset
pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    state.relay.reset(&session_id);
    StatusCode::NO_CONTENT
}

// ============================================================================
// Chat browsing
// ============================================================================

/// GET /api/chats
pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<Vec<Chat>>> {
    Ok(Json(state.chats.list_chats().await?))
}

/// Query parameters for fetching a chat.
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    /// `html` renders message contents as sanitized markdown HTML.
    pub format: Option<String>,
}

/// A message as returned by the chat detail endpoint.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub kind: String,
    pub content: String,
    pub created_at: String,
}

/// Chat metadata plus its ordered transcript.
#[derive(Debug, Serialize)]
pub struct ChatDetail {
    pub chat: Chat,
    pub messages: Vec<MessageView>,
}

/// GET /api/chats/{id}
pub async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ChatQuery>,
) -> ApiResult<Json<ChatDetail>> {
    let chat = state
        .chats
        .get_chat(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("chat {id} not found")))?;

    let as_html = query.format.as_deref() == Some("html");

    let mut messages = Vec::new();
    for message in state.chats.list_messages(id).await? {
        let content = if as_html {
            markdown::render_html(&message.content).await
        } else {
            message.content
        };
        messages.push(MessageView {
            id: message.id,
            kind: message.kind,
            content,
            created_at: message.created_at,
        });
    }

    Ok(Json(ChatDetail { chat, messages }))
}
