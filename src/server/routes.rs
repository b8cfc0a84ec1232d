//! HTTP route handlers for the mission control API.
//!
//! Request/response calls answer `{"success": true, "data": ...}`. A streamed
//! turn answers with raw UTF-8 text chunks; a failure after the headers were
//! sent aborts the body instead of closing it cleanly.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::agent::AgentError;
use crate::chat::{ChatState, SessionId, SessionInfo};
use crate::llm::{MODELS, ModelInfo};
use crate::tools::ToolSummary;

use super::error::ApiError;
use super::state::AppState;

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Successful response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Always `true`.
    pub success: bool,
    /// Payload.
    pub data: T,
}

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope {
        success: true,
        data,
    }))
}

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/tools", get(list_tools))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{session_id}", delete(delete_session))
        .route("/api/sessions/{session_id}/title", put(rename_session))
        .route("/api/chat/{session_id}/state", get(get_state))
        .route("/api/chat/{session_id}/turn", post(send_turn))
        .route("/api/chat/{session_id}/model", post(update_model))
        .route("/api/chat/{session_id}/history", delete(clear_history))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .with_state(state)
}

/// Session id from a path segment; malformed ids name no session.
fn path_session_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).map_err(|err| ApiError::not_found(err.to_string()))
}

fn unknown_session(id: &SessionId) -> ApiError {
    ApiError::not_found(format!("unknown session: {id}"))
}

async fn not_found() -> ApiError {
    ApiError::not_found("route not found")
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mission-control",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_models() -> ApiResult<&'static [ModelInfo]> {
    ok(MODELS)
}

async fn list_tools(State(state): State<Arc<AppState>>) -> ApiResult<Vec<ToolSummary>> {
    ok(state.tools.summaries())
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResult<Vec<SessionInfo>> {
    ok(state.directory.list().await?)
}

/// Session creation request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Display title; defaults to "New Mission".
    pub title: Option<String>,
    /// Caller-chosen id; generated when absent.
    pub id: Option<String>,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Result<Option<Json<CreateSessionRequest>>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<SessionInfo>>), ApiError> {
    let request = body?.map(|Json(request)| request).unwrap_or_default();
    let id = request
        .id
        .as_deref()
        .map(SessionId::parse)
        .transpose()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let info = state
        .directory
        .create(request.title.as_deref(), id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope {
            success: true,
            data: info,
        }),
    ))
}

/// Title change request.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// New title.
    pub title: String,
}

/// Rename outcome.
#[derive(Debug, Serialize)]
pub struct Renamed {
    /// Whether a session was renamed.
    pub renamed: bool,
}

async fn rename_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Renamed> {
    let Json(request) = body?;
    let renamed = match SessionId::parse(&session_id) {
        Ok(id) => state.directory.rename(&id, &request.title).await?,
        // A malformed id names no session.
        Err(_) => false,
    };
    ok(Renamed { renamed })
}

/// Deletion outcome.
#[derive(Debug, Serialize)]
pub struct Deleted {
    /// Whether a session was removed.
    pub deleted: bool,
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Deleted> {
    let id = path_session_id(&session_id)?;
    let deleted = state.directory.delete(&id).await?;
    ok(Deleted { deleted })
}

async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<ChatState> {
    let id = path_session_id(&session_id)?;
    let agent = state
        .agents
        .get(&id)
        .await?
        .ok_or_else(|| unknown_session(&id))?;
    ok(agent.state().await)
}

/// Turn request.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    /// User text.
    #[serde(alias = "message")]
    pub text: String,
    /// Model to switch to before this turn.
    pub model: Option<String>,
    /// Stream the answer as raw text chunks.
    #[serde(default)]
    pub stream: bool,
}

async fn send_turn(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = path_session_id(&session_id)?;
    let Json(request) = body?;
    if request.text.trim().is_empty() {
        // Reject before a session is materialised for it.
        return Err(AgentError::EmptyInput.into());
    }
    let agent = state.agents.get_or_create(&id).await?;

    if request.stream {
        let stream = agent.send_message_streaming(&request.text, request.model.as_deref())?;
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
            .body(Body::from_stream(stream))
            .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
        return Ok(response);
    }

    let chat_state = agent
        .send_message(&request.text, request.model.as_deref())
        .await?;
    Ok(ok(chat_state).into_response())
}

/// Model switch request.
#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    /// Model identifier.
    pub model: String,
}

async fn update_model(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Result<Json<ModelRequest>, JsonRejection>,
) -> ApiResult<ChatState> {
    let id = path_session_id(&session_id)?;
    let Json(request) = body?;
    if request.model.trim().is_empty() {
        return Err(AgentError::EmptyModel.into());
    }
    let agent = state.agents.get_or_create(&id).await?;
    ok(agent.update_model(&request.model).await?)
}

async fn clear_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<ChatState> {
    let id = path_session_id(&session_id)?;
    let agent = state
        .agents
        .get(&id)
        .await?
        .ok_or_else(|| unknown_session(&id))?;
    ok(agent.clear_history().await?)
}
