use crate::server::AppState;
use axum::extract::Path;
use axum::routing::{delete, get, post};
use axum::{Extension, Json};
use cm_chat::{StreamId, parse_video_id};
use cm_core::SessionError;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateSessionRequest {
    url: String,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/sessions",
            get(list_sessions).post(create_session),
        )
        .route("/api/v1/sessions/{id}", delete(terminate_session))
        .route("/api/v1/sessions/{id}/pause", post(pause_session))
        .route("/api/v1/sessions/{id}/resume", post(resume_session))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_sessions(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.manager.list();
    Json(serde_json::json!({ "sessions": sessions }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn create_session(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Json<serde_json::Value> {
    let Some(video_id) = parse_video_id(&req.url) else {
        return Json(serde_json::json!({
            "status": "error",
            "error": "unsupported url; expected youtube.com/watch?v=, youtube.com/live/, youtube.com/embed/ or youtu.be/",
        }));
    };

    let info = match state.chat.resolve_stream(video_id.as_str()).await {
        Ok(info) => info,
        Err(e) => {
            return Json(serde_json::json!({ "status": "error", "error": e.to_string() }));
        }
    };

    let routing = state.routing.resolve(&info);
    let live_chat_id = info.live_chat_id.clone();
    let summary = match state.manager.create(info, routing) {
        Ok(summary) => summary,
        Err(SessionError::AlreadyExists(stream_id)) => {
            return Json(serde_json::json!({
                "status": "already_exists",
                "stream_id": stream_id,
            }));
        }
        Err(e) => {
            return Json(serde_json::json!({ "status": "error", "error": e.to_string() }));
        }
    };

    // Seed the cursor at the live head so the first poll sees only new
    // messages. Best effort: the watermark alone already protects against
    // pre-session history.
    match state.chat.fetch_page(&live_chat_id, None).await {
        Ok(page) => {
            let _ = state
                .manager
                .prime_cursor(&summary.stream_id, page.next_cursor);
        }
        Err(e) => {
            tracing::warn!(
                stream_id = %summary.stream_id,
                error = %e,
                "could not prime cursor; starting without a page token"
            );
        }
    }

    if let Err(e) = state.manager.activate(&summary.stream_id) {
        return Json(serde_json::json!({ "status": "error", "error": e.to_string() }));
    }
    let session = state.manager.get(&summary.stream_id);
    Json(serde_json::json!({ "status": "ok", "session": session }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn pause_session(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.manager.pause(&StreamId::new(id)) {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })),
        Err(SessionError::NotFound(_)) => Json(serde_json::json!({ "status": "not_found" })),
        Err(e) => Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn resume_session(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.manager.activate(&StreamId::new(id)) {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })),
        Err(SessionError::NotFound(_)) => Json(serde_json::json!({ "status": "not_found" })),
        Err(e) => Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn terminate_session(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    // Idempotent: terminating an absent session is still a success.
    let removed = state.manager.terminate(&StreamId::new(id));
    Json(serde_json::json!({ "status": "ok", "removed": removed }))
}
