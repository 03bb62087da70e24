use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.manager.list();
    let active = sessions
        .iter()
        .filter(|s| s.state == cm_core::SessionState::Active)
        .count();
    let running_poll_tasks = state.scheduler.running_sessions().await;

    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "sessions": sessions.len(),
        "active_sessions": active,
        "running_poll_tasks": running_poll_tasks,
    }))
}
