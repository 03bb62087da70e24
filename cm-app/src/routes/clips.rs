use crate::server::AppState;
use axum::extract::Query;
use axum::routing::get;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
struct ClipsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/clips", get(list_clips))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_clips(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ClipsQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    match state.store.recent_clips(limit).await {
        Ok(clips) => Json(serde_json::json!({
            "status": "ok",
            "count": clips.len(),
            "clips": clips,
        })),
        Err(e) => Json(serde_json::json!({ "status": "error", "error": format!("{e:#}") })),
    }
}
