pub mod clips;
pub mod health;
pub mod sessions;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(sessions::router())
        .merge(clips::router())
}
