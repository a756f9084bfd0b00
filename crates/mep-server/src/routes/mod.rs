pub mod attachments;
pub mod health;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use mep_core::constraints::FileConstraints;
use mep_service::FileStorageManager;
use tower_http::trace::TraceLayer;

/// Multipart overhead allowed on top of the configured maximum file size.
const BODY_LIMIT_SLACK: usize = 64 * 1024;
const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub struct InnerAppState {
    pub manager: FileStorageManager,
    pub constraints: FileConstraints,
}

pub type AppState = Arc<InnerAppState>;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .constraints
        .max_size
        .and_then(|max| usize::try_from(max).ok())
        .map_or(DEFAULT_BODY_LIMIT, |max| max.saturating_add(BODY_LIMIT_SLACK));

    Router::new()
        .merge(health::routes())
        .merge(attachments::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
