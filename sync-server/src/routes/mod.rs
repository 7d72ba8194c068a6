pub mod backups;
pub mod config;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let ui_dir = state.config.ui_dir.clone();
    let index_html = ui_dir.join("index.html");

    Router::new()
        .nest("/api/backups", backups::router(state.clone()))
        .nest("/api/config", config::router(state.clone()))
        .fallback_service(ServeDir::new(&ui_dir).fallback(ServeFile::new(index_html)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
