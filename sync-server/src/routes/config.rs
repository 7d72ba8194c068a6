use crate::error::AppError;
use crate::options::Options;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_config))
        .route("/update", post(update_config))
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<Options> {
    Json(state.options.get().await)
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Options>,
) -> Result<Json<Options>, AppError> {
    let options = state.options.update(body).await?;
    Ok(Json(options))
}
