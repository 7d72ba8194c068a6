use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use snapshot_sync_engine::BackupRecord;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups))
        .route("/new/full", post(new_full_backup))
        .route("/timer", get(backup_timer))
        .route("/reset", post(reset_backups))
        .route("/{id}", delete(delete_backup))
        .route("/{id}/restore", post(restore_backup))
        .route("/{id}/download", post(download_backup))
        .route("/{id}/pin", post(pin_backup))
        .route("/{id}/unpin", post(unpin_backup))
}

#[derive(Debug, Default, Deserialize)]
pub struct NewBackupRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimerResponse {
    pub milliseconds: u64,
}

async fn list_backups(State(state): State<Arc<AppState>>) -> Json<Vec<BackupRecord>> {
    Json(state.engine.list_backups().await)
}

async fn new_full_backup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewBackupRequest>,
) -> Result<StatusCode, AppError> {
    let name = body.name.trim().to_string();
    // An empty name resolves to the generated one, which can collide too
    if state.engine.name_exists(&name).await {
        return Err(AppError::Conflict("A backup with this name already exists".into()));
    }

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let requested = (!name.is_empty()).then_some(name.as_str());
        if let Err(e) = engine.perform_backup(requested).await {
            tracing::error!(error = %e, "Requested backup failed");
        }
    });

    Ok(StatusCode::ACCEPTED)
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_backup(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.restore_backup(&id).await?;
    Ok(StatusCode::OK)
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.download_backup(&id).await?;
    Ok(StatusCode::OK)
}

async fn pin_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.pin_backup(&id).await?;
    Ok(StatusCode::OK)
}

async fn unpin_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.unpin_backup(&id).await?;
    Ok(StatusCode::OK)
}

async fn backup_timer(State(state): State<Arc<AppState>>) -> Json<TimerResponse> {
    let left = state.engine.time_until_next_backup().await;
    Json(TimerResponse {
        milliseconds: u64::try_from(left.as_millis()).unwrap_or(u64::MAX),
    })
}

async fn reset_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackupRecord>>, AppError> {
    state.engine.reset_all().await?;
    Ok(Json(state.engine.list_backups().await))
}
