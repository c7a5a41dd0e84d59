use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::sync_worker::SyncStatus;

pub async fn status(State(state): State<Arc<CoreState>>) -> Result<Json<SyncStatus>, ApiError> {
    let worker = state.sync_worker.lock().await;
    Ok(Json(worker.status()?))
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub success: bool,
}

pub async fn trigger(State(state): State<Arc<CoreState>>) -> Result<Json<TriggerResponse>, ApiError> {
    let worker = state.sync_worker.lock().await;
    worker.sync_now().await?;
    Ok(Json(TriggerResponse { success: true }))
}
