use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::core_state::CoreState;

/// Single-shot JPEG snapshot for the admin calibration live view. 503 if the
/// camera has no frame available rather than a 500 — an unplugged or busy
/// camera is an expected operational state, not a server bug.
pub async fn stream(State(state): State<Arc<CoreState>>) -> Result<Response, ApiError> {
    let capture = state.capture.clone();
    let jpeg = tokio::task::spawn_blocking(move || {
        let mut capture = capture.lock().unwrap();
        capture.get_frame_jpeg()
    })
    .await
    .unwrap();

    match jpeg {
        Some(bytes) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response()),
        None => Err(ApiError::Unavailable("camera has no frame available".to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct RoiResponse {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub async fn get_roi(State(state): State<Arc<CoreState>>) -> Json<RoiResponse> {
    let config = state.config.read().await;
    Json(RoiResponse {
        x: config.camera.roi_x,
        y: config.camera.roi_y,
        width: config.camera.roi_width,
        height: config.camera.roi_height,
    })
}

#[derive(Debug, Deserialize)]
pub struct SetRoiRequest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Persists a new ROI to the in-memory config and the on-disk TOML file,
/// serialized through [`crate::config::ConfigHandle`] so a second concurrent
/// save can't interleave with this one.
pub async fn set_roi(
    State(state): State<Arc<CoreState>>,
    Json(req): Json<SetRoiRequest>,
) -> Result<Json<RoiResponse>, ApiError> {
    let mut config = state.config.write().await;
    if req.x.saturating_add(req.width) > config.camera.resolution_width
        || req.y.saturating_add(req.height) > config.camera.resolution_height
    {
        return Err(ApiError::BadRequest("ROI exceeds configured camera resolution".to_string()));
    }

    config.camera.roi_x = req.x;
    config.camera.roi_y = req.y;
    config.camera.roi_width = req.width;
    config.camera.roi_height = req.height;

    state
        .config_handle
        .save(&config)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(RoiResponse {
        x: config.camera.roi_x,
        y: config.camera.roi_y,
        width: config.camera.roi_width,
        height: config.camera.roi_height,
    }))
}
