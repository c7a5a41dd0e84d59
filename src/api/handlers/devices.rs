use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::core_state::CoreState;

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub user_id: i64,
    pub token: String,
    pub name: String,
    pub admin_token: String,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub success: bool,
}

pub async fn enroll(
    State(state): State<Arc<CoreState>>,
    headers: HeaderMap,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, ApiError> {
    if !state.admin_auth.verify(&req.admin_token) {
        return Err(ApiError::Unauthorized);
    }
    let ua = user_agent(&headers);
    let device_auth = state.device_auth.clone();
    tokio::task::spawn_blocking(move || {
        let device_auth = device_auth.lock().unwrap();
        device_auth.enroll(req.user_id, &req.token, &req.name, ua.as_deref())
    })
    .await
    .unwrap()?;
    Ok(Json(EnrollResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub challenge: String,
    pub expires_in: i64,
}

pub async fn challenge(
    State(state): State<Arc<CoreState>>,
    headers: HeaderMap,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let ua = user_agent(&headers);
    let device_auth = state.device_auth.clone();
    let (value, ttl) = tokio::task::spawn_blocking(move || {
        let mut device_auth = device_auth.lock().unwrap();
        device_auth.challenge(&req.token, ua.as_deref())
    })
    .await
    .unwrap()?;
    Ok(Json(ChallengeResponse {
        challenge: value,
        expires_in: ttl,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DevicePunchRequest {
    pub token: String,
    pub challenge: String,
}

#[derive(Debug, Serialize)]
pub struct DevicePunchResponse {
    pub success: bool,
    pub user_name: String,
    pub punch_type: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub async fn device_punch(
    State(state): State<Arc<CoreState>>,
    Json(req): Json<DevicePunchRequest>,
) -> Result<Json<DevicePunchResponse>, ApiError> {
    let device_auth = state.device_auth.clone();
    let store = state.store.clone();
    let punch = tokio::task::spawn_blocking(move || {
        let mut device_auth = device_auth.lock().unwrap();
        device_auth.punch(&req.token, &req.challenge)
    })
    .await
    .unwrap()?;

    let user = tokio::task::spawn_blocking(move || store.get_user(punch.user_id))
        .await
        .unwrap()?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    Ok(Json(DevicePunchResponse {
        success: true,
        user_name: user.name,
        punch_type: punch.punch_type.to_string(),
        timestamp: punch.timestamp_utc,
    }))
}

#[derive(Debug, Deserialize)]
pub struct MyStatusQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MyStatusResponse {
    pub enrolled: bool,
    pub device_name: Option<String>,
    pub user_name: Option<String>,
}

pub async fn my_status(
    State(state): State<Arc<CoreState>>,
    Query(query): Query<MyStatusQuery>,
) -> Result<Json<MyStatusResponse>, ApiError> {
    let store = state.store.clone();
    let device = tokio::task::spawn_blocking(move || store.get_device_by_token(&query.token))
        .await
        .unwrap()?;

    Ok(Json(match device {
        Some(d) => MyStatusResponse {
            enrolled: true,
            device_name: Some(d.device.name),
            user_name: Some(d.user.name),
        },
        None => MyStatusResponse {
            enrolled: false,
            device_name: None,
            user_name: None,
        },
    }))
}
