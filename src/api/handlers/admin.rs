use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::store::UserSummary;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

/// Admin login. Rate-limited per client IP by [`crate::admin_auth::AdminAuth`]
/// itself; the IP is taken from the socket peer address, not a header, so it
/// can't be spoofed by a client that controls its own request.
pub async fn login(
    State(state): State<Arc<CoreState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let admin_auth = state.admin_auth.clone();
    let client_ip = addr.ip().to_string();
    let token = tokio::task::spawn_blocking(move || admin_auth.login(&req.password, &client_ip))
        .await
        .unwrap()?;
    Ok(Json(LoginResponse { success: true, token }))
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

pub async fn logout(
    State(state): State<Arc<CoreState>>,
    Json(req): Json<LogoutRequest>,
) -> Json<LogoutResponse> {
    state.admin_auth.logout(&req.token);
    Json(LogoutResponse { success: true })
}

#[derive(Debug, Deserialize)]
pub struct EnrollStartRequest {
    pub name: String,
    pub employee_code: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct EnrollStartResponse {
    pub success: bool,
    pub user_id: i64,
    pub message: String,
    pub required_templates: i64,
}

pub async fn enroll_start(
    State(state): State<Arc<CoreState>>,
    Json(req): Json<EnrollStartRequest>,
) -> Result<Json<EnrollStartResponse>, ApiError> {
    if !state.admin_auth.verify(&req.token) {
        return Err(ApiError::Unauthorized);
    }
    let required_templates = state.config.read().await.fingerprint.required_templates;

    let store = state.store.clone();
    let user = tokio::task::spawn_blocking(move || store.create_user(&req.name, &req.employee_code))
        .await
        .unwrap()?;

    Ok(Json(EnrollStartResponse {
        success: true,
        user_id: user.id,
        message: "Enrollment started".to_string(),
        required_templates,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EnrollCaptureQuery {
    pub user_id: i64,
    pub sample_number: i64,
}

#[derive(Debug, Serialize)]
pub struct EnrollCaptureResponse {
    pub success: bool,
    pub quality: i64,
    pub sample_number: i64,
    pub message: String,
}

/// Captures one enrollment sample: grabs a ROI frame, extracts minutiae,
/// and — only if quality clears `min_quality_score` — persists the template.
/// A low-quality sample is reported back to the admin UI but never reaches
/// the Store.
pub async fn enroll_capture(
    State(state): State<Arc<CoreState>>,
    Query(query): Query<EnrollCaptureQuery>,
) -> Result<Json<EnrollCaptureResponse>, ApiError> {
    let (roi, min_quality_score, template_dir) = {
        let config = state.config.read().await;
        (
            config.camera.roi(),
            config.fingerprint.min_quality_score,
            config.storage.template_dir_path(),
        )
    };

    let store = state.store.clone();
    let user_id = query.user_id;
    let user = tokio::task::spawn_blocking(move || store.get_user(user_id))
        .await
        .unwrap()?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let stem = format!("{}_{}_{}", user.employee_code, query.sample_number, timestamp);
    let image_path = template_dir.join(format!("{stem}.png"));
    let xyt_path = template_dir.join(format!("{stem}.xyt"));

    let capture = state.capture.clone();
    let write_result = {
        let image_path = image_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut capture = capture.lock().unwrap();
            capture.capture_fingerprint(roi, &image_path)
        })
        .await
        .unwrap()
    };
    if write_result.is_err() {
        return Ok(Json(EnrollCaptureResponse {
            success: false,
            quality: 0,
            sample_number: query.sample_number,
            message: "Failed to capture fingerprint image".to_string(),
        }));
    }

    let matcher = state.matcher.clone();
    let (extracted, quality) = {
        let image_path = image_path.clone();
        let xyt_path = xyt_path.clone();
        tokio::task::spawn_blocking(move || matcher.extract_features(&image_path, &xyt_path))
            .await
            .unwrap()
    };
    if !extracted {
        return Ok(Json(EnrollCaptureResponse {
            success: false,
            quality: 0,
            sample_number: query.sample_number,
            message: "Failed to extract fingerprint features".to_string(),
        }));
    }
    if quality < min_quality_score {
        return Ok(Json(EnrollCaptureResponse {
            success: false,
            quality,
            sample_number: query.sample_number,
            message: "Fingerprint quality too low".to_string(),
        }));
    }

    let store = state.store.clone();
    let path_str = xyt_path.to_string_lossy().to_string();
    tokio::task::spawn_blocking(move || store.add_template(user_id, &path_str, quality))
        .await
        .unwrap()?;

    Ok(Json(EnrollCaptureResponse {
        success: true,
        quality,
        sample_number: query.sample_number,
        message: "Sample captured".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct UserListEntry {
    pub id: i64,
    pub name: String,
    pub employee_code: String,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub template_count: i64,
}

impl From<UserSummary> for UserListEntry {
    fn from(u: UserSummary) -> Self {
        Self {
            id: u.id,
            name: u.name,
            employee_code: u.employee_code,
            active: u.active,
            created_at: u.created_at,
            template_count: u.template_count,
        }
    }
}

pub async fn list_users(
    State(state): State<Arc<CoreState>>,
) -> Result<Json<Vec<UserListEntry>>, ApiError> {
    let store = state.store.clone();
    let users = tokio::task::spawn_blocking(move || store.list_users_with_template_counts())
        .await
        .unwrap()?;
    Ok(Json(users.into_iter().map(UserListEntry::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct SimpleSuccess {
    pub success: bool,
}

pub async fn deactivate_user(
    State(state): State<Arc<CoreState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<SimpleSuccess>, ApiError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.deactivate_user(user_id))
        .await
        .unwrap()?;
    Ok(Json(SimpleSuccess { success: true }))
}

pub async fn delete_user(
    State(state): State<Arc<CoreState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<SimpleSuccess>, ApiError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.delete_user(user_id))
        .await
        .unwrap()?;
    Ok(Json(SimpleSuccess { success: true }))
}

#[derive(Debug, Serialize)]
pub struct DeviceListEntry {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_devices(
    State(state): State<Arc<CoreState>>,
) -> Result<Json<Vec<DeviceListEntry>>, ApiError> {
    let store = state.store.clone();
    let devices = tokio::task::spawn_blocking(move || store.list_devices())
        .await
        .unwrap()?;
    Ok(Json(
        devices
            .into_iter()
            .map(|d| DeviceListEntry {
                id: d.device.id,
                user_id: d.user.id,
                user_name: d.user.name,
                name: d.device.name,
                created_at: d.device.created_at,
            })
            .collect(),
    ))
}

pub async fn delete_device(
    State(state): State<Arc<CoreState>>,
    Path(device_id): Path<i64>,
) -> Result<Json<SimpleSuccess>, ApiError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.delete_device(device_id))
        .await
        .unwrap()?;
    Ok(Json(SimpleSuccess { success: true }))
}
