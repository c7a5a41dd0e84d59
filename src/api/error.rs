use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::admin_auth::AdminAuthError;
use crate::device_auth::DeviceAuthError;
use crate::store::StoreError;
use crate::sync_worker::SyncError;

const MAX_LOG_DETAIL_LEN: usize = 200;

/// Truncates long detail strings and strips the parts of a SQLite
/// constraint-failure message that echo the offending column value, before
/// any detail string reaches the logs.
fn redact_detail(detail: &str) -> String {
    let mut result = detail.to_string();
    if result.len() > MAX_LOG_DETAIL_LEN {
        result.truncate(MAX_LOG_DETAIL_LEN);
        result.push_str("...[REDACTED]");
    }
    let lower = result.to_lowercase();
    if let Some(pos) = lower.find("constraint failed:") {
        let end = pos + "constraint failed:".len();
        result.truncate(end);
        result.push_str(" [REDACTED]");
    }
    result
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_seconds: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid or expired challenge")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            ApiError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Rate limit exceeded. Retry after {retry_after_seconds}s"),
            ),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, "FORBIDDEN", detail.clone()),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone()),
            ApiError::Unavailable(detail) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", detail.clone())
            }
            ApiError::Internal(detail) => {
                let safe_detail = redact_detail(detail);
                tracing::error!(detail = %safe_detail, "api internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_seconds } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(detail) => ApiError::NotFound(detail),
            StoreError::Duplicate(detail) => ApiError::BadRequest(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AdminAuthError> for ApiError {
    fn from(err: AdminAuthError) -> Self {
        match err {
            AdminAuthError::RateLimited => ApiError::RateLimited {
                retry_after_seconds: 60,
            },
            AdminAuthError::InvalidPassword => ApiError::Unauthorized,
            AdminAuthError::BadHash => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<DeviceAuthError> for ApiError {
    fn from(err: DeviceAuthError) -> Self {
        match err {
            DeviceAuthError::NotFound => ApiError::NotFound("device not found".to_string()),
            DeviceAuthError::NoChallenge | DeviceAuthError::ChallengeExpired => {
                ApiError::Forbidden("Invalid or expired challenge".to_string())
            }
            DeviceAuthError::Cooldown { retry_after_seconds } => {
                ApiError::RateLimited { retry_after_seconds }
            }
            DeviceAuthError::DailyLimitReached => ApiError::RateLimited {
                retry_after_seconds: 0,
            },
            DeviceAuthError::Store(e) => e.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(e) => e.into(),
            SyncError::Request(msg) => ApiError::Internal(msg),
        }
    }
}
