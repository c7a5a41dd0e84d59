use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe with no business meaning, used by deployment tooling and
/// the test suite to confirm the process is up.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
