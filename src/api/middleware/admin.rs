use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::core_state::CoreState;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Gates a route group on a valid admin session token, taken from the
/// `?token=` query parameter on every gated route.
pub async fn require_admin_token(
    State(state): State<Arc<CoreState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match require_admin_token_inner(state, req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn require_admin_token_inner(
    state: Arc<CoreState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let Query(query) = Query::<TokenQuery>::from_request_parts(&mut parts, &state)
        .await
        .map_err(|_| ApiError::BadRequest("missing or invalid query string".to_string()))?;

    let token = query.token.ok_or(ApiError::Unauthorized)?;
    if !state.admin_auth.verify(&token) {
        return Err(ApiError::Unauthorized);
    }

    let req = Request::from_parts(parts, body);
    Ok(next.run(req).await)
}
