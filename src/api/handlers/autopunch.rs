use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::autopunch::{AutoPunchStatus, LastPunchResult};
use crate::core_state::CoreState;

pub async fn status(State(state): State<Arc<CoreState>>) -> Json<AutoPunchStatus> {
    let autopunch = state.autopunch.lock().unwrap();
    Json(autopunch.status())
}

pub async fn last_result(State(state): State<Arc<CoreState>>) -> Json<Option<LastPunchResult>> {
    let autopunch = state.autopunch.lock().unwrap();
    Json(autopunch.status().last_punch)
}

#[derive(Debug, Serialize)]
pub struct SimpleSuccess {
    pub success: bool,
}

pub async fn enable(State(state): State<Arc<CoreState>>) -> Json<SimpleSuccess> {
    state.autopunch.lock().unwrap().enable();
    Json(SimpleSuccess { success: true })
}

pub async fn disable(State(state): State<Arc<CoreState>>) -> Json<SimpleSuccess> {
    state.autopunch.lock().unwrap().disable();
    Json(SimpleSuccess { success: true })
}
