use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::core_state::CoreState;
use crate::matcher::GalleryEntry;

#[derive(Debug, Serialize)]
pub struct PunchResponse {
    pub success: bool,
    pub message: String,
    pub user_name: Option<String>,
    pub punch_type: Option<String>,
    pub match_score: Option<i64>,
}

impl PunchResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            user_name: None,
            punch_type: None,
            match_score: None,
        }
    }
}

/// Kiosk-triggered punch: capture → extract → identify → record. Every
/// biometric failure mode returns HTTP 200 with `success:false` — these are
/// expected outcomes for an unattended kiosk, not transport errors.
pub async fn punch(State(state): State<Arc<CoreState>>) -> Json<PunchResponse> {
    Json(punch_inner(state).await)
}

async fn punch_inner(state: Arc<CoreState>) -> PunchResponse {
    let (roi, min_quality_score, probe_path) = {
        let config = state.config.read().await;
        (
            config.camera.roi(),
            config.fingerprint.min_quality_score,
            config.storage.temp_dir_path().join("probe_kiosk.png"),
        )
    };
    let xyt_path = probe_path.with_extension("xyt");

    let capture = state.capture.clone();
    let write_result = {
        let probe_path = probe_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut capture = capture.lock().unwrap();
            capture.capture_fingerprint(roi, &probe_path)
        })
        .await
        .unwrap()
    };
    if write_result.is_err() {
        return PunchResponse::failure("Failed to capture fingerprint image");
    }

    let matcher = state.matcher.clone();
    let (extracted, quality) = {
        let probe_path = probe_path.clone();
        let xyt_path = xyt_path.clone();
        tokio::task::spawn_blocking(move || matcher.extract_features(&probe_path, &xyt_path))
            .await
            .unwrap()
    };
    if !extracted {
        return PunchResponse::failure("Failed to extract fingerprint features");
    }
    if quality < min_quality_score {
        return PunchResponse::failure("Fingerprint quality too low");
    }

    let store = state.store.clone();
    let templates = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.get_all_templates())
            .await
            .unwrap()
    };
    let templates = match templates {
        Ok(t) => t,
        Err(e) => return PunchResponse::failure(format!("Store error: {e}")),
    };
    if templates.is_empty() {
        return PunchResponse::failure("No enrolled users");
    }

    let gallery: Vec<GalleryEntry> = templates
        .iter()
        .map(|t| GalleryEntry {
            template_id: t.id,
            xyt_path: t.template_path.clone(),
        })
        .collect();

    let matcher = state.matcher.clone();
    let identified = {
        let xyt_path = xyt_path.clone();
        tokio::task::spawn_blocking(move || matcher.identify(&xyt_path, &gallery))
            .await
            .unwrap()
    };
    let Some((template_id, score)) = identified else {
        return PunchResponse::failure("Fingerprint not recognized");
    };

    let Some(template) = templates.iter().find(|t| t.id == template_id) else {
        return PunchResponse::failure("Fingerprint not recognized");
    };

    let store = state.store.clone();
    let user_id = template.user_id;
    let user = tokio::task::spawn_blocking(move || store.get_user(user_id))
        .await
        .unwrap();
    let user = match user {
        Ok(Some(u)) if u.active => u,
        Ok(_) => return PunchResponse::failure("User not found or inactive"),
        Err(e) => return PunchResponse::failure(format!("Store error: {e}")),
    };

    let timeclock = state.timeclock.clone();
    let user_name = user.name.clone();
    let result = tokio::task::spawn_blocking(move || timeclock.record_punch(user.id, score))
        .await
        .unwrap();

    match result {
        Ok(punch) => PunchResponse {
            success: true,
            message: "Punch recorded".to_string(),
            user_name: Some(user_name),
            punch_type: Some(punch.punch_type.to_string()),
            match_score: Some(score),
        },
        Err(e) => PunchResponse::failure(e.to_string()),
    }
}
