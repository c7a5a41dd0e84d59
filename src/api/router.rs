//! HTTP surface: one `Router` per resource area, merged under `/api`.
//!
//! Admin-gated routes carry the [`middleware::admin::require_admin_token`]
//! layer; the kiosk punch endpoint and the companion-device channel verify
//! their own tokens inline (device tokens and admin tokens are different
//! credentials reached through different request shapes).

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{admin, autopunch, calibration, devices, health, punch, sync};
use crate::api::middleware;
use crate::core_state::CoreState;

pub fn build_router(state: Arc<CoreState>) -> Router {
    let admin_routes = Router::new()
        .route("/admin/enroll/capture", post(admin::enroll_capture))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{id}/deactivate", post(admin::deactivate_user))
        .route("/admin/users/{id}", delete(admin::delete_user))
        .route("/admin/devices", get(admin::list_devices))
        .route("/admin/devices/{id}", delete(admin::delete_device))
        .route("/sync/trigger", post(sync::trigger))
        .route("/autopunch/enable", post(autopunch::enable))
        .route("/autopunch/disable", post(autopunch::disable))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admin::require_admin_token,
        ));

    let open_routes = Router::new()
        .route("/admin/login", post(admin::login))
        .route("/admin/logout", post(admin::logout))
        .route("/admin/enroll/start", post(admin::enroll_start))
        .route("/devices/enroll", post(devices::enroll))
        .route("/devices/challenge", post(devices::challenge))
        .route("/devices/punch", post(devices::device_punch))
        .route("/devices/my-status", get(devices::my_status))
        .route("/punch", post(punch::punch))
        .route("/sync/status", get(sync::status))
        .route("/autopunch/status", get(autopunch::status))
        .route("/autopunch/last-result", get(autopunch::last_result))
        .route("/calibration/stream", get(calibration::stream))
        .route("/calibration/roi", get(calibration::get_roi))
        .route("/calibration/roi", post(calibration::set_roi))
        .route("/health", get(health::check));

    Router::new()
        .nest("/api", admin_routes.merge(open_routes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin_auth::AdminAuth;
    use crate::autopunch::{AutoPunch, AutoPunchConfig as WorkerConfig};
    use crate::capture::{Capture, CameraDevice, Frame, Roi};
    use crate::config::{Config, ConfigHandle};
    use crate::device_auth::DeviceAuth;
    use crate::matcher::{Extractor, Matcher, Scorer};
    use crate::store::Store;
    use crate::sync_worker::SyncWorker;
    use crate::timeclock::TimeClock;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    struct NullCamera;
    impl CameraDevice for NullCamera {
        fn open(&mut self, _w: u32, _h: u32) -> bool {
            true
        }
        fn is_open(&self) -> bool {
            true
        }
        fn close(&mut self) {}
        fn capture_frame(&mut self) -> Option<Frame> {
            Frame::new(4, 4, vec![0; 48])
        }
    }

    struct FakeExtractor;
    impl Extractor for FakeExtractor {
        fn extract_features(&self, _image_path: &Path, _output_xyt_path: &Path) -> (bool, i64) {
            (true, 80)
        }
    }

    struct FakeScorer;
    impl Scorer for FakeScorer {
        fn score(&self, _probe: &Path, _candidate: &Path) -> i64 {
            90
        }
    }

    fn test_state() -> Arc<CoreState> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Config::default();
        let timeclock = Arc::new(TimeClock::new(
            store.clone(),
            config.timeclock.antibounce_seconds,
            config.app.device_id.clone(),
        ));
        let matcher = Arc::new(
            Matcher::new(Box::new(FakeExtractor), Box::new(FakeScorer), config.fingerprint.match_threshold)
                .unwrap(),
        );
        let capture = Arc::new(StdMutex::new(Capture::new(Box::new(NullCamera), 4, 4)));
        let autopunch_config = WorkerConfig {
            roi: Roi { x: 0, y: 0, w: 4, h: 4 },
            difference_threshold: config.autopunch.difference_threshold,
            stable_frames: config.autopunch.stable_frames,
            cooldown_seconds: config.autopunch.cooldown_seconds,
            min_quality_score: config.fingerprint.min_quality_score,
            match_threshold: config.fingerprint.match_threshold,
            probe_image_path: std::env::temp_dir().join("router_test_probe.png"),
            probe_xyt_path: std::env::temp_dir().join("router_test_probe.xyt"),
        };
        let autopunch = Arc::new(StdMutex::new(AutoPunch::new(
            capture.clone(),
            matcher.clone(),
            store.clone(),
            timeclock.clone(),
            autopunch_config,
        )));
        let admin_auth = Arc::new(AdminAuth::new(AdminAuth::hash_password("admin-pw").unwrap()));
        let device_auth = Arc::new(StdMutex::new(DeviceAuth::new(
            store.clone(),
            timeclock.clone(),
            config.device_security.challenge_expiry_seconds,
            config.timeclock.punch_cooldown_seconds,
            config.timeclock.max_punches_per_day,
        )));
        let sync_worker = Arc::new(AsyncMutex::new(SyncWorker::new(
            store.clone(),
            config.server.url.clone(),
            config.server.api_key.clone(),
            config.server.enabled,
            std::time::Duration::from_secs(300),
        )));
        let config_path = std::env::temp_dir().join("router_test_config.toml");

        Arc::new(CoreState {
            store,
            matcher,
            capture,
            timeclock,
            autopunch,
            sync_worker,
            admin_auth,
            device_auth,
            config: Arc::new(RwLock::new(config)),
            config_handle: Arc::new(ConfigHandle::new(config_path)),
        })
    }

    fn app() -> Router {
        build_router(test_state())
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let resp = app()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_route_without_token_is_rejected() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/api/admin/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn punch_on_empty_gallery_reports_structured_failure_with_200() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/punch")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "No enrolled users");
    }

    #[tokio::test]
    async fn calibration_stream_returns_jpeg_for_working_camera() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/api/calibration/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "image/jpeg");
    }

    #[tokio::test]
    async fn admin_login_then_authorized_users_list_succeeds() {
        let state = test_state();
        let router = build_router(state.clone());

        let mut login_req = Request::builder()
            .method("POST")
            .uri("/api/admin/login")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"password":"admin-pw"}"#))
            .unwrap();
        let addr: std::net::SocketAddr = "192.168.1.100:12345".parse().unwrap();
        login_req
            .extensions_mut()
            .insert(axum::extract::ConnectInfo(addr));

        let login_resp = router.clone().oneshot(login_req).await.unwrap();
        assert_eq!(login_resp.status(), StatusCode::OK);
        let body = body_json(login_resp).await;
        let token = body["token"].as_str().unwrap().to_string();

        let users_resp = router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/admin/users?token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(users_resp.status(), StatusCode::OK);
    }
}
