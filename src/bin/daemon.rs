//! `biopunchd` — the kiosk daemon. Loads config, opens the Store, wires up
//! every component behind [`biopunch::core_state::CoreState`], starts the
//! background workers, and serves the HTTP surface until interrupted.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use biopunch::admin_auth::AdminAuth;
use biopunch::api;
use biopunch::autopunch::{AutoPunch, AutoPunchConfig};
use biopunch::capture::{Capture, CameraDevice, Frame};
use biopunch::config::{Config, ConfigHandle};
use biopunch::core_state::CoreState;
use biopunch::device_auth::DeviceAuth;
use biopunch::matcher::Matcher;
use biopunch::store::Store;
use biopunch::sync_worker::SyncWorker;
use biopunch::timeclock::TimeClock;

#[derive(Parser)]
#[command(name = "biopunchd")]
#[command(about = "Kiosk-grade fingerprint time-clock daemon", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/biopunch/config.toml")]
    config: PathBuf,
}

/// Placeholder for the real V4L2 camera binding, which is an external
/// collaborator out of this crate's scope. Always reports "no frame" so
/// the daemon still boots and serves everything else on hardware that
/// hasn't been wired up yet; a real deployment swaps this for a V4L2
/// adapter implementing the same [`CameraDevice`] trait.
struct UnboundCamera;

impl CameraDevice for UnboundCamera {
    fn open(&mut self, _width: u32, _height: u32) -> bool {
        tracing::warn!("no camera binding configured; capture will report no frames");
        false
    }

    fn is_open(&self) -> bool {
        false
    }

    fn close(&mut self) {}

    fn capture_frame(&mut self) -> Option<Frame> {
        None
    }
}

#[tokio::main]
async fn main() {
    biopunch::init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.config).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = ?args.config, "failed to load config, using defaults");
        Config::default()
    });

    std::fs::create_dir_all(config.storage.template_dir_path())?;
    std::fs::create_dir_all(config.storage.temp_dir_path())?;

    let store = Arc::new(Store::open(std::path::Path::new(&config.database.path))?);
    let timeclock = Arc::new(TimeClock::new(
        store.clone(),
        config.timeclock.antibounce_seconds,
        config.app.device_id.clone(),
    ));
    let matcher = Arc::new(Matcher::new_nbis(
        PathBuf::from(&config.fingerprint.mindtct_path),
        PathBuf::from(&config.fingerprint.bozorth3_path),
        config.fingerprint.match_threshold,
    )?);
    let capture = Arc::new(Mutex::new(Capture::new(
        Box::new(UnboundCamera),
        config.camera.resolution_width,
        config.camera.resolution_height,
    )));

    let autopunch_config = AutoPunchConfig {
        roi: config.camera.roi(),
        difference_threshold: config.autopunch.difference_threshold,
        stable_frames: config.autopunch.stable_frames,
        cooldown_seconds: config.autopunch.cooldown_seconds,
        min_quality_score: config.fingerprint.min_quality_score,
        match_threshold: config.fingerprint.match_threshold,
        probe_image_path: config.storage.temp_dir_path().join("autopunch_probe.png"),
        probe_xyt_path: config.storage.temp_dir_path().join("autopunch_probe.xyt"),
    };
    let mut autopunch_worker = AutoPunch::new(
        capture.clone(),
        matcher.clone(),
        store.clone(),
        timeclock.clone(),
        autopunch_config,
    );
    if config.autopunch.enabled_on_startup {
        autopunch_worker.enable();
    }
    autopunch_worker.start();
    let autopunch = Arc::new(Mutex::new(autopunch_worker));

    let device_auth = Arc::new(Mutex::new(DeviceAuth::new(
        store.clone(),
        timeclock.clone(),
        config.device_security.challenge_expiry_seconds,
        config.timeclock.punch_cooldown_seconds,
        config.timeclock.max_punches_per_day,
    )));

    let admin_auth = Arc::new(AdminAuth::new(config.app.admin_password_hash.clone()));

    let mut sync_worker = SyncWorker::new(
        store.clone(),
        config.server.url.clone(),
        config.server.api_key.clone(),
        config.server.enabled,
        std::time::Duration::from_secs(config.server.sync_interval_minutes.max(1) as u64 * 60),
    );
    sync_worker.start();
    let sync_worker = Arc::new(AsyncMutex::new(sync_worker));

    let host = config.app.host.clone();
    let port = config.app.port;
    let config_path = args.config.clone();

    let state = Arc::new(CoreState {
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
    });

    let mut server = api::server::start(&host, port, state.clone()).await?;
    tracing::info!(addr = %server.addr, "biopunchd listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    server.shutdown().await;
    state.autopunch.lock().unwrap().stop();
    state.sync_worker.lock().await.stop().await;

    Ok(())
}
