use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capture::{frame_difference_ratio, Capture, Frame, Roi};
use crate::matcher::{GalleryEntry, Matcher};
use crate::store::Store;
use crate::timeclock::TimeClock;

#[derive(Debug, Clone, Serialize)]
pub struct LastPunchResult {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub message: String,
    pub user_name: Option<String>,
    pub punch_type: Option<String>,
    pub match_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoPunchStatus {
    pub running: bool,
    pub enabled: bool,
    pub cooldown_seconds: i64,
    pub last_punch: Option<LastPunchResult>,
}

pub struct AutoPunchConfig {
    pub roi: Roi,
    pub difference_threshold: f64,
    pub stable_frames: u32,
    pub cooldown_seconds: i64,
    pub min_quality_score: i64,
    pub match_threshold: i64,
    pub probe_image_path: std::path::PathBuf,
    pub probe_xyt_path: std::path::PathBuf,
}

/// Background motion-detection worker. Runs on a dedicated OS thread (not a
/// tokio task) because it owns the camera handle for its whole lifetime and
/// every step — capture, extract, match — is blocking work; parking a tokio
/// worker thread on it would starve the request-dispatch pool.
pub struct AutoPunch {
    capture: Arc<Mutex<Capture>>,
    matcher: Arc<Matcher>,
    store: Arc<Store>,
    timeclock: Arc<TimeClock>,
    config: AutoPunchConfig,
    running: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    last_result: Arc<Mutex<Option<LastPunchResult>>>,
    handle: Option<JoinHandle<()>>,
}

impl AutoPunch {
    pub fn new(
        capture: Arc<Mutex<Capture>>,
        matcher: Arc<Matcher>,
        store: Arc<Store>,
        timeclock: Arc<TimeClock>,
        config: AutoPunchConfig,
    ) -> Self {
        Self {
            capture,
            matcher,
            store,
            timeclock,
            config,
            running: Arc::new(AtomicBool::new(false)),
            enabled: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            last_result: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> AutoPunchStatus {
        AutoPunchStatus {
            running: self.running.load(Ordering::SeqCst),
            enabled: self.enabled.load(Ordering::SeqCst),
            cooldown_seconds: self.config.cooldown_seconds,
            last_punch: self.last_result.lock().unwrap().clone(),
        }
    }

    pub fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let capture = self.capture.clone();
        let matcher = self.matcher.clone();
        let store = self.store.clone();
        let timeclock = self.timeclock.clone();
        let enabled = self.enabled.clone();
        let running = self.running.clone();
        let stop = self.stop.clone();
        let last_result = self.last_result.clone();
        let roi = self.config.roi;
        let difference_threshold = self.config.difference_threshold;
        let stable_frames = self.config.stable_frames;
        let cooldown_seconds = self.config.cooldown_seconds;
        let min_quality_score = self.config.min_quality_score;
        let probe_image_path = self.config.probe_image_path.clone();
        let probe_xyt_path = self.config.probe_xyt_path.clone();

        self.handle = Some(std::thread::spawn(move || {
            monitor_loop(MonitorContext {
                capture,
                matcher,
                store,
                timeclock,
                enabled,
                stop,
                last_result,
                roi,
                difference_threshold,
                stable_frames,
                cooldown_seconds,
                min_quality_score,
                probe_image_path,
                probe_xyt_path,
            });
            running.store(false, Ordering::SeqCst);
        }));
    }

    /// Signals the monitor loop to stop and joins it with a 5-second bound.
    /// The loop only checks the stop flag between frames; a punch in flight
    /// (up to 10s extract + 5s per gallery candidate) can run well past that
    /// bound, so the join is capped rather than unconditional — the thread
    /// is left to finish and exit on its own if it doesn't make the deadline.
    /// Then closes the camera so the device isn't left open across restarts.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while !handle.is_finished() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        if let Ok(mut capture) = self.capture.lock() {
            capture.close();
        }
    }
}

struct MonitorContext {
    capture: Arc<Mutex<Capture>>,
    matcher: Arc<Matcher>,
    store: Arc<Store>,
    timeclock: Arc<TimeClock>,
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    last_result: Arc<Mutex<Option<LastPunchResult>>>,
    roi: Roi,
    difference_threshold: f64,
    stable_frames: u32,
    cooldown_seconds: i64,
    min_quality_score: i64,
    probe_image_path: std::path::PathBuf,
    probe_xyt_path: std::path::PathBuf,
}

fn monitor_loop(ctx: MonitorContext) {
    let mut baseline: Option<Frame> = None;
    let mut stable_count: u32 = 0;
    let mut last_punch_time: Option<std::time::Instant> = None;

    while !ctx.stop.load(Ordering::SeqCst) {
        if !ctx.enabled.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(500));
            continue;
        }

        if let Some(last) = last_punch_time {
            if last.elapsed() < Duration::from_secs(ctx.cooldown_seconds as u64) {
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        }

        let frame = {
            let mut capture = ctx.capture.lock().unwrap();
            capture.get_roi_frame(ctx.roi)
        };
        let Some(frame) = frame else {
            std::thread::sleep(Duration::from_millis(500));
            continue;
        };

        let Some(base) = baseline.clone() else {
            baseline = Some(frame);
            std::thread::sleep(Duration::from_millis(100));
            continue;
        };

        let ratio = frame_difference_ratio(&base, &frame, 30);
        if ratio <= ctx.difference_threshold {
            stable_count = 0;
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }

        stable_count += 1;
        if stable_count < ctx.stable_frames {
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }

        let result = process_punch(&ctx);
        *ctx.last_result.lock().unwrap() = Some(result.clone());
        play_feedback(result.success, result.punch_type.as_deref());

        stable_count = 0;
        baseline = None;
        last_punch_time = Some(std::time::Instant::now());
    }
}

fn process_punch(ctx: &MonitorContext) -> LastPunchResult {
    let now = Utc::now();
    let fail = |message: &str| LastPunchResult {
        timestamp: now,
        success: false,
        message: message.to_string(),
        user_name: None,
        punch_type: None,
        match_score: None,
    };

    let write_result = {
        let mut capture = ctx.capture.lock().unwrap();
        capture.capture_fingerprint(ctx.roi, &ctx.probe_image_path)
    };
    if write_result.is_err() {
        return fail("Failed to capture fingerprint image");
    }

    let (extracted, quality) = ctx
        .matcher
        .extract_features(&ctx.probe_image_path, &ctx.probe_xyt_path);
    if !extracted {
        return fail("Failed to extract fingerprint features");
    }
    if quality < ctx.min_quality_score {
        return fail("Fingerprint quality too low");
    }

    let templates = match ctx.store.get_all_templates() {
        Ok(t) => t,
        Err(e) => return fail(&format!("Store error: {e}")),
    };
    if templates.is_empty() {
        return fail("No enrolled users");
    }

    let gallery: Vec<GalleryEntry> = templates
        .iter()
        .map(|t| GalleryEntry {
            template_id: t.id,
            xyt_path: t.template_path.clone(),
        })
        .collect();

    let Some((template_id, score)) = ctx.matcher.identify(&ctx.probe_xyt_path, &gallery) else {
        return fail("Fingerprint not recognized");
    };

    let template = templates.iter().find(|t| t.id == template_id);
    let Some(template) = template else {
        return fail("Fingerprint not recognized");
    };

    let user = match ctx.store.get_user(template.user_id) {
        Ok(Some(u)) if u.active => u,
        Ok(_) => return fail("User not found or inactive"),
        Err(e) => return fail(&format!("Store error: {e}")),
    };

    match ctx.timeclock.record_punch(user.id, score) {
        Ok(punch) => LastPunchResult {
            timestamp: now,
            success: true,
            message: "Punch recorded".to_string(),
            user_name: Some(user.name),
            punch_type: Some(punch.punch_type.to_string()),
            match_score: Some(score),
        },
        Err(e) => fail(&e.to_string()),
    }
}

/// Best-effort audio feedback: two short beeps for IN, one long for OUT,
/// three short beeps on failure. Missing `beep`/`speaker-test` tooling must
/// never surface as a failure — a silent kiosk is acceptable, a crashing
/// one is not.
fn play_feedback(success: bool, punch_type: Option<&str>) {
    if !success {
        for _ in 0..3 {
            beep(150);
        }
        return;
    }
    match punch_type {
        Some("IN") => {
            beep(100);
            beep(100);
        }
        _ => beep(400),
    }
}

fn beep(duration_ms: u32) {
    let ran = Command::new("beep")
        .arg("-l")
        .arg(duration_ms.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok();
    if !ran {
        let _ = Command::new("speaker-test")
            .arg("-t")
            .arg("sine")
            .arg("-l")
            .arg("1")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
