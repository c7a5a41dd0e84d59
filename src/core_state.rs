use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;

use crate::admin_auth::AdminAuth;
use crate::autopunch::AutoPunch;
use crate::capture::Capture;
use crate::config::{Config, ConfigHandle};
use crate::device_auth::DeviceAuth;
use crate::matcher::Matcher;
use crate::store::Store;
use crate::sync_worker::SyncWorker;
use crate::timeclock::TimeClock;

/// Everything an HTTP handler or CLI command needs, bundled once at
/// startup. Mirrors the single shared-state-object pattern: one `Arc` is
/// cloned into every axum handler instead of threading a dozen parameters.
pub struct CoreState {
    pub store: Arc<Store>,
    pub matcher: Arc<Matcher>,
    pub capture: Arc<Mutex<Capture>>,
    pub timeclock: Arc<TimeClock>,
    pub autopunch: Arc<Mutex<AutoPunch>>,
    pub sync_worker: Arc<AsyncMutex<SyncWorker>>,
    pub admin_auth: Arc<AdminAuth>,
    pub device_auth: Arc<Mutex<DeviceAuth>>,
    pub config: Arc<RwLock<Config>>,
    pub config_handle: Arc<ConfigHandle>,
}
