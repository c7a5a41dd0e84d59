pub mod admin_auth;
pub mod api;
pub mod autopunch;
pub mod capture;
pub mod config;
pub mod core_state;
pub mod device_auth;
pub mod matcher;
pub mod store;
pub mod sync_worker;
pub mod timeclock;

/// Initializes the global `tracing` subscriber from `RUST_LOG`, defaulting
/// to `info` when unset. Called once by both binaries so the daemon and the
/// CLI log identically.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
