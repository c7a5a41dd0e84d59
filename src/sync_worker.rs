use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub running: bool,
    pub server_url: String,
    pub unsynced_count: i64,
}

const BATCH_LIMIT: i64 = 100;

/// Periodic store-and-forward uploader. Runs as a tokio background task
/// (unlike AutoPunch, every step here suspends on network I/O, so async is
/// the right fit) and can also be driven by a manual trigger.
pub struct SyncWorker {
    store: Arc<Store>,
    client: reqwest::Client,
    server_url: String,
    api_key: String,
    enabled: bool,
    interval: Duration,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn new(store: Arc<Store>, server_url: String, api_key: String, enabled: bool, interval: Duration) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            server_url,
            api_key,
            enabled,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn status(&self) -> Result<SyncStatus, crate::store::StoreError> {
        Ok(SyncStatus {
            enabled: self.enabled,
            running: self.running.load(Ordering::SeqCst),
            server_url: self.server_url.clone(),
            unsynced_count: self.store.get_unsynced_punches(i64::MAX / 2)?.len() as i64,
        })
    }

    pub fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let store = self.store.clone();
        let client = self.client.clone();
        let server_url = self.server_url.clone();
        let api_key = self.api_key.clone();
        let enabled = self.enabled;
        let interval = self.interval;
        let running = self.running.clone();
        let wake = self.wake.clone();
        let stop = self.stop.clone();

        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wake.notified() => {}
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if enabled {
                    if let Err(e) = run_once(&store, &client, &server_url, &api_key).await {
                        tracing::warn!(error = %e, "sync tick failed");
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }));
    }

    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Triggers an immediate sync tick without waiting for the interval.
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        if !self.enabled {
            return Ok(());
        }
        run_once(&self.store, &self.client, &self.server_url, &self.api_key).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("request error: {0}")]
    Request(String),
}

async fn run_once(
    store: &Arc<Store>,
    client: &reqwest::Client,
    server_url: &str,
    api_key: &str,
) -> Result<(), SyncError> {
    let punches = store.get_unsynced_punches(BATCH_LIMIT)?;
    if punches.is_empty() {
        return Ok(());
    }

    let response = client
        .post(format!("{server_url}/punches"))
        .header("X-API-Key", api_key)
        .json(&punches)
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            let ids: Vec<i64> = punches.iter().map(|p| p.id).collect();
            store.mark_punches_synced(&ids)?;
            Ok(())
        }
        Ok(resp) => {
            let status = resp.status();
            if let Some(first) = punches.first() {
                store.mark_punch_sync_error(first.id, &format!("server returned {status}"))?;
            }
            Ok(())
        }
        Err(e) => {
            let short = e.to_string();
            if let Some(first) = punches.first() {
                store.mark_punch_sync_error(first.id, &short)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PunchType;
    use chrono::Utc;

    fn worker(enabled: bool) -> (Arc<Store>, SyncWorker) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let worker = SyncWorker::new(
            store.clone(),
            "http://127.0.0.1:1".to_string(),
            "test-key".to_string(),
            enabled,
            Duration::from_secs(300),
        );
        (store, worker)
    }

    #[tokio::test]
    async fn status_reports_unsynced_count() {
        let (store, worker) = worker(true);
        let user = store.create_user("Ada", "E001").unwrap();
        let now = Utc::now();
        store
            .record_punch(user.id, now, now.naive_utc(), PunchType::In, 95, "kiosk-1")
            .unwrap();
        let status = worker.status().unwrap();
        assert_eq!(status.unsynced_count, 1);
        assert!(status.enabled);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn sync_now_is_noop_when_disabled() {
        let (store, worker) = worker(false);
        let user = store.create_user("Ada", "E001").unwrap();
        let now = Utc::now();
        store
            .record_punch(user.id, now, now.naive_utc(), PunchType::In, 95, "kiosk-1")
            .unwrap();
        worker.sync_now().await.unwrap();
        // disabled worker never attempts the request, so the punch stays
        // unsynced with no sync_error recorded.
        let unsynced = store.get_unsynced_punches(10).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert!(unsynced[0].sync_error.is_none());
    }

    #[tokio::test]
    async fn sync_now_with_no_unsynced_punches_is_noop() {
        let (_store, worker) = worker(true);
        worker.sync_now().await.unwrap();
    }

    #[tokio::test]
    async fn failed_request_records_sync_error_and_leaves_row_unsynced() {
        let (store, worker) = worker(true);
        let user = store.create_user("Ada", "E001").unwrap();
        let now = Utc::now();
        store
            .record_punch(user.id, now, now.naive_utc(), PunchType::In, 95, "kiosk-1")
            .unwrap();
        // port 1 on loopback refuses the connection immediately.
        worker.sync_now().await.unwrap();
        let unsynced = store.get_unsynced_punches(10).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert!(unsynced[0].sync_error.is_some());
    }

    #[tokio::test]
    async fn start_and_stop_is_clean() {
        let (_store, mut worker) = worker(true);
        worker.start();
        assert!(worker.status().unwrap().running);
        worker.stop().await;
        assert!(!worker.status().unwrap().running);
    }
}
