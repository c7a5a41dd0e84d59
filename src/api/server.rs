//! HTTP server lifecycle: bind → serve → graceful shutdown. Mirrors the
//! teacher's bind/spawn/shutdown-channel shape (`api::server::start_*`).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::api::router::build_router;
use crate::core_state::CoreState;

/// Handle to a running daemon HTTP server. Dropping this without calling
/// [`ServerHandle::shutdown`] leaves the server running until the process
/// exits — callers that want a clean stop must call it explicitly.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

pub async fn start(host: &str, port: u16, state: Arc<CoreState>) -> std::io::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "daemon HTTP server binding");

    let app = build_router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("daemon HTTP server received shutdown signal");
        };
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "daemon HTTP server error");
        }
        tracing::info!("daemon HTTP server stopped");
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        join: Some(join),
    })
}
