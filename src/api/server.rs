//! HTTP service assembly and lifecycle

use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers;
use crate::archive::{archive_request, ArchiveHandle, ArchiveWorker};
use crate::bus::EventBus;
use crate::collaborators::Collaborators;
use crate::config::ServiceConfig;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub collaborators: Collaborators,
    pub bus: Arc<dyn EventBus>,
    /// The process-wide archive worker
    pub archive: ArchiveHandle,
    pub started_at: Instant,
    /// Cancelled when the service stops; listener relays hang off child tokens
    pub shutdown: CancellationToken,
}

/// The HTTP boundary of a Pilosa process
pub struct WebService {
    config: Arc<ServiceConfig>,
    collaborators: Collaborators,
    bus: Arc<dyn EventBus>,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl WebService {
    pub fn new(
        config: ServiceConfig,
        collaborators: Collaborators,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
            bus,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Token that stops a running [`serve`](Self::serve) when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the archive worker for this process
    pub fn spawn_archive(&self) -> ArchiveHandle {
        ArchiveWorker::new(self.config.request_log_path.clone(), self.config.id.clone()).spawn()
    }

    /// Build the router around an already running archive worker
    pub fn router(&self, archive: &ArchiveHandle) -> Router {
        Self::build_router(AppState {
            config: self.config.clone(),
            collaborators: self.collaborators.clone(),
            bus: self.bus.clone(),
            archive: archive.clone(),
            started_at: self.started_at,
            shutdown: self.shutdown.clone(),
        })
    }

    fn build_router(state: AppState) -> Router {
        let mut set_bits = post(handlers::set_bits);
        if state.config.log_set_bit_request {
            info!(
                "Archiving set_bits requests under {}",
                state.config.request_log_path.display()
            );
            set_bits = set_bits.layer(middleware::from_fn_with_state(
                state.archive.sender(),
                archive_request,
            ));
        }

        Router::new()
            // Ingest and queries
            .route("/message", post(handlers::post_message))
            .route("/batch", post(handlers::batch))
            .route("/query", post(handlers::query))
            .route("/set_bits", set_bits)
            // Introspection
            .route("/stats", get(handlers::stats))
            .route("/status", get(handlers::status))
            .route("/info", get(handlers::info))
            .route("/processes", get(handlers::processes))
            .route("/ping", get(handlers::ping))
            // Live traffic
            .route("/listen", get(handlers::listen))
            .route("/listen/ws", get(handlers::listen_ws))
            .route("/listen/stream", get(handlers::listen_stream))
            // Misc
            .route("/test", get(handlers::test_messages))
            .route("/version", get(handlers::version))
            .route("/flush", any(handlers::flush))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the shutdown handle is cancelled, then stop the archive
    /// worker and wait for its final flush
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port_http));
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Like [`serve`](Self::serve), on a listener the caller already bound
    pub async fn serve_with_listener(self, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            "Pilosa [{}] listening on http://{}",
            self.config.id,
            listener.local_addr()?
        );

        let archive = self.spawn_archive();
        let router = self.router(&archive);

        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        // Listener relays may still be running if serving failed
        self.shutdown.cancel();

        match archive.shutdown().await {
            Ok(stats) => info!(
                "Archive worker stopped: {} records in {} files ({} failed flushes, {} dropped)",
                stats.records_archived,
                stats.files_written,
                stats.failed_flushes,
                stats.records_dropped
            ),
            Err(e) => error!("Archive worker did not stop cleanly: {}", e),
        }

        served?;
        info!("Pilosa [{}] stopped", self.config.id);
        Ok(())
    }
}
