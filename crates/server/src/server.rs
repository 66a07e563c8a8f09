//! Upload server lifecycle.
//!
//! Binds the listener, runs the router and the expiry sweeper, and shuts
//! both down when its cancellation token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use chunkline_store::FileStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::config::ServerConfig;
use crate::hooks::FinishHook;
use crate::routes::create_router;
use crate::state::AppState;
use crate::sweeper::spawn_sweeper;

pub struct UploadServer {
    state: AppState,
    listener: TcpListener,
    cancel: CancellationToken,
}

impl UploadServer {
    /// Opens the store and binds the configured address.
    pub async fn bind(config: ServerConfig, hook: Arc<dyn FinishHook>) -> Result<Self, ServerError> {
        let store = Arc::new(FileStore::open(&config.data_dir).await?);
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            state: AppState::new(store, config, hook),
            listener,
            cancel: CancellationToken::new(),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Serves requests until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        let local_addr = self.listener.local_addr()?;
        tracing::info!(
            %local_addr,
            dir = %self.state.store.dir().display(),
            "upload server listening"
        );

        let sweeper = spawn_sweeper(
            Arc::clone(&self.state.store),
            self.state.config.retention(),
            self.state.config.sweep_interval(),
            self.cancel.clone(),
        );

        let cancel = self.cancel.clone();
        let router = create_router(self.state);
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;

        // The sweeper must not outlive the server.
        self.cancel.cancel();
        if let Err(e) = sweeper.await {
            tracing::warn!("sweeper task failed: {e}");
        }
        tracing::info!("server shutting down");
        result.map_err(ServerError::from)
    }
}
