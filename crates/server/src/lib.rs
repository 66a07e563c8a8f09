//! Resumable upload server.
//!
//! Exposes the tus 1.0.0 verbs (create, append, query-offset, terminate,
//! capabilities) over a [`chunkline_store::FileStore`], plus a listing,
//! a download endpoint for finished uploads, and a health check.

pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod routes;
pub mod server;
pub mod state;
pub mod sweeper;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use hooks::{FinishHook, HookFuture, LoggingHook};
pub use routes::create_router;
pub use server::UploadServer;
pub use state::AppState;

/// Errors produced while configuring or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] chunkline_store::StoreError),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("finish hook failed: {0}")]
    Hook(String),
}
