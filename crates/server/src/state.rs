//! Application state shared across handlers.

use std::sync::Arc;

use axum::http::{HeaderMap, header};
use chunkline_protocol::constants::{DOWNLOAD_PATH, UPLOADS_PATH};
use chunkline_store::FileStore;

use crate::config::ServerConfig;
use crate::hooks::FinishHook;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FileStore>,
    pub config: Arc<ServerConfig>,
    pub hook: Arc<dyn FinishHook>,
}

impl AppState {
    pub fn new(store: Arc<FileStore>, config: ServerConfig, hook: Arc<dyn FinishHook>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            hook,
        }
    }

    /// Absolute base URL for links, or an empty string for relative links.
    ///
    /// The configured public URL wins; otherwise the request's `Host` is used.
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.config.public_url {
            return url.trim_end_matches('/').to_string();
        }
        headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(|host| format!("http://{host}"))
            .unwrap_or_default()
    }

    /// URL clients use for PATCH/HEAD/DELETE on `id`.
    pub fn upload_url(&self, headers: &HeaderMap, id: &str) -> String {
        format!("{}{UPLOADS_PATH}/{id}", self.base_url(headers))
    }

    /// Retrieval path for a finalized upload, relative to the server root.
    pub fn download_path(id: &str) -> String {
        format!("{DOWNLOAD_PATH}/{id}")
    }

    pub fn download_url(&self, headers: &HeaderMap, id: &str) -> String {
        format!("{}{}", self.base_url(headers), Self::download_path(id))
    }
}
