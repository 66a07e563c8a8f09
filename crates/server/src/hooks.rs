//! Post-finalize hooks.
//!
//! A hook runs on its own task after an upload is finalized. The client's
//! response never waits on it, and its failure is only logged: the upload
//! stays finalized either way.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chunkline_store::{Finalized, PersistedUpload};
use tracing::{info, warn};

use crate::ServerError;

/// A boxed future returned by hook methods.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ServerError>> + Send + 'a>>;

/// Receives every upload exactly once, right after it is finalized.
pub trait FinishHook: Send + Sync + 'static {
    fn on_upload_finished(&self, upload: PersistedUpload, location: PathBuf) -> HookFuture<'_>;
}

/// Logs the finished upload's name, size and type.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

impl FinishHook for LoggingHook {
    fn on_upload_finished(&self, upload: PersistedUpload, location: PathBuf) -> HookFuture<'_> {
        Box::pin(async move {
            info!(
                upload = %upload.id,
                filename = upload.filename().unwrap_or("unknown"),
                size = upload.offset,
                filetype = upload.filetype().unwrap_or("unknown"),
                path = %location.display(),
                "processing finished upload"
            );
            Ok(())
        })
    }
}

/// Runs `hook` for a newly finalized upload on a detached task.
pub(crate) fn spawn_finish_hook(hook: Arc<dyn FinishHook>, finalized: Finalized) {
    if !finalized.newly_finalized {
        return;
    }
    let id = finalized.upload.id.clone();
    tokio::spawn(async move {
        if let Err(e) = hook
            .on_upload_finished(finalized.upload, finalized.location)
            .await
        {
            warn!(upload = %id, error = %e, "finish hook failed");
        }
    });
}
