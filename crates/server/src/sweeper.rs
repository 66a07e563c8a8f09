//! Periodic removal of abandoned uploads.

use std::sync::Arc;
use std::time::Duration;

use chunkline_store::FileStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawns a task that expires unfinished uploads older than `retention`
/// every `every`, until `cancel` fires. The first sweep runs immediately.
pub fn spawn_sweeper(
    store: Arc<FileStore>,
    retention: Duration,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("expiry sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match store.expire(retention).await {
                        Ok(expired) if !expired.is_empty() => {
                            info!(count = expired.len(), "expired abandoned uploads");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "expiry sweep failed"),
                    }
                }
            }
        }
    })
}
