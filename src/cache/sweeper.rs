//! Background sweeper
//!
//! Repeatedly snapshots the `Missing` keys and fetches them one at a time,
//! pausing a random interval after each fetch and between passes so the
//! remote site is never hit in bursts. Keys claimed by a request in the
//! meantime are skipped.

use crate::cache::coordinator::Inner;
use crate::cache::types::EntryStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A running sweeper task
pub(crate) struct Sweeper {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Sweeper {
    pub(crate) fn spawn(inner: Arc<Inner>) -> Self {
        let cancel = inner.shutdown.child_token();
        let task = tokio::spawn(run(inner, cancel.clone()));
        Self { cancel, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop and wait until it has exited
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Sweeper task ended abnormally: {}", e);
        }
    }
}

async fn run(inner: Arc<Inner>, cancel: CancellationToken) {
    info!("Sweeper started");

    'sweep: while !cancel.is_cancelled() {
        let pending = inner.table.list_by_status(EntryStatus::Missing);
        if !pending.is_empty() {
            info!("Descriptions pending download: {}", pending.len());
        }

        for key in pending {
            if cancel.is_cancelled() {
                break 'sweep;
            }
            if !inner.table.try_begin_fetch(&key) {
                debug!("Skipping {}, already claimed", key);
                continue;
            }

            match inner.fetch_as_owner(&key, &cancel).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break 'sweep,
                Err(e) => warn!("Sweeper could not fetch {}: {}", key, e),
            }

            if !pause(&cancel, inner.config.sweep_item_delay()).await {
                break 'sweep;
            }
        }

        if !pause(&cancel, inner.config.sweep_idle_delay()).await {
            break;
        }
    }

    info!("Sweeper stopped");
}

/// Sleep for `duration`; false if cancelled first
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    debug!("Sweeper sleeping for {:?}", duration);
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_runs_to_completion() {
        let cancel = CancellationToken::new();
        assert!(pause(&cancel, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_pause_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(!pause(&cancel, Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
