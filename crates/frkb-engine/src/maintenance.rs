//! Periodic maintenance task.
//!
//! One cancellable loop replaces the raw-timer sweeps: stale sync locks,
//! aged in-memory session handles and expired session records are reclaimed
//! on a fixed cadence. Storage-side TTL reclamation is independent; this
//! task only keeps process-local state and the embedded backend tidy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::SyncEngine;

/// Runs the maintenance loop until the shutdown signal flips to true.
pub async fn run(engine: Arc<SyncEngine>, mut shutdown: watch::Receiver<bool>) {
    let interval_secs = engine.config().maintenance_interval_secs;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    // The first tick fires immediately; skip it so startup isn't a sweep.
    ticker.tick().await;

    info!(interval_secs, "maintenance task started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("maintenance tick");
                engine.sweep();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("maintenance task stopped");
}
