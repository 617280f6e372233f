//! Periodic purge of expired registrations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use gridreg_core::epoch_secs;
use gridreg_store::{PurgeStats, RegistryStore};

use crate::instance::Lifecycle;

/// One cleanup pass. A successful pass marks the instance as cleaned,
/// which is what lets it go online. Failures are logged and reported as
/// `None`; the next pass tries again.
pub(crate) fn cleanup_pass(store: &RegistryStore, lifecycle: &Lifecycle, now: u64) -> Option<PurgeStats> {
    match store.purge_expired_registrations(now) {
        Ok(stats) => {
            if stats.total() > 0 {
                info!(
                    vdb = %lifecycle.vdb,
                    producers = stats.producers,
                    consumers = stats.consumers,
                    "expired registrations removed"
                );
            }
            lifecycle.mark_cleaned();
            Some(stats)
        }
        Err(e) => {
            error!(vdb = %lifecycle.vdb, error = %e, "cleanup pass failed");
            None
        }
    }
}

pub(crate) async fn run_cleanup_loop(
    store: RegistryStore,
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(vdb = %lifecycle.vdb, interval_secs = interval.as_secs(), "cleanup loop starting");
    loop {
        cleanup_pass(&store, &lifecycle, epoch_secs());

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(vdb = %lifecycle.vdb, "cleanup loop shutting down");
                break;
            }
        }
    }
}
