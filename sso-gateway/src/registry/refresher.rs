use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::RegistryCache;

/// Spawn the periodic registry refresher.
///
/// The first refresh runs immediately. Cancelling `shutdown` stops the loop
/// between ticks or abandons an in-flight fetch; an abandoned fetch never
/// reaches the install step.
pub fn spawn_refresher(
    cache: Arc<RegistryCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Registry refresher started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Abandoning in-flight registry refresh");
                    break;
                }
                // Failures are logged and counted by the cache itself.
                _ = cache.refresh() => {}
            }
        }

        info!("Registry refresher stopped");
    })
}
