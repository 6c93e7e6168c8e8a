//! Leader-side lease expiry.
//!
//! One periodic task scans for expired leases and submits a remove command
//! per hit. Only the leader acts; followers see the same expirations once
//! they are elected. A demotion between the leadership check and the submit
//! just makes the submit fail with NotLeader, which is dropped silently.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::CommandBus;
use crate::command::Command;
use crate::error::Error;
use crate::metrics;
use crate::registry::Registry;

/// How often leases are checked.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the expiry loop. Runs until `cancel` fires.
pub fn spawn(
    registry: Registry,
    bus: Arc<dyn CommandBus>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_with_interval(registry, bus, cancel, TICK_INTERVAL)
}

/// [`spawn`] with a caller-chosen tick, for tests.
pub fn spawn_with_interval(
    registry: Registry,
    bus: Arc<dyn CommandBus>,
    cancel: CancellationToken,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if bus.is_leader() {
                        reap(&registry, bus.as_ref()).await;
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("lease controller shutting down");
                    return;
                }
            }
        }
    })
}

async fn reap(registry: &Registry, bus: &dyn CommandBus) {
    for id in registry.get_expired() {
        debug!(%id, "lease expired");
        metrics::record_expired_lease();
        match bus.submit(Command::RemoveService { id: id.clone() }).await {
            Ok(()) => {}
            // Demoted mid-scan; the new leader will expire the same ids.
            Err(Error::NotLeader { .. }) => return,
            // Already gone: another removal raced us.
            Err(Error::NotFound) => {}
            Err(e) => warn!(%id, error = %e, "failed to remove expired service"),
        }
    }
}
