//! Periodic removal of sessions whose sockets never closed cleanly.

use crate::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Spawn the sweeper. Every `every`, sessions idle for longer than `ttl`
/// are removed. The task ends when `stop`'s sender is dropped.
pub fn spawn(
    registry: Arc<SessionRegistry>,
    every: Duration,
    ttl: Duration,
    mut stop: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    registry.sweep_expired(std::time::Instant::now(), ttl);
                }
                _ = stop.changed() => break,
            }
        }
        tracing::debug!("session sweeper stopped");
    })
}
