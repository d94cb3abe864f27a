//! Liveness monitor - periodic heartbeat and stale-connection reaper
//!
//! Every interval each endpoint is sent a WebSocket ping. An endpoint that
//! has not produced a pong (or any other frame) by the next interval is
//! disconnected through the same cleanup path as a normal close.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::relay::Relay;

/// Background heartbeat task
pub struct LivenessMonitor {
    relay: Arc<Relay>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(relay: Arc<Relay>) -> Self {
        let interval = relay.config().heartbeat_interval();
        Self { relay, interval }
    }

    /// Create with a custom interval
    pub fn with_interval(relay: Arc<Relay>, interval: Duration) -> Self {
        Self { relay, interval }
    }

    /// Run until `shutdown` flips to true (call from a tokio task)
    pub async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let dead = self.relay.sweep_liveness();
                    if dead.is_empty() {
                        debug!("Liveness sweep: {} endpoints alive", self.relay.endpoint_count());
                    } else {
                        info!("Liveness sweep disconnected {} endpoints", dead.len());
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Liveness monitor stopped");
    }
}
