//! Room reaper - background sweep of long-empty rooms
//!
//! A coarse pass: rooms that have had no members for longer than the
//! retention window are deleted. Occupied rooms are never touched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

use crate::relay::Relay;

/// Background room sweeper
pub struct RoomReaper {
    relay: Arc<Relay>,
    interval: Duration,
}

impl RoomReaper {
    pub fn new(relay: Arc<Relay>) -> Self {
        let interval = relay.config().reap_interval();
        Self { relay, interval }
    }

    /// Run until `shutdown` flips to true (call from a tokio task)
    pub async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.interval);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep(),
                _ = shutdown.changed() => break,
            }
        }

        debug!("Room reaper stopped");
    }

    /// Run one sweep now
    pub fn sweep(&self) {
        let reaped = self.relay.reap_rooms(Instant::now());
        if reaped.is_empty() {
            debug!("Reaper: {} rooms retained", self.relay.room_count());
        } else {
            info!("Reaper removed {} empty rooms", reaped.len());
        }
    }
}
