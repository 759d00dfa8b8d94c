use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::{client::SnapSchedClient, error::Result};

/// Drives [`SnapSchedClient::tick`] on a fixed cadence.
///
/// Each pass runs on the blocking pool so SQLite and filesystem calls never
/// stall the runtime that serves commands.
pub struct TickEngine {
    client: Arc<SnapSchedClient>,
    interval: Duration,
}

impl TickEngine {
    pub fn new(client: Arc<SnapSchedClient>, interval: Duration) -> Self {
        Self { client, interval }
    }

    /// Tick until `shutdown` broadcasts `true` (or its sender is dropped).
    ///
    /// Returns the error that stopped the loop if a pass hit a fatal one.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "tick engine started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let client = Arc::clone(&self.client);
                    match tokio::task::spawn_blocking(move || client.tick(Utc::now())).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) if e.is_fatal() => {
                            error!("tick engine stopping on fatal error: {e}");
                            return Err(e);
                        }
                        Ok(Err(e)) => error!("tick error: {e}"),
                        Err(e) => error!("tick task failed: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("tick engine shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
