use std::sync::Arc;

use snapsched_core::config::SnapSchedConfig;
use snapsched_scheduler::{MountedFilesystems, Readiness, SchedulerError, SnapSchedClient};
use tracing::{error, info};

/// Central shared state, passed as `Arc<AppState>` to the dispatcher and serve loop.
pub struct AppState {
    pub config: SnapSchedConfig,
    pub client: Arc<SnapSchedClient>,
    /// Opens once the stores are recovered; the dispatcher waits on it.
    pub readiness: Readiness,
}

impl AppState {
    pub fn new(config: SnapSchedConfig, client: Arc<SnapSchedClient>) -> Self {
        Self {
            config,
            client,
            readiness: Readiness::new(),
        }
    }

    /// Build the client over the configured mounts. Does not open any store yet.
    pub fn from_config(config: SnapSchedConfig) -> Result<Self, SchedulerError> {
        let filesystems = Arc::new(MountedFilesystems::from_config(&config));
        let client = SnapSchedClient::from_config(&config.scheduler, filesystems)?;
        info!(
            data_dir = %config.scheduler.data_dir,
            filesystems = config.filesystems.len(),
            "snapshot scheduler configured"
        );
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Recover every on-disk store, then open the readiness gate.
    ///
    /// On failure the gate is opened in the failed state so queued commands
    /// get an error instead of waiting forever.
    pub async fn recover(&self) -> Result<usize, SchedulerError> {
        let client = Arc::clone(&self.client);
        let recovered = tokio::task::spawn_blocking(move || client.recover())
            .await
            .unwrap_or_else(|e| {
                Err(SchedulerError::Connection {
                    component: "store",
                    reason: format!("recovery task failed: {e}"),
                })
            });
        match recovered {
            Ok(active) => {
                self.readiness.set_ready();
                Ok(active)
            }
            Err(e) => {
                error!("store recovery failed: {e}");
                self.readiness.set_failed(e.to_string());
                Err(e)
            }
        }
    }
}
