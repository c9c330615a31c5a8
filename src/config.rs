// src/config.rs

//! Configuration for the replication control plane.

use crate::core::errors::ReplicationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

/// Tunables of the replication subsystem. All durations accept humantime
/// strings in TOML (`"10s"`, `"500ms"`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Interval between publisher reconcile ticks of the metadata tracker.
    #[serde(with = "humantime_serde", default = "default_polling_interval")]
    pub polling_interval: Duration,
    /// Master-node timeout stamped on restore requests.
    #[serde(with = "humantime_serde", default = "default_restore_master_timeout")]
    pub restore_master_timeout: Duration,
    /// Timeout for the publisher connection handshake.
    #[serde(with = "humantime_serde", default = "default_remote_connect_timeout")]
    pub remote_connect_timeout: Duration,
}

fn default_polling_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_restore_master_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_remote_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            restore_master_timeout: default_restore_master_timeout(),
            remote_connect_timeout: default_remote_connect_timeout(),
        }
    }
}

impl ReplicationConfig {
    /// Loads and validates the configuration from a TOML file.
    pub async fn from_file(path: &str) -> Result<Self, ReplicationError> {
        let content = fs::read_to_string(path).await.map_err(|err| {
            ReplicationError::InvalidConfig(format!("failed to read '{path}': {err}"))
        })?;
        let config: ReplicationConfig = toml::from_str(&content)
            .map_err(|err| ReplicationError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReplicationError> {
        if self.polling_interval.is_zero() {
            return Err(ReplicationError::InvalidConfig(
                "polling_interval must be greater than zero".to_string(),
            ));
        }
        if self.restore_master_timeout.is_zero() {
            return Err(ReplicationError::InvalidConfig(
                "restore_master_timeout must be greater than zero".to_string(),
            ));
        }
        if self.remote_connect_timeout.is_zero() {
            return Err(ReplicationError::InvalidConfig(
                "remote_connect_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
