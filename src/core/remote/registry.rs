// src/core/remote/registry.rs

//! A named pool of publisher-cluster handles, one per subscription.

use crate::core::connection::ConnectionInfo;
use crate::core::errors::ReplicationError;
use crate::core::remote::client::{RemoteClusterClient, RemoteClusterConnector};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
struct RemoteEntry {
    info: ConnectionInfo,
    client: Arc<dyn RemoteClusterClient>,
}

/// Maintains named, pooled handles to publisher clusters. The supervisor is
/// the single writer; connect failures surface to the caller unretried.
pub struct RemoteClusterRegistry {
    connector: Arc<dyn RemoteClusterConnector>,
    connect_timeout: Duration,
    clients: DashMap<String, RemoteEntry>,
}

impl RemoteClusterRegistry {
    pub fn new(connector: Arc<dyn RemoteClusterConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            clients: DashMap::new(),
        }
    }

    /// Idempotent connect: a handle already opened with equivalent connection
    /// info is reused, otherwise a new one is opened and swapped in.
    pub async fn connect(
        &self,
        name: &str,
        info: &ConnectionInfo,
    ) -> Result<Arc<dyn RemoteClusterClient>, ReplicationError> {
        if let Some(entry) = self.clients.get(name) {
            if entry.info == *info {
                return Ok(entry.client.clone());
            }
        }

        // The handshake happens outside any map entry so concurrent readers
        // are not held up by a slow publisher.
        let client = tokio::time::timeout(self.connect_timeout, self.connector.connect(info))
            .await
            .map_err(|_| {
                ReplicationError::RemoteConnectFailed(format!(
                    "handshake with {info} timed out after {:?}",
                    self.connect_timeout
                ))
            })??;

        let stale = self.clients.insert(
            name.to_string(),
            RemoteEntry {
                info: info.clone(),
                client: client.clone(),
            },
        );
        if let Some(stale) = stale {
            if !Arc::ptr_eq(&stale.client, &client) {
                stale.client.close().await;
            }
        }
        info!("Connected remote cluster '{}' at {}", name, info);
        Ok(client)
    }

    pub fn get_client(&self, name: &str) -> Result<Arc<dyn RemoteClusterClient>, ReplicationError> {
        self.clients
            .get(name)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| ReplicationError::UnknownRemoteCluster(name.to_string()))
    }

    /// Closes and forgets the named handle.
    pub async fn remove(&self, name: &str) {
        if let Some((_, entry)) = self.clients.remove(name) {
            entry.client.close().await;
            info!("Removed remote cluster '{}'", name);
        }
    }

    /// Closes every handle. Used on service shutdown.
    pub async fn close(&self) {
        let names: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            self.remove(&name).await;
        }
    }
}
