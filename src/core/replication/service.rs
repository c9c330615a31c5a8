// src/core/replication/service.rs

//! The supervisor of the logical replication subsystem.
//!
//! Composes the store, the remote-cluster registry, the restore coordinator,
//! the state machine, and the metadata tracker; reacts to cluster-state
//! events and master-election changes; and carries the DDL-facing entry
//! points. The supervisor is the single writer of the remote registries, and
//! the only component holding the mutable metadata projection.

use crate::config::ReplicationConfig;
use crate::core::cluster::applier::{ClusterStateApplier, ClusterStateListener};
use crate::core::cluster::state::ClusterChangedEvent;
use crate::core::connection::ConnectionInfo;
use crate::core::errors::ReplicationError;
use crate::core::remote::client::{PublicationsStateRequest, RemoteClusterConnector};
use crate::core::remote::registry::RemoteClusterRegistry;
use crate::core::replication::metadata::{RelationState, Subscription};
use crate::core::replication::restore::{
    remote_repository_name, verify_relations_do_not_exist, RestoreCoordinator, RestoreService,
    SchemaCatalog,
};
use crate::core::replication::state_machine::{SubscriptionStateMachine, SubscriptionUpdateClient};
use crate::core::replication::store::SubscriptionStore;
use crate::core::replication::tracker::MetadataTracker;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name of the built-in superuser. It owns the cluster, can neither be
/// dropped nor have its privileges altered, and is the fallback owner of
/// replicated relations.
pub const SUPERUSER_NAME: &str = "crate";

const CONNECT_FAILED_REASON: &str = "Failed to connect to the remote cluster";

/// DDL gate: dropping the superuser is rejected synchronously.
pub fn ensure_user_droppable(username: &str) -> Result<(), ReplicationError> {
    if username == SUPERUSER_NAME {
        return Err(ReplicationError::DropSuperuser);
    }
    Ok(())
}

/// DDL gate: the superuser's privileges are fixed.
pub fn ensure_privileges_alterable(username: &str) -> Result<(), ReplicationError> {
    if username == SUPERUSER_NAME {
        return Err(ReplicationError::AlterSuperuserPrivileges);
    }
    Ok(())
}

/// Registers the synthetic snapshot repositories that back subscriptions.
/// Owned by the embedding server; the supervisor is its single caller.
pub trait RepositoriesService: Send + Sync {
    fn register(&self, name: &str, info: &ConnectionInfo) -> Result<(), ReplicationError>;
    fn unregister(&self, name: &str);
}

pub struct LogicalReplicationService {
    store: Arc<SubscriptionStore>,
    registry: Arc<RemoteClusterRegistry>,
    state_machine: Arc<SubscriptionStateMachine>,
    restore_coordinator: Arc<RestoreCoordinator>,
    tracker: Arc<MetadataTracker>,
    catalog: Arc<dyn SchemaCatalog>,
    repositories: OnceCell<Arc<dyn RepositoriesService>>,
}

impl LogicalReplicationService {
    /// Wires up the subsystem and registers it as a cluster-state listener.
    pub fn new(
        config: &ReplicationConfig,
        applier: Arc<ClusterStateApplier>,
        connector: Arc<dyn RemoteClusterConnector>,
        restore_service: Arc<dyn RestoreService>,
        update_client: Arc<dyn SubscriptionUpdateClient>,
        catalog: Arc<dyn SchemaCatalog>,
    ) -> Arc<Self> {
        let store = Arc::new(SubscriptionStore::new());
        let registry = Arc::new(RemoteClusterRegistry::new(
            connector,
            config.remote_connect_timeout,
        ));
        let state_machine = Arc::new(SubscriptionStateMachine::new(
            store.clone(),
            update_client,
        ));
        let restore_coordinator = Arc::new(RestoreCoordinator::new(
            restore_service,
            state_machine.clone(),
            applier.clone(),
            config.restore_master_timeout,
        ));
        let tracker = Arc::new(MetadataTracker::new(
            registry.clone(),
            store.clone(),
            state_machine.clone(),
            restore_coordinator.clone(),
            applier.clone(),
            config.polling_interval,
        ));
        let service = Arc::new(Self {
            store,
            registry,
            state_machine,
            restore_coordinator,
            tracker,
            catalog,
            repositories: OnceCell::new(),
        });
        applier.register_listener(service.clone());
        service
    }

    /// Installs the repositories service. Must happen before the first
    /// subscription event reaches this service; installing twice keeps the
    /// first.
    pub fn set_repositories_service(&self, repositories: Arc<dyn RepositoriesService>) {
        if self.repositories.set(repositories).is_err() {
            warn!("Repositories service was already installed; keeping the existing one.");
        }
    }

    fn repositories(&self) -> Arc<dyn RepositoriesService> {
        self.repositories
            .get()
            .expect("repositories service must be installed before subscription events are processed")
            .clone()
    }

    /// The current metadata projection.
    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    /// The remote-cluster handle pool.
    pub fn registry(&self) -> &Arc<RemoteClusterRegistry> {
        &self.registry
    }

    /// Drives the subscriber half of `CREATE SUBSCRIPTION` once the
    /// subscription document is visible in the cluster state: fetches the
    /// publications state, verifies nothing collides locally, records every
    /// published relation as initializing, and submits the initial restore.
    ///
    /// Returns as soon as the restore is accepted; completion is driven in
    /// the background and recorded into the per-relation states.
    pub async fn initiate_replication(&self, name: &str) -> Result<(), ReplicationError> {
        let subscription = self
            .store
            .subscription(name)
            .ok_or_else(|| ReplicationError::SubscriptionMissing(name.to_string()))?;

        let client = self
            .registry
            .connect(name, &subscription.connection_info)
            .await?;
        let user = subscription
            .connection_info
            .user()
            .unwrap_or(&subscription.owner)
            .to_string();
        let response = client
            .publications_state(PublicationsStateRequest {
                publications: subscription.publications.clone(),
                user,
            })
            .await?;

        verify_relations_do_not_exist(self.catalog.as_ref(), &response)?;

        let relations = response.relation_names();
        self.state_machine
            .update(name, &relations, RelationState::Initializing)
            .await?;

        let outcome = self
            .restore_coordinator
            .restore(
                name,
                subscription.settings.clone(),
                relations,
                response.concrete_indices.clone(),
                response.concrete_templates.clone(),
            )
            .await?;

        let subscription_name = name.to_string();
        tokio::spawn(async move {
            match outcome.await {
                Ok(Ok(true)) => {
                    info!(
                        "Initial restore for subscription '{}' completed",
                        subscription_name
                    );
                }
                Ok(Ok(false)) => {
                    warn!(
                        "Initial restore for subscription '{}' finished with failures",
                        subscription_name
                    );
                }
                Ok(Err(err)) => {
                    error!(
                        "Initial restore for subscription '{}' failed: {}",
                        subscription_name, err
                    );
                }
                Err(_) => {
                    warn!(
                        "Initial restore outcome for subscription '{}' was dropped",
                        subscription_name
                    );
                }
            }
        });
        Ok(())
    }

    /// Shuts down tracking and drops all remote handles. Idempotent.
    pub async fn close(&self) {
        self.tracker.close();
        self.registry.close().await;
        info!("Logical replication service closed.");
    }

    async fn handle_subscription_added(
        name: String,
        subscription: Subscription,
        repositories: Arc<dyn RepositoriesService>,
        registry: Arc<RemoteClusterRegistry>,
        tracker: Arc<MetadataTracker>,
        state_machine: Arc<SubscriptionStateMachine>,
    ) {
        info!(
            "Subscription '{}' added; connecting to publisher {}",
            name, subscription.connection_info
        );
        if let Err(err) =
            repositories.register(&remote_repository_name(&name), &subscription.connection_info)
        {
            error!(
                "Failed to register the remote repository for subscription '{}': {}",
                name, err
            );
            return;
        }
        match registry.connect(&name, &subscription.connection_info).await {
            Ok(_) => tracker.start_tracking(&name),
            Err(err) => {
                warn!(
                    "Could not reach the publisher of subscription '{}': {}",
                    name, err
                );
                if let Err(update_err) = state_machine
                    .update_all(&name, RelationState::failed(CONNECT_FAILED_REASON))
                    .await
                {
                    warn!(
                        "Failed to record the connect failure for subscription '{}': {}",
                        name, update_err
                    );
                }
            }
        }
    }

    async fn handle_subscription_removed(
        name: String,
        repositories: Arc<dyn RepositoriesService>,
        registry: Arc<RemoteClusterRegistry>,
        tracker: Arc<MetadataTracker>,
    ) {
        info!(
            "Subscription '{}' removed; releasing the remote cluster handle",
            name
        );
        tracker.stop_tracking(&name);
        registry.remove(&name).await;
        repositories.unregister(&remote_repository_name(&name));
    }
}

impl ClusterStateListener for LogicalReplicationService {
    // Runs on the cluster-state applier task: everything slow is spawned.
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        if event.local_mastership_changed() {
            if event.current.is_local_node_elected_master() {
                self.tracker.maybe_start();
            } else {
                self.tracker.close();
            }
        }

        let diff = self.store.apply(event);
        if diff.is_empty() {
            return;
        }

        for name in diff.added {
            let Some(subscription) = self.store.subscription(&name) else {
                continue;
            };
            let repositories = self.repositories();
            let registry = self.registry.clone();
            let tracker = self.tracker.clone();
            let state_machine = self.state_machine.clone();
            tokio::spawn(Self::handle_subscription_added(
                name,
                subscription,
                repositories,
                registry,
                tracker,
                state_machine,
            ));
        }

        for name in diff.removed {
            let repositories = self.repositories();
            let registry = self.registry.clone();
            let tracker = self.tracker.clone();
            tokio::spawn(Self::handle_subscription_removed(
                name,
                repositories,
                registry,
                tracker,
            ));
        }
    }
}
