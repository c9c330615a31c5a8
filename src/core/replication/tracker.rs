// src/core/replication/tracker.rs

//! Master-only periodic reconciliation of subscriptions against their
//! publishers.
//!
//! Each tracked subscription gets its own cooperatively-scheduled loop on the
//! shared runtime. A tick polls the publisher's publications state, restores
//! relations published since the last look, and marks relations that left the
//! publication as failed; the data stays in place, dropping it is the
//! operator's call. Ticks for one subscription never overlap, and a tick in
//! flight completes even after its subscription is untracked.

use crate::core::cluster::applier::ClusterStateApplier;
use crate::core::remote::client::{PublicationsStateRequest, PublicationsStateResponse};
use crate::core::remote::registry::RemoteClusterRegistry;
use crate::core::replication::metadata::{RelationName, RelationState, Subscription};
use crate::core::replication::restore::RestoreCoordinator;
use crate::core::replication::state_machine::SubscriptionStateMachine;
use crate::core::replication::store::SubscriptionStore;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_FAILED_REASON: &str = "Failed to connect to the remote cluster";
const PUBLICATIONS_STATE_FAILED_REASON: &str = "Failed to request the publications state";
const RELATION_DROPPED_REASON: &str =
    "Relation was dropped from the publication on the publishing cluster";

/// Collaborators shared with the per-subscription loops.
struct TrackerShared {
    registry: Arc<RemoteClusterRegistry>,
    store: Arc<SubscriptionStore>,
    state_machine: Arc<SubscriptionStateMachine>,
    restore_coordinator: Arc<RestoreCoordinator>,
    applier: Arc<ClusterStateApplier>,
    polling_interval: Duration,
}

#[derive(Default)]
struct TrackerInner {
    started: bool,
    subscriptions: HashMap<String, CancellationToken>,
}

pub struct MetadataTracker {
    shared: Arc<TrackerShared>,
    inner: Mutex<TrackerInner>,
}

impl MetadataTracker {
    pub fn new(
        registry: Arc<RemoteClusterRegistry>,
        store: Arc<SubscriptionStore>,
        state_machine: Arc<SubscriptionStateMachine>,
        restore_coordinator: Arc<RestoreCoordinator>,
        applier: Arc<ClusterStateApplier>,
        polling_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                registry,
                store,
                state_machine,
                restore_coordinator,
                applier,
                polling_interval,
            }),
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// Arms the tracker when this node is the elected master. Idempotent;
    /// per-subscription loops start lazily on the next `start_tracking`.
    pub fn maybe_start(&self) {
        if !self
            .shared
            .applier
            .current_state()
            .is_local_node_elected_master()
        {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.started {
            return;
        }
        inner.started = true;
        info!("Metadata tracking armed on the elected master.");
    }

    /// Registers interest in `name` and schedules its reconcile loop. A no-op
    /// while the tracker is not armed or the subscription is already tracked.
    pub fn start_tracking(&self, name: &str) {
        let mut inner = self.inner.lock();
        if !inner.started {
            debug!(
                "Not tracking subscription '{}': tracker inactive on this node",
                name
            );
            return;
        }
        if inner.subscriptions.contains_key(name) {
            return;
        }
        let cancellation = CancellationToken::new();
        inner
            .subscriptions
            .insert(name.to_string(), cancellation.clone());
        let shared = self.shared.clone();
        let subscription_name = name.to_string();
        tokio::spawn(async move {
            shared
                .run_subscription_loop(subscription_name, cancellation)
                .await;
        });
        info!("Started metadata tracking for subscription '{}'", name);
    }

    /// Unregisters interest in `name`. A tick in flight completes; only the
    /// scheduling of further ticks stops.
    pub fn stop_tracking(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(cancellation) = inner.subscriptions.remove(name) {
            cancellation.cancel();
            info!("Stopped metadata tracking for subscription '{}'", name);
        }
    }

    /// Stops all tracking. Idempotent; safe to call on a non-master.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.started && inner.subscriptions.is_empty() {
            return;
        }
        inner.started = false;
        for (name, cancellation) in inner.subscriptions.drain() {
            cancellation.cancel();
            debug!("Cancelled metadata tracking for subscription '{}'", name);
        }
        info!("Metadata tracker closed.");
    }
}

impl TrackerShared {
    async fn run_subscription_loop(self: Arc<Self>, name: String, cancellation: CancellationToken) {
        let mut ticks = time::interval(self.polling_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticks.tick() => {}
            }
            // Tracking is master-only: a node that lost the election keeps the
            // loop but skips the work until it is closed or re-elected.
            if !self.applier.current_state().is_local_node_elected_master() {
                continue;
            }
            self.reconcile(&name).await;
        }
        debug!("Metadata tracking loop for subscription '{}' exited", name);
    }

    /// One reconcile tick for a single subscription.
    async fn reconcile(&self, name: &str) {
        let Some(subscription) = self.store.subscription(name) else {
            debug!(
                "Subscription '{}' vanished from the metadata; skipping tick",
                name
            );
            return;
        };

        let client = match self
            .registry
            .connect(name, &subscription.connection_info)
            .await
        {
            Ok(client) => client,
            Err(error) => {
                warn!(
                    "Could not reach the publisher of subscription '{}': {}",
                    name, error
                );
                self.record_failure(name, CONNECT_FAILED_REASON).await;
                return;
            }
        };

        let user = subscription
            .connection_info
            .user()
            .unwrap_or(&subscription.owner)
            .to_string();
        let request = PublicationsStateRequest {
            publications: subscription.publications.clone(),
            user,
        };
        let response = match client.publications_state(request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    "Publications state request for subscription '{}' failed: {}",
                    name, error
                );
                self.record_failure(name, PUBLICATIONS_STATE_FAILED_REASON)
                    .await;
                return;
            }
        };

        self.reconcile_relations(name, &subscription, &response).await;
    }

    async fn record_failure(&self, name: &str, reason: &str) {
        if let Err(error) = self
            .state_machine
            .update_all(name, RelationState::failed(reason))
            .await
        {
            warn!(
                "Failed to record a tracking failure for subscription '{}': {}",
                name, error
            );
        }
    }

    async fn reconcile_relations(
        &self,
        name: &str,
        subscription: &Subscription,
        response: &PublicationsStateResponse,
    ) {
        let published: HashSet<RelationName> = response.relation_names().into_iter().collect();
        let newly_published: Vec<RelationName> = published
            .iter()
            .filter(|relation| !subscription.relations.contains_key(*relation))
            .cloned()
            .collect();
        let dropped: Vec<RelationName> = subscription
            .relations
            .keys()
            .filter(|relation| !published.contains(*relation))
            .cloned()
            .collect();

        if !newly_published.is_empty() {
            info!(
                "Discovered {} newly published relation(s) for subscription '{}'",
                newly_published.len(),
                name
            );
            self.restore_new_relations(name, subscription, &newly_published, response)
                .await;
        }

        if !dropped.is_empty() {
            warn!(
                "{} relation(s) of subscription '{}' were dropped from the publication",
                dropped.len(),
                name
            );
            if let Err(error) = self
                .state_machine
                .update(name, &dropped, RelationState::failed(RELATION_DROPPED_REASON))
                .await
            {
                warn!(
                    "Failed to mark dropped relations of subscription '{}': {}",
                    name, error
                );
            }
        }
    }

    async fn restore_new_relations(
        &self,
        name: &str,
        subscription: &Subscription,
        relations: &[RelationName],
        response: &PublicationsStateResponse,
    ) {
        let wanted: HashSet<&RelationName> = relations.iter().collect();
        let indices: Vec<String> = response
            .concrete_indices
            .iter()
            .filter(|index| {
                RelationName::from_index_name(index)
                    .is_some_and(|relation| wanted.contains(&relation))
            })
            .cloned()
            .collect();
        let templates: Vec<String> = response
            .concrete_templates
            .iter()
            .filter(|template| {
                RelationName::from_template_name(template)
                    .is_some_and(|relation| wanted.contains(&relation))
            })
            .cloned()
            .collect();

        if let Err(error) = self
            .state_machine
            .update(name, relations, RelationState::Initializing)
            .await
        {
            warn!(
                "Failed to record newly published relations for subscription '{}': {}",
                name, error
            );
            return;
        }

        match self
            .restore_coordinator
            .restore(
                name,
                subscription.settings.clone(),
                relations.to_vec(),
                indices,
                templates,
            )
            .await
        {
            // Awaiting the outcome keeps the tick in flight until the restore
            // finished, which serializes restores per subscription.
            Ok(outcome) => match outcome.await {
                Ok(Ok(true)) => {
                    info!(
                        "Newly published relations of subscription '{}' are synchronized",
                        name
                    );
                }
                Ok(Ok(false)) => {
                    warn!(
                        "Restore of newly published relations for subscription '{}' finished with failures",
                        name
                    );
                }
                Ok(Err(error)) => {
                    warn!(
                        "Restore of newly published relations for subscription '{}' failed: {}",
                        name, error
                    );
                }
                Err(_) => {
                    warn!("Restore outcome for subscription '{}' was dropped", name);
                }
            },
            Err(error) => {
                warn!(
                    "Restore submission for subscription '{}' was refused: {}",
                    name, error
                );
            }
        }
    }
}
