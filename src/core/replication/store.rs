// src/core/replication/store.rs

//! Projects cluster-state updates into the current subscription and
//! publication maps and computes per-event subscription diffs.

use crate::core::cluster::state::ClusterChangedEvent;
use crate::core::replication::metadata::{PublicationsMetadata, Subscription, SubscriptionsMetadata};
use parking_lot::RwLock;
use std::sync::Arc;

/// The subscription-set difference carried by one cluster-state event. A name
/// appears in at most one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Holds the current projection of the replication metadata.
///
/// Updated from the single cluster-state applier task only; readers clone the
/// `Arc` snapshot and keep it for the duration of a read, so they never
/// observe a torn projection.
pub struct SubscriptionStore {
    subscriptions: RwLock<Arc<SubscriptionsMetadata>>,
    publications: RwLock<Arc<PublicationsMetadata>>,
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Arc::new(SubscriptionsMetadata::default())),
            publications: RwLock::new(Arc::new(PublicationsMetadata::default())),
        }
    }

    /// Projects one cluster-state event and returns the subscription diff.
    ///
    /// The cached projection is only replaced when the metadata reference
    /// changed AND the content is structurally different; snapshots republished
    /// unchanged keep the existing `Arc`.
    pub fn apply(&self, event: &ClusterChangedEvent) -> SubscriptionDiff {
        let previous_subscriptions = event.previous.metadata.subscriptions();
        let current_subscriptions = event.current.metadata.subscriptions();
        if !Arc::ptr_eq(&previous_subscriptions, &current_subscriptions)
            && *previous_subscriptions != *current_subscriptions
        {
            *self.subscriptions.write() = current_subscriptions.clone();
        }

        let previous_publications = event.previous.metadata.publications();
        let current_publications = event.current.metadata.publications();
        if !Arc::ptr_eq(&previous_publications, &current_publications)
            && *previous_publications != *current_publications
        {
            *self.publications.write() = current_publications.clone();
        }

        let added = current_subscriptions
            .names()
            .filter(|name| !previous_subscriptions.contains(name))
            .cloned()
            .collect();
        let removed = previous_subscriptions
            .names()
            .filter(|name| !current_subscriptions.contains(name))
            .cloned()
            .collect();
        SubscriptionDiff { added, removed }
    }

    /// The current subscriptions snapshot.
    pub fn subscriptions(&self) -> Arc<SubscriptionsMetadata> {
        self.subscriptions.read().clone()
    }

    /// The current publications snapshot.
    pub fn publications(&self) -> Arc<PublicationsMetadata> {
        self.publications.read().clone()
    }

    pub fn subscription(&self, name: &str) -> Option<Subscription> {
        self.subscriptions.read().get(name).cloned()
    }
}
