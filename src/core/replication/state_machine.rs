// src/core/replication/state_machine.rs

//! Per-relation state transitions, persisted through the cluster-wide
//! subscription-update RPC.
//!
//! Legal transitions: `INITIALIZING -> RESTORING -> SYNCHRONIZED`, with
//! `FAILED` reachable from each and terminal unless the subscription is
//! dropped and recreated. The machine never walks a relation backwards on its
//! own; updates are serialized through the master's metadata pipeline where
//! the last writer wins, and each caller observes its own acknowledgement.

use crate::core::errors::ReplicationError;
use crate::core::replication::metadata::{RelationName, RelationState, Subscription};
use crate::core::replication::store::SubscriptionStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Replaces the named subscription document on the elected master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub name: String,
    pub subscription: Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgedResponse {
    pub acknowledged: bool,
}

/// Submits subscription updates to the elected master's metadata pipeline.
#[async_trait]
pub trait SubscriptionUpdateClient: Send + Sync {
    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<AcknowledgedResponse, ReplicationError>;
}

pub struct SubscriptionStateMachine {
    store: Arc<SubscriptionStore>,
    update_client: Arc<dyn SubscriptionUpdateClient>,
}

impl SubscriptionStateMachine {
    pub fn new(
        store: Arc<SubscriptionStore>,
        update_client: Arc<dyn SubscriptionUpdateClient>,
    ) -> Self {
        Self {
            store,
            update_client,
        }
    }

    /// Scoped shape: merges `state` over the named relations only and submits
    /// the replacement document. Returns whether the master acknowledged.
    /// A subscription dropped in the meantime yields `Ok(false)` without RPC.
    pub async fn update(
        &self,
        name: &str,
        relations: &[RelationName],
        state: RelationState,
    ) -> Result<bool, ReplicationError> {
        let Some(subscription) = self.store.subscription(name) else {
            debug!("Skipping state update for dropped subscription '{}'", name);
            return Ok(false);
        };
        debug!(
            "Updating {} relation(s) of subscription '{}' to {}",
            relations.len(),
            name,
            state
        );
        let updated = subscription.with_relation_states(relations, &state);
        let response = self
            .update_client
            .update_subscription(UpdateSubscriptionRequest {
                name: name.to_string(),
                subscription: updated,
            })
            .await?;
        Ok(response.acknowledged)
    }

    /// Cluster-wide shape: applies `state` to every relation of the
    /// subscription.
    pub async fn update_all(
        &self,
        name: &str,
        state: RelationState,
    ) -> Result<bool, ReplicationError> {
        let Some(subscription) = self.store.subscription(name) else {
            debug!("Skipping state update for dropped subscription '{}'", name);
            return Ok(false);
        };
        let relations = subscription.relation_names();
        self.update(name, &relations, state).await
    }
}
