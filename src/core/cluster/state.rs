// src/core/cluster/state.rs

//! The subscriber-side view of the cluster state: a monotonically-versioned,
//! immutable snapshot delivered by the external consensus layer, carrying the
//! replication metadata customs and the in-progress-restores table.

use crate::core::replication::metadata::{PublicationsMetadata, SubscriptionsMetadata};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type NodeId = String;

static EMPTY_SUBSCRIPTIONS: Lazy<Arc<SubscriptionsMetadata>> =
    Lazy::new(|| Arc::new(SubscriptionsMetadata::default()));
static EMPTY_PUBLICATIONS: Lazy<Arc<PublicationsMetadata>> =
    Lazy::new(|| Arc::new(PublicationsMetadata::default()));

/// Shard progress of one running restore. The counts advance while the
/// restore runs; whatever the last snapshot carried before the entry's
/// removal are the final counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreProgress {
    pub total_shards: u32,
    pub failed_shards: u32,
}

/// The keyed table of restores currently executing, embedded in the cluster
/// state. An entry appears when the snapshot executor accepts a restore and
/// disappears when the restore finishes or a new master drops it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoresInProgress {
    pub entries: IndexMap<String, RestoreProgress>,
}

impl RestoresInProgress {
    pub fn get(&self, restore_id: &str) -> Option<&RestoreProgress> {
        self.entries.get(restore_id)
    }

    pub fn contains(&self, restore_id: &str) -> bool {
        self.entries.contains_key(restore_id)
    }
}

/// The typed custom blobs this subsystem reads out of the cluster-state
/// document. Absent blobs read as empty.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    pub subscriptions: Option<Arc<SubscriptionsMetadata>>,
    pub publications: Option<Arc<PublicationsMetadata>>,
    pub restores: Option<Arc<RestoresInProgress>>,
}

impl ClusterMetadata {
    pub fn subscriptions(&self) -> Arc<SubscriptionsMetadata> {
        self.subscriptions
            .clone()
            .unwrap_or_else(|| EMPTY_SUBSCRIPTIONS.clone())
    }

    pub fn publications(&self) -> Arc<PublicationsMetadata> {
        self.publications
            .clone()
            .unwrap_or_else(|| EMPTY_PUBLICATIONS.clone())
    }
}

/// One immutable cluster-state snapshot.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub version: u64,
    pub local_node_id: NodeId,
    pub master_node_id: Option<NodeId>,
    pub metadata: ClusterMetadata,
}

impl ClusterState {
    /// The zero-version state a node starts from before the consensus layer
    /// delivers its first snapshot.
    pub fn initial(local_node_id: impl Into<NodeId>) -> Self {
        Self {
            version: 0,
            local_node_id: local_node_id.into(),
            master_node_id: None,
            metadata: ClusterMetadata::default(),
        }
    }

    pub fn is_local_node_elected_master(&self) -> bool {
        self.master_node_id.as_deref() == Some(self.local_node_id.as_str())
    }

    pub fn restore_in_progress(&self, restore_id: &str) -> Option<RestoreProgress> {
        self.metadata
            .restores
            .as_ref()
            .and_then(|restores| restores.get(restore_id))
            .copied()
    }
}

/// A cluster-state change as observed by listeners: the previously applied
/// snapshot and the one just applied.
#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    pub previous: Arc<ClusterState>,
    pub current: Arc<ClusterState>,
}

impl ClusterChangedEvent {
    /// Whether the local node gained or lost mastership with this event.
    pub fn local_mastership_changed(&self) -> bool {
        self.previous.is_local_node_elected_master() != self.current.is_local_node_elected_master()
    }
}
