// src/core/cluster/mod.rs

//! Cluster-state plumbing: the snapshot model delivered by the external
//! consensus layer and the single-threaded applier that fans it out.

pub mod applier;
pub mod state;

pub use applier::{ClusterStateApplier, ClusterStateListener};
pub use state::{ClusterChangedEvent, ClusterState};
