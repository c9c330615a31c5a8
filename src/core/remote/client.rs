// src/core/remote/client.rs

//! Client-side traits and wire shapes for talking to a publisher cluster.
//!
//! The transport itself (sniff handshake, pg_tunnel framing) lives outside
//! this crate; the embedding server injects a connector and the control plane
//! only ever sees these traits.

use crate::core::connection::ConnectionInfo;
use crate::core::errors::ReplicationError;
use crate::core::replication::metadata::RelationName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request for the publisher-side state of a set of publications. The user is
/// the one the subscription connects as; the publisher evaluates publication
/// visibility against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationsStateRequest {
    pub publications: Vec<String>,
    pub user: String,
}

/// One relation exposed by the requested publications, along with a schema
/// descriptor sufficient to create it locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRelation {
    pub name: RelationName,
    pub schema: String,
}

/// The publisher's answer: the physical storage units to restore and the
/// logical relations they back. Partitioned tables appear as templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationsStateResponse {
    pub concrete_indices: Vec<String>,
    pub concrete_templates: Vec<String>,
    pub relations: Vec<PublishedRelation>,
}

impl PublicationsStateResponse {
    pub fn relation_names(&self) -> Vec<RelationName> {
        self.relations
            .iter()
            .map(|relation| relation.name.clone())
            .collect()
    }
}

/// A pooled handle to a publisher cluster.
#[async_trait]
pub trait RemoteClusterClient: Send + Sync + std::fmt::Debug {
    /// Fetches the publisher-side state of the given publications.
    async fn publications_state(
        &self,
        request: PublicationsStateRequest,
    ) -> Result<PublicationsStateResponse, ReplicationError>;

    /// Releases the underlying transport.
    async fn close(&self) {}
}

/// Opens publisher connections. The handshake is the suspension point;
/// failures surface to the caller, which owns the retry policy.
#[async_trait]
pub trait RemoteClusterConnector: Send + Sync {
    async fn connect(
        &self,
        info: &ConnectionInfo,
    ) -> Result<Arc<dyn RemoteClusterClient>, ReplicationError>;
}
