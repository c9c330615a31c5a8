// src/core/errors.rs

//! Defines the primary error type for the replication control plane.

use thiserror::Error;

/// The main error enum, representing all failures surfaced by the control plane.
/// Every variant carries owned data so errors stay `Clone`: transient failures
/// are recorded into per-relation state rather than bubbled to the DDL caller,
/// which means the same error value may be stored and propagated at once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Relation '{0}' already exists")]
    RelationAlreadyExists(String),

    #[error("Failed to connect to the remote cluster: {0}")]
    RemoteConnectFailed(String),

    #[error("Failed to request the publications state: {0}")]
    PublicationStateFailed(String),

    #[error("Restore submission rejected: {0}")]
    RestoreRejected(String),

    #[error("No remote cluster registered under '{0}'")]
    UnknownRemoteCluster(String),

    #[error("Subscription '{0}' does not exist")]
    SubscriptionMissing(String),

    #[error("Cannot drop a superuser")]
    DropSuperuser,

    #[error("Cannot alter privileges of a superuser")]
    AlterSuperuserPrivileges,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
