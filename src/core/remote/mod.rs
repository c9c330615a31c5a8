// src/core/remote/mod.rs

//! Publisher-cluster connectivity: client traits, wire shapes, and the named
//! handle registry.

pub mod client;
pub mod registry;

pub use client::{
    PublicationsStateRequest, PublicationsStateResponse, PublishedRelation, RemoteClusterClient,
    RemoteClusterConnector,
};
pub use registry::RemoteClusterRegistry;
