// src/core/replication/metadata.rs

//! Value objects for the replicated metadata: subscriptions, publications,
//! and per-relation replication state.
//!
//! All of these are immutable snapshots embedded in the cluster-state blob.
//! They are replaced wholesale on change; equality is structural. The
//! surrounding cluster-state framework owns the serialized envelope.

use crate::core::connection::ConnectionInfo;
use indexmap::IndexMap;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use strum_macros::Display;

/// Schema used when an index name carries no schema prefix.
pub const DEFAULT_SCHEMA: &str = "doc";

/// Name prefix of physical indices and templates backing partitioned tables.
const PARTITIONED_PREFIX: &str = ".partitioned.";

/// A fully-qualified relation name (`schema.table`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationName {
    schema: String,
    table: String,
}

impl RelationName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The physical index name backing a non-partitioned relation.
    pub fn index_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// The index-template name backing a partitioned relation.
    pub fn template_name(&self) -> String {
        format!("{PARTITIONED_PREFIX}{}.{}.", self.schema, self.table)
    }

    /// Maps a concrete index name back to its logical relation. Partition
    /// indices (`.partitioned.<schema>.<table>.<ident>`) resolve to the
    /// partitioned table; a name without a schema prefix falls into the
    /// default schema.
    pub fn from_index_name(index: &str) -> Option<Self> {
        if let Some(rest) = index.strip_prefix(PARTITIONED_PREFIX) {
            let (schema, rest) = rest.split_once('.')?;
            let (table, _ident) = rest.split_once('.')?;
            return Some(Self::new(schema, table));
        }
        match index.split_once('.') {
            Some((schema, table)) => Some(Self::new(schema, table)),
            None => Some(Self::new(DEFAULT_SCHEMA, index)),
        }
    }

    /// Maps an index-template name back to its logical relation.
    pub fn from_template_name(template: &str) -> Option<Self> {
        let rest = template.strip_prefix(PARTITIONED_PREFIX)?;
        let (schema, rest) = rest.split_once('.')?;
        let table = rest.strip_suffix('.')?;
        if table.is_empty() {
            return None;
        }
        Some(Self::new(schema, table))
    }
}

impl fmt::Display for RelationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl fmt::Debug for RelationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelationName({self})")
    }
}

// Relation names key metadata maps, so they serialize as their display form
// rather than as a nested struct.
impl Serialize for RelationName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RelationName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RelationName::from_index_name(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid relation name '{raw}'")))
    }
}

/// Replication state of a single relation within a subscription.
///
/// The failure reason travels with the state: a relation is either making
/// progress or failed for a recorded reason, never failed with none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationState {
    Initializing,
    Restoring,
    Synchronized,
    Failed { reason: String },
}

impl RelationState {
    pub fn failed(reason: impl Into<String>) -> Self {
        RelationState::Failed {
            reason: reason.into(),
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            RelationState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// A named local entity declaring which publications to mirror from which
/// publisher cluster. Keyed by name inside [`SubscriptionsMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub owner: String,
    pub connection_info: ConnectionInfo,
    pub publications: Vec<String>,
    #[serde(default)]
    pub settings: IndexMap<String, String>,
    #[serde(default)]
    pub relations: IndexMap<RelationName, RelationState>,
}

impl Subscription {
    /// Returns a copy with `state` merged over the given relations; relations
    /// not yet present are added.
    pub fn with_relation_states(&self, relations: &[RelationName], state: &RelationState) -> Self {
        let mut updated = self.clone();
        for relation in relations {
            updated.relations.insert(relation.clone(), state.clone());
        }
        updated
    }

    pub fn relation_names(&self) -> Vec<RelationName> {
        self.relations.keys().cloned().collect()
    }
}

/// Publisher-side definition of a named set of relations exposed for
/// subscription. Authoritative on the publisher, cached on the subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub owner: String,
    pub for_all_tables: bool,
    pub relations: Vec<RelationName>,
}

/// The subscriber's map of all subscriptions, embedded in the cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsMetadata {
    pub subscriptions: IndexMap<String, Subscription>,
}

impl SubscriptionsMetadata {
    pub fn get(&self, name: &str) -> Option<&Subscription> {
        self.subscriptions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.subscriptions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.subscriptions.keys()
    }
}

/// The cached map of publisher-side publications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationsMetadata {
    pub publications: IndexMap<String, Publication>,
}

impl PublicationsMetadata {
    pub fn get(&self, name: &str) -> Option<&Publication> {
        self.publications.get(name)
    }
}
