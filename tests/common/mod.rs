// tests/common/mod.rs

//! Mock collaborators and fixtures shared by the test suite.

#![allow(dead_code)]

use async_trait::async_trait;
use crate_replication::core::cluster::applier::ClusterStateApplier;
use crate_replication::core::cluster::state::{
    ClusterChangedEvent, ClusterMetadata, ClusterState, RestoreProgress, RestoresInProgress,
};
use crate_replication::core::connection::ConnectionInfo;
use crate_replication::core::errors::ReplicationError;
use crate_replication::core::remote::client::{
    PublicationsStateRequest, PublicationsStateResponse, PublishedRelation, RemoteClusterClient,
    RemoteClusterConnector,
};
use crate_replication::core::replication::metadata::{
    RelationName, RelationState, Subscription, SubscriptionsMetadata,
};
use crate_replication::core::replication::restore::{
    RestoreCompletionResponse, RestoreInfo, RestoreRequest, RestoreService, SchemaCatalog,
};
use crate_replication::core::replication::service::RepositoriesService;
use crate_replication::core::replication::state_machine::{
    AcknowledgedResponse, SubscriptionUpdateClient, UpdateSubscriptionRequest,
};
use crate_replication::core::replication::store::SubscriptionStore;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub const LOCAL_NODE: &str = "node-1";
pub const OTHER_NODE: &str = "node-2";

/// Sets up minimal tracing for tests; ignores repeat initialization.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

// --- Fixtures ---

pub fn relation(name: &str) -> RelationName {
    RelationName::from_index_name(name).expect("valid relation name")
}

pub fn connection_info(url: &str) -> ConnectionInfo {
    url.parse().expect("valid connection string")
}

pub fn subscription(owner: &str, url: &str, publications: &[&str]) -> Subscription {
    Subscription {
        owner: owner.to_string(),
        connection_info: connection_info(url),
        publications: publications.iter().map(|p| p.to_string()).collect(),
        settings: IndexMap::new(),
        relations: IndexMap::new(),
    }
}

pub fn subscription_with_relations(
    owner: &str,
    url: &str,
    publications: &[&str],
    relations: &[(&str, RelationState)],
) -> Subscription {
    let mut sub = subscription(owner, url, publications);
    for (name, state) in relations {
        sub.relations.insert(relation(name), state.clone());
    }
    sub
}

pub fn published(names: &[&str]) -> PublicationsStateResponse {
    PublicationsStateResponse {
        concrete_indices: names.iter().map(|n| n.to_string()).collect(),
        concrete_templates: Vec::new(),
        relations: names
            .iter()
            .map(|n| PublishedRelation {
                name: relation(n),
                schema: format!("CREATE TABLE {n} (id INT)"),
            })
            .collect(),
    }
}

pub fn cluster_state(
    version: u64,
    local_is_master: bool,
    subscriptions: &[(&str, Subscription)],
) -> Arc<ClusterState> {
    cluster_state_with_restores(version, local_is_master, subscriptions, &[])
}

pub fn cluster_state_with_restores(
    version: u64,
    local_is_master: bool,
    subscriptions: &[(&str, Subscription)],
    restores: &[(&str, u32, u32)],
) -> Arc<ClusterState> {
    let mut metadata = ClusterMetadata::default();
    if !subscriptions.is_empty() {
        let mut subs = SubscriptionsMetadata::default();
        for (name, sub) in subscriptions {
            subs.subscriptions.insert(name.to_string(), sub.clone());
        }
        metadata.subscriptions = Some(Arc::new(subs));
    }
    if !restores.is_empty() {
        let mut in_progress = RestoresInProgress::default();
        for (id, total_shards, failed_shards) in restores {
            in_progress.entries.insert(
                id.to_string(),
                RestoreProgress {
                    total_shards: *total_shards,
                    failed_shards: *failed_shards,
                },
            );
        }
        metadata.restores = Some(Arc::new(in_progress));
    }
    Arc::new(ClusterState {
        version,
        local_node_id: LOCAL_NODE.to_string(),
        master_node_id: Some(if local_is_master { LOCAL_NODE } else { OTHER_NODE }.to_string()),
        metadata,
    })
}

pub fn changed(previous: Arc<ClusterState>, current: Arc<ClusterState>) -> ClusterChangedEvent {
    ClusterChangedEvent { previous, current }
}

/// A store already projecting the given subscriptions.
pub fn store_with(subscriptions: &[(&str, Subscription)]) -> Arc<SubscriptionStore> {
    let store = Arc::new(SubscriptionStore::new());
    let initial = Arc::new(ClusterState::initial(LOCAL_NODE));
    store.apply(&changed(initial, cluster_state(1, true, subscriptions)));
    store
}

/// An applier already holding the given state.
pub fn applier_with(state: Arc<ClusterState>) -> Arc<ClusterStateApplier> {
    let applier = ClusterStateApplier::new(Arc::new(ClusterState::initial(LOCAL_NODE)));
    applier.apply(state);
    applier
}

// --- Mock collaborators ---

#[derive(Debug)]
pub struct MockRemoteClient {
    pub requests: Mutex<Vec<PublicationsStateRequest>>,
    pub response: Mutex<Result<PublicationsStateResponse, ReplicationError>>,
    pub closed: AtomicBool,
}

impl MockRemoteClient {
    pub fn new(response: PublicationsStateResponse) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            response: Mutex::new(Ok(response)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn failing(error: ReplicationError) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            response: Mutex::new(Err(error)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteClusterClient for MockRemoteClient {
    async fn publications_state(
        &self,
        request: PublicationsStateRequest,
    ) -> Result<PublicationsStateResponse, ReplicationError> {
        self.requests.lock().unwrap().push(request);
        self.response.lock().unwrap().clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockConnector {
    pub client: Arc<MockRemoteClient>,
    pub connects: AtomicUsize,
    pub fail_with: Mutex<Option<ReplicationError>>,
}

impl MockConnector {
    pub fn new(client: Arc<MockRemoteClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            connects: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
        })
    }

    pub fn failing(client: Arc<MockRemoteClient>, error: ReplicationError) -> Arc<Self> {
        let connector = Self::new(client);
        *connector.fail_with.lock().unwrap() = Some(error);
        connector
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClusterConnector for MockConnector {
    async fn connect(
        &self,
        _info: &ConnectionInfo,
    ) -> Result<Arc<dyn RemoteClusterClient>, ReplicationError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.client.clone())
    }
}

pub struct MockUpdateClient {
    pub requests: Mutex<Vec<UpdateSubscriptionRequest>>,
    pub acknowledged: AtomicBool,
    pub fail_with: Mutex<Option<ReplicationError>>,
}

impl MockUpdateClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            acknowledged: AtomicBool::new(true),
            fail_with: Mutex::new(None),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The sequence of states the given relation was moved through, in
    /// submission order.
    pub fn recorded_states(&self, relation: &RelationName) -> Vec<RelationState> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|request| request.subscription.relations.get(relation).cloned())
            .collect()
    }
}

#[async_trait]
impl SubscriptionUpdateClient for MockUpdateClient {
    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<AcknowledgedResponse, ReplicationError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        self.requests.lock().unwrap().push(request);
        Ok(AcknowledgedResponse {
            acknowledged: self.acknowledged.load(Ordering::SeqCst),
        })
    }
}

pub enum RestoreBehavior {
    /// Refuse every submission.
    Reject(ReplicationError),
    /// Resolve the completion channel immediately.
    CompleteWith(RestoreCompletionResponse),
    /// Hold the completion sender for the test to resolve.
    Pending,
}

pub struct MockRestoreService {
    pub behavior: Mutex<RestoreBehavior>,
    pub submissions: Mutex<Vec<RestoreRequest>>,
    pub pending: Mutex<Vec<oneshot::Sender<RestoreCompletionResponse>>>,
}

impl MockRestoreService {
    pub fn completing_with(restore_info: Option<RestoreInfo>) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(RestoreBehavior::CompleteWith(RestoreCompletionResponse {
                restore_info,
            })),
            submissions: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting(error: ReplicationError) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(RestoreBehavior::Reject(error)),
            submissions: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn pending() -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(RestoreBehavior::Pending),
            submissions: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn submitted_id(&self, index: usize) -> String {
        self.submissions.lock().unwrap()[index].id.clone()
    }

    /// Resolves the oldest held completion channel.
    pub fn resolve_pending(&self, response: RestoreCompletionResponse) {
        let sender = self.pending.lock().unwrap().remove(0);
        let _ = sender.send(response);
    }
}

#[async_trait]
impl RestoreService for MockRestoreService {
    async fn submit(
        &self,
        request: RestoreRequest,
    ) -> Result<oneshot::Receiver<RestoreCompletionResponse>, ReplicationError> {
        let behavior = self.behavior.lock().unwrap();
        match &*behavior {
            RestoreBehavior::Reject(error) => Err(error.clone()),
            RestoreBehavior::CompleteWith(response) => {
                self.submissions.lock().unwrap().push(request);
                let (sender, receiver) = oneshot::channel();
                let _ = sender.send(response.clone());
                Ok(receiver)
            }
            RestoreBehavior::Pending => {
                self.submissions.lock().unwrap().push(request);
                let (sender, receiver) = oneshot::channel();
                self.pending.lock().unwrap().push(sender);
                Ok(receiver)
            }
        }
    }
}

#[derive(Default)]
pub struct MockCatalog {
    pub indices: HashSet<String>,
    pub templates: HashSet<String>,
}

impl MockCatalog {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_index(index: &str) -> Arc<Self> {
        let mut catalog = Self::default();
        catalog.indices.insert(index.to_string());
        Arc::new(catalog)
    }

    pub fn with_template(template: &str) -> Arc<Self> {
        let mut catalog = Self::default();
        catalog.templates.insert(template.to_string());
        Arc::new(catalog)
    }
}

impl SchemaCatalog for MockCatalog {
    fn index_exists(&self, index: &str) -> bool {
        self.indices.contains(index)
    }

    fn template_exists(&self, template: &str) -> bool {
        self.templates.contains(template)
    }
}

#[derive(Default)]
pub struct MockRepositories {
    pub registered: Mutex<Vec<String>>,
    pub unregistered: Mutex<Vec<String>>,
}

impl MockRepositories {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl RepositoriesService for MockRepositories {
    fn register(&self, name: &str, _info: &ConnectionInfo) -> Result<(), ReplicationError> {
        self.registered.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn unregister(&self, name: &str) {
        self.unregistered.lock().unwrap().push(name.to_string());
    }
}
