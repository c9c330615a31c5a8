// tests/integration/replication_flow_test.rs

//! Full subscription lifecycles: create, initial restore, publisher-driven
//! reconciliation, partial failure, and removal.

use std::sync::Arc;
use std::time::Duration;

use crate::common::{
    cluster_state, init_tracing, published, relation, subscription, MockCatalog, MockConnector,
    MockRemoteClient, MockRepositories, MockRestoreService, MockUpdateClient, LOCAL_NODE,
};
use crate_replication::config::ReplicationConfig;
use crate_replication::core::cluster::applier::ClusterStateApplier;
use crate_replication::core::cluster::state::ClusterState;
use crate_replication::core::replication::metadata::RelationState;
use crate_replication::core::replication::restore::{remote_repository_name, RestoreInfo};
use crate_replication::core::replication::service::LogicalReplicationService;
use tokio::time::sleep;

const SETTLE: Duration = Duration::from_millis(150);

struct Cluster {
    service: Arc<LogicalReplicationService>,
    applier: Arc<ClusterStateApplier>,
    update_client: Arc<MockUpdateClient>,
    restore_service: Arc<MockRestoreService>,
    repositories: Arc<MockRepositories>,
}

fn cluster(client: Arc<MockRemoteClient>, restore_service: Arc<MockRestoreService>) -> Cluster {
    init_tracing();
    let config = ReplicationConfig {
        polling_interval: Duration::from_millis(30),
        ..ReplicationConfig::default()
    };
    let applier = ClusterStateApplier::new(Arc::new(ClusterState::initial(LOCAL_NODE)));
    let update_client = MockUpdateClient::new();
    let service = LogicalReplicationService::new(
        &config,
        applier.clone(),
        MockConnector::new(client),
        restore_service.clone(),
        update_client.clone(),
        MockCatalog::empty(),
    );
    let repositories = MockRepositories::new();
    service.set_repositories_service(repositories.clone());
    Cluster {
        service,
        applier,
        update_client,
        restore_service,
        repositories,
    }
}

#[tokio::test]
async fn test_create_subscription_through_initial_restore() {
    let client = MockRemoteClient::new(published(&["doc.t1", "doc.t2"]));
    let cluster = cluster(
        client,
        MockRestoreService::completing_with(Some(RestoreInfo {
            total_shards: 8,
            failed_shards: 0,
        })),
    );

    // The subscription document lands in the cluster state; this node is not
    // the master, so only the repository handle and the connection appear.
    let sub = subscription("owner", "crate://publisher.example.com?user=repl", &["pub1"]);
    cluster
        .applier
        .apply(cluster_state(1, false, &[("s1", sub)]));
    sleep(SETTLE).await;
    assert_eq!(
        *cluster.repositories.registered.lock().unwrap(),
        [remote_repository_name("s1")]
    );

    // The DDL continuation submits the restore and returns immediately.
    cluster.service.initiate_replication("s1").await.unwrap();
    sleep(SETTLE).await;

    for name in ["doc.t1", "doc.t2"] {
        assert_eq!(
            cluster.update_client.recorded_states(&relation(name)),
            [
                RelationState::Initializing,
                RelationState::Restoring,
                RelationState::Synchronized
            ]
        );
    }

    cluster.service.close().await;
}

#[tokio::test]
async fn test_partial_restore_failure_is_visible_per_relation() {
    let client = MockRemoteClient::new(published(&["doc.t1"]));
    let cluster = cluster(
        client,
        MockRestoreService::completing_with(Some(RestoreInfo {
            total_shards: 10,
            failed_shards: 3,
        })),
    );

    let sub = subscription("owner", "crate://publisher.example.com", &["pub1"]);
    cluster
        .applier
        .apply(cluster_state(1, false, &[("s1", sub)]));
    sleep(SETTLE).await;

    // Submission itself succeeds; the shard failures surface in the relation
    // state, not at the DDL boundary.
    cluster.service.initiate_replication("s1").await.unwrap();
    sleep(SETTLE).await;

    let states = cluster.update_client.recorded_states(&relation("doc.t1"));
    assert_eq!(states[1], RelationState::Restoring);
    assert!(states[2].failure_reason().unwrap().contains("3/10"));

    cluster.service.close().await;
}

#[tokio::test]
async fn test_master_tracks_and_reconciles_new_relations() {
    let client = MockRemoteClient::new(published(&["doc.t1"]));
    let cluster = cluster(
        client.clone(),
        MockRestoreService::completing_with(Some(RestoreInfo {
            total_shards: 2,
            failed_shards: 0,
        })),
    );

    // This node is the elected master: the tracker starts with the add.
    let sub = subscription("owner", "crate://publisher.example.com", &["pub1"]);
    cluster
        .applier
        .apply(cluster_state(1, true, &[("s1", sub)]));
    sleep(SETTLE).await;

    // The tracker discovered doc.t1 (absent locally) and restored it.
    assert!(cluster.restore_service.submission_count() >= 1);
    let states = cluster.update_client.recorded_states(&relation("doc.t1"));
    assert_eq!(
        &states[..3],
        [
            RelationState::Initializing,
            RelationState::Restoring,
            RelationState::Synchronized
        ]
    );

    cluster.service.close().await;
}

#[tokio::test]
async fn test_drop_subscription_releases_everything() {
    let client = MockRemoteClient::new(published(&["doc.t1"]));
    let cluster = cluster(client.clone(), MockRestoreService::completing_with(None));

    let sub = subscription("owner", "crate://publisher.example.com", &["pub1"]);
    let v1 = cluster_state(1, false, &[("s1", sub)]);
    cluster.applier.apply(v1);
    sleep(SETTLE).await;
    assert!(cluster.service.registry().get_client("s1").is_ok());

    cluster.applier.apply(cluster_state(2, false, &[]));
    sleep(SETTLE).await;

    assert_eq!(
        *cluster.repositories.unregistered.lock().unwrap(),
        [remote_repository_name("s1")]
    );
    assert!(cluster.service.registry().get_client("s1").is_err());
    assert!(client.closed.load(std::sync::atomic::Ordering::SeqCst));
}
