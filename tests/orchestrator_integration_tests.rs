//! End-to-end coordination workflows through the orchestrator

mod common;

use serde_json::json;
use std::time::Duration;

use clustercore::core::{
    cluster::ElectionAlgorithm,
    coordination::{AcquireOutcome, ConsensusType, ProposalStatus},
    data::{ConsistencyLevel, ReplicaRole, ReplicationMode},
    discovery::{LoadBalanceStrategy, ServiceQuery},
    messaging::{EnqueueOutcome, NackOutcome},
    orchestrator::{NodeSpec, NODE_SERVICE_NAME},
};
use common::TestCluster;

#[tokio::test]
async fn test_bully_election_picks_highest_priority_and_fails_over() {
    let cluster = TestCluster::new().with_nodes(3).await;
    let orchestrator = &cluster.orchestrator;

    let outcome = orchestrator.elect_leader(ElectionAlgorithm::Bully).await;
    assert_eq!(outcome.leader.as_deref(), Some("n3"));
    assert_eq!(outcome.term, 1);

    // Everyone except the leader keeps heartbeating
    cluster.clock.advance(Duration::from_secs(16));
    for node in ["n0", "n1", "n2"] {
        orchestrator.heartbeat(node).await.unwrap();
    }

    let report = orchestrator.failover().await;
    assert!(!report.leader_healthy);
    let reelection = report.reelection.unwrap();
    assert_eq!(reelection.old_leader.as_deref(), Some("n3"));
    assert_eq!(reelection.new_leader.as_deref(), Some("n2"));
    assert_eq!(reelection.term, 2);
    assert!(report.split_brain.has_quorum);
}

#[tokio::test]
async fn test_maintenance_detects_silent_nodes() {
    let cluster = TestCluster::new().with_nodes(2).await;
    let orchestrator = &cluster.orchestrator;
    let mut events = cluster.bus.subscribe();

    cluster.clock.advance(Duration::from_secs(61));
    orchestrator.heartbeat("n2").await.unwrap();

    let report = orchestrator.run_maintenance().await;
    assert_eq!(report.failed_nodes, vec!["n1".to_string()]);

    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type(), "node_failed");

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.nodes, 3);
    assert_eq!(snapshot.active_nodes, 2);
}

#[tokio::test]
async fn test_lock_contention_and_deadlock_detection() {
    let cluster = TestCluster::new();
    let orchestrator = &cluster.orchestrator;

    assert!(orchestrator.acquire_lock("r1", "a", None, false).await.acquired());
    assert!(orchestrator.acquire_lock("r2", "b", None, false).await.acquired());

    let queued = orchestrator.acquire_lock("r2", "a", None, false).await;
    assert!(matches!(queued, AcquireOutcome::Queued { position: 1, .. }));
    orchestrator.acquire_lock("r1", "b", None, false).await;

    let report = orchestrator.detect_deadlock().await;
    assert!(report.deadlock_detected);
    assert_eq!(report.cycles, vec![vec!["a".to_string(), "b".to_string()]]);

    // Releasing r1 hands it to b and breaks the cycle
    let released = orchestrator.release_lock("r1", "a").await.unwrap();
    assert!(released.released());
    assert!(!orchestrator.detect_deadlock().await.deadlock_detected);
    let holder = orchestrator.locks().read().await.get_lock_info("r1").map(|l| l.owner.clone());
    assert_eq!(holder.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_expired_lock_is_promoted_during_maintenance() {
    let cluster = TestCluster::new();
    let orchestrator = &cluster.orchestrator;
    let mut events = cluster.bus.subscribe();

    orchestrator
        .acquire_lock("deploy", "a", Some(Duration::from_secs(5)), false)
        .await;
    orchestrator.acquire_lock("deploy", "b", None, false).await;
    cluster.clock.advance(Duration::from_secs(6));

    let report = orchestrator.run_maintenance().await;
    assert_eq!(report.expired_locks.len(), 1);
    assert_eq!(report.expired_locks[0].owner, "a");
    assert_eq!(events.recv().await.unwrap().event_type(), "lock_expired");
}

#[tokio::test]
async fn test_consensus_rejection_is_final() {
    let cluster = TestCluster::new().with_nodes(2).await;
    let orchestrator = &cluster.orchestrator;
    let mut events = cluster.bus.subscribe();

    orchestrator
        .propose("schema-v2", json!({"version": 2}), Some("n0".to_string()))
        .await
        .unwrap();
    orchestrator.vote("schema-v2", "n0", true).await.unwrap();
    orchestrator.vote("schema-v2", "n1", false).await.unwrap();
    orchestrator.vote("schema-v2", "n2", false).await.unwrap();

    let outcome = orchestrator
        .check_consensus("schema-v2", ConsensusType::Majority)
        .await
        .unwrap();
    assert!(outcome.reached);
    assert_eq!(outcome.decision, Some(ProposalStatus::Rejected));
    assert_eq!(events.recv().await.unwrap().event_type(), "consensus_reached");

    orchestrator.add_node(NodeSpec::new("n3")).await;
    let late = orchestrator.vote("schema-v2", "n3", true).await;
    assert!(late.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_keys_spread_across_nodes_and_rebalance_after_removal() {
    let cluster = TestCluster::new().with_nodes(3).await;
    let orchestrator = &cluster.orchestrator;

    let mut owners = std::collections::BTreeSet::new();
    for i in 0..200 {
        let assignment = orchestrator.assign_key(&format!("user:{}", i)).await.unwrap();
        owners.insert(assignment.node_id);
    }
    assert!(owners.len() > 1);

    orchestrator.remove_node("n1").await.unwrap();
    let report = orchestrator.partitions().write().await.rebalance().unwrap();
    assert_eq!(report.total_keys, 200);

    let partitions = orchestrator.partitions().read().await;
    for i in 0..200 {
        assert_ne!(partitions.lookup_key(&format!("user:{}", i)), Some("n1"));
    }
}

#[tokio::test]
async fn test_replication_consistency_levels() {
    let cluster = TestCluster::new().with_nodes(2).await;
    let orchestrator = &cluster.orchestrator;
    {
        let mut replication = orchestrator.replication().write().await;
        replication
            .add_replica("r0", "n0", ReplicationMode::Sync, ReplicaRole::Leader)
            .unwrap();
        replication
            .add_replica("r1", "n1", ReplicationMode::Async, ReplicaRole::Follower)
            .unwrap();
    }

    let outcome = orchestrator.replicate("config", json!("a"), None, None).await.unwrap();
    assert_eq!(outcome.version, 1);
    assert_eq!(outcome.synced, 2);
    assert_eq!(outcome.lagging, 1);

    assert!(!orchestrator.read("config", ConsistencyLevel::Strong).await.consistent);
    assert!(orchestrator.read("config", ConsistencyLevel::Eventual).await.consistent);

    orchestrator
        .replicate("config", json!("b"), None, Some(ReplicationMode::Sync))
        .await
        .unwrap();
    let read = orchestrator.read("config", ConsistencyLevel::Strong).await;
    assert!(read.consistent);
    assert_eq!(read.value, Some(json!("b")));
    assert_eq!(read.version, Some(2));

    // Removing the node drops its replica
    orchestrator.remove_node("n1").await.unwrap();
    assert_eq!(orchestrator.analytics().await.replication.replicas, 1);
}

#[tokio::test]
async fn test_members_are_discoverable_and_balanced() {
    let cluster = TestCluster::new().with_nodes(2).await;
    let orchestrator = &cluster.orchestrator;

    let members = orchestrator.discover(&ServiceQuery::by_name(NODE_SERVICE_NAME)).await;
    assert_eq!(members.len(), 3);

    let mut discovery = orchestrator.discovery().write().await;
    let first = discovery.load_balance(NODE_SERVICE_NAME, LoadBalanceStrategy::RoundRobin).unwrap();
    let second = discovery.load_balance(NODE_SERVICE_NAME, LoadBalanceStrategy::RoundRobin).unwrap();
    assert_ne!(first.service_id, second.service_id);
}

#[tokio::test]
async fn test_priority_delivery_dedup_and_dead_letters() {
    let cluster = TestCluster::new();
    let orchestrator = &cluster.orchestrator;

    orchestrator.send_message("jobs", json!("low"), Some(9), None).await;
    orchestrator.send_message("jobs", json!("urgent"), Some(1), Some("job-1".to_string())).await;
    orchestrator.send_message("jobs", json!("normal"), None, None).await;

    let first = orchestrator.receive_message("jobs").await.unwrap();
    assert_eq!(first.data, json!("urgent"));
    assert!(orchestrator.ack_message(&first.message_id).await);

    let duplicate = orchestrator
        .send_message("jobs", json!("urgent"), Some(1), Some("job-1".to_string()))
        .await;
    assert!(matches!(duplicate, EnqueueOutcome::Duplicate { .. }));

    let second = orchestrator.receive_message("jobs").await.unwrap();
    assert_eq!(second.data, json!("normal"));
    let nacked = orchestrator.nack_message(&second.message_id).await.unwrap();
    assert!(matches!(nacked, NackOutcome::Requeued { retry_count: 1, .. }));

    let stats = orchestrator.analytics().await.queues;
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.depth, 2);
}

#[tokio::test]
async fn test_unacked_messages_are_reclaimed() {
    let cluster = TestCluster::new();
    let orchestrator = &cluster.orchestrator;

    orchestrator.send_message("jobs", json!(1), None, None).await;
    let message = orchestrator.receive_message("jobs").await.unwrap();
    cluster.clock.advance(Duration::from_secs(31));

    let report = orchestrator.run_maintenance().await;
    assert_eq!(report.reclaimed_messages, vec![message.message_id.clone()]);
    let redelivered = orchestrator.receive_message("jobs").await.unwrap();
    assert_eq!(redelivered.message_id, message.message_id);
}

#[tokio::test]
async fn test_local_node_cannot_be_removed() {
    let cluster = TestCluster::new().with_nodes(2).await;
    let orchestrator = &cluster.orchestrator;
    orchestrator.elect_leader(ElectionAlgorithm::Bully).await;

    let err = orchestrator.remove_node("n0").await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.reason(), "local_node");

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.nodes, 3);
    assert_eq!(snapshot.leader.as_deref(), Some("n2"));
    let members = orchestrator.discover(&ServiceQuery::by_name(NODE_SERVICE_NAME)).await;
    assert_eq!(members.len(), 3);
}

#[tokio::test]
async fn test_replica_set_spans_distinct_nodes() {
    let cluster = TestCluster::new().with_nodes(3).await;
    let orchestrator = &cluster.orchestrator;

    let replicas = orchestrator.replica_nodes("session:9").await.unwrap();
    assert_eq!(replicas.len(), 3);
    let distinct: std::collections::BTreeSet<_> = replicas.iter().collect();
    assert_eq!(distinct.len(), 3);

    let owner = orchestrator.assign_key("session:9").await.unwrap();
    assert_eq!(replicas[0], owner.node_id);
}

#[tokio::test]
async fn test_standalone_cluster_does_not_fail_silent_nodes() {
    let config = clustercore::config::CoordinationConfig {
        distributed_enabled: false,
        ..common::test_config()
    };
    let cluster = TestCluster::with_config(config).with_nodes(2).await;

    cluster.clock.advance(Duration::from_secs(61));
    let report = cluster.orchestrator.run_maintenance().await;
    assert!(report.failed_nodes.is_empty());
    assert_eq!(cluster.orchestrator.snapshot().await.active_nodes, 3);
}
