//! Distributed orchestrator
//!
//! Owns every coordination component behind its own `Arc<RwLock<_>>` and runs the
//! workflows that span several of them: node membership fan-out, failover,
//! message delivery, analytics and periodic maintenance. Guards are taken one
//! component at a time, so no workflow holds two locks at once.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::CoordinationConfig;
use crate::core::cluster::cluster_monitor::{ClusterHealth, MetricsUpdate};
use crate::core::cluster::leader_election::{FailoverOutcome, LeaderHealth, SplitBrainReport};
use crate::core::cluster::{ClusterMonitor, ElectionAlgorithm, ElectionOutcome, LeaderElection, NodeId, NodeRole, Term};
use crate::core::coordination::consensus::{Proposal, ProposalStatus, DEFAULT_WEIGHT};
use crate::core::coordination::distributed_lock::ExpiredLock;
use crate::core::coordination::{
    AcquireOutcome, ConsensusManager, ConsensusOutcome, ConsensusType, DeadlockReport, DistributedLock,
    ReleaseOutcome, VoteReceipt,
};
use crate::core::data::{
    ConsistencyLevel, KeyAssignment, PartitionManager, ReadOutcome, ReplicateOutcome, ReplicationManager,
    ReplicationMode,
};
use crate::core::discovery::{ServiceDiscovery, ServiceQuery, ServiceRecord, ServiceRegistration};
use crate::core::infrastructure::{system_clock, uuid_generator, SharedClock, SharedIdGenerator};
use crate::core::messaging::{DistributedQueue, EnqueueOutcome, NackOutcome, QueueStats, QueuedMessage};
use crate::core::patterns::{CoordinationEvent, EventBus, EventKind, EventPublisher};
use crate::error::{CoordinationError, Result};

/// Name under which cluster members register with service discovery
pub const NODE_SERVICE_NAME: &str = "cluster-node";

fn node_service_id(node_id: &str) -> String {
    format!("node:{}", node_id)
}

/// External collaborators injected into the orchestrator
pub struct Collaborators {
    pub clock: SharedClock,
    pub ids: SharedIdGenerator,
    pub rng: StdRng,
    pub events: Arc<dyn EventPublisher>,
}

impl Collaborators {
    pub fn system() -> Self {
        Self {
            clock: system_clock(),
            ids: uuid_generator(),
            rng: StdRng::from_entropy(),
            events: Arc::new(EventBus::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: NodeId,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub priority: u32,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl NodeSpec {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            host: default_host(),
            port: 0,
            role: NodeRole::Worker,
            priority: 0,
        }
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    pub node_id: NodeId,
    pub total_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverReport {
    pub leader_healthy: bool,
    pub leader_health: LeaderHealth,
    pub failed_nodes: Vec<NodeId>,
    pub reelection: Option<FailoverOutcome>,
    pub split_brain: SplitBrainReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionStats {
    pub leader: Option<NodeId>,
    pub term: Term,
    pub elections: u64,
    pub members: usize,
    pub active_members: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    pub active_locks: usize,
    pub waiters: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusStats {
    pub voters: usize,
    pub proposals: usize,
    pub decisions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub nodes: usize,
    pub partitions: usize,
    pub keys: usize,
    pub rebalances: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStats {
    pub replicas: usize,
    pub keys: usize,
    pub conflicts: usize,
    pub leader: Option<String>,
    pub avg_lag_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub services: usize,
    pub healthy: usize,
}

/// Per-component counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub cluster: ClusterHealth,
    pub election: ElectionStats,
    pub locks: LockStats,
    pub consensus: ConsensusStats,
    pub partitions: PartitionStats,
    pub replication: ReplicationStats,
    pub discovery: DiscoveryStats,
    pub queues: QueueStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub node_id: NodeId,
    /// Seconds since the orchestrator started
    pub uptime: f64,
    pub nodes: usize,
    pub active_nodes: usize,
    pub leader: Option<NodeId>,
    pub term: Term,
    pub locks: usize,
    pub proposals: usize,
    pub queued_messages: usize,
    pub services: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_locks: Vec<ExpiredLock>,
    pub failed_nodes: Vec<NodeId>,
    pub leader_health: LeaderHealth,
    pub stale_services: Vec<String>,
    pub reclaimed_messages: Vec<String>,
    pub expired_proposals: Vec<String>,
    /// Steps that failed without aborting the tick
    pub errors: Vec<String>,
}

pub struct DistributedOrchestrator {
    config: CoordinationConfig,
    node_id: NodeId,
    clock: SharedClock,
    started_at: Instant,
    election: Arc<RwLock<LeaderElection>>,
    locks: Arc<RwLock<DistributedLock>>,
    consensus: Arc<RwLock<ConsensusManager>>,
    partitions: Arc<RwLock<PartitionManager>>,
    replication: Arc<RwLock<ReplicationManager>>,
    monitor: Arc<RwLock<ClusterMonitor>>,
    discovery: Arc<RwLock<ServiceDiscovery>>,
    queue: Arc<RwLock<DistributedQueue>>,
    events: Arc<dyn EventPublisher>,
}

impl DistributedOrchestrator {
    pub fn new(config: CoordinationConfig) -> Self {
        Self::with_collaborators(config, Collaborators::system())
    }

    /// Build every component and register the local node with each of them.
    pub fn with_collaborators(config: CoordinationConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            clock,
            ids,
            rng,
            events,
        } = collaborators;
        let node_id = config.node_id.clone();

        let mut election = LeaderElection::new(node_id.clone(), config.heartbeat_interval(), clock.clone());
        election.add_node(node_id.clone(), config.election.local_priority);

        let mut consensus = ConsensusManager::new();
        consensus.add_node(node_id.clone(), DEFAULT_WEIGHT);

        let mut partitions = PartitionManager::new(config.partitioning.virtual_nodes);
        partitions.add_node(node_id.clone());

        let mut monitor = ClusterMonitor::new(config.monitor.alert_threshold, clock.clone());
        monitor.register_node(
            node_id.clone(),
            config.server.host.clone(),
            config.server.port,
            NodeRole::Master,
        );

        let mut discovery = ServiceDiscovery::new(config.health_interval(), clock.clone(), rng);
        discovery.register(ServiceRegistration {
            service_id: node_service_id(&node_id),
            name: NODE_SERVICE_NAME.to_string(),
            host: config.server.host.clone(),
            port: config.server.port,
            tags: vec!["local".to_string()],
        });

        let locks = DistributedLock::new(config.default_lock_ttl(), clock.clone(), ids.clone());
        let replication = ReplicationManager::new(config.replication.async_lag_ms);
        let queue = DistributedQueue::new(config.queue.max_retries, clock.clone(), ids);

        info!(node_id = %node_id, cluster_size = config.cluster_size, "🚀 Distributed orchestrator initialized");

        Self {
            started_at: clock.now(),
            config,
            node_id,
            clock,
            election: Arc::new(RwLock::new(election)),
            locks: Arc::new(RwLock::new(locks)),
            consensus: Arc::new(RwLock::new(consensus)),
            partitions: Arc::new(RwLock::new(partitions)),
            replication: Arc::new(RwLock::new(replication)),
            monitor: Arc::new(RwLock::new(monitor)),
            discovery: Arc::new(RwLock::new(discovery)),
            queue: Arc::new(RwLock::new(queue)),
            events,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn election(&self) -> &Arc<RwLock<LeaderElection>> {
        &self.election
    }

    pub fn locks(&self) -> &Arc<RwLock<DistributedLock>> {
        &self.locks
    }

    pub fn consensus(&self) -> &Arc<RwLock<ConsensusManager>> {
        &self.consensus
    }

    pub fn partitions(&self) -> &Arc<RwLock<PartitionManager>> {
        &self.partitions
    }

    pub fn replication(&self) -> &Arc<RwLock<ReplicationManager>> {
        &self.replication
    }

    pub fn monitor(&self) -> &Arc<RwLock<ClusterMonitor>> {
        &self.monitor
    }

    pub fn discovery(&self) -> &Arc<RwLock<ServiceDiscovery>> {
        &self.discovery
    }

    pub fn queue(&self) -> &Arc<RwLock<DistributedQueue>> {
        &self.queue
    }

    async fn emit(&self, kind: EventKind) {
        let event = CoordinationEvent::new(self.node_id.clone(), kind);
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish coordination event");
        }
    }

    // ---- membership ----

    /// Register a node with election, consensus, monitoring, discovery and partitioning.
    pub async fn add_node(&self, spec: NodeSpec) -> MembershipChange {
        self.election.write().await.add_node(spec.node_id.clone(), spec.priority);
        self.consensus.write().await.add_node(spec.node_id.clone(), DEFAULT_WEIGHT);
        let total_nodes = {
            let mut monitor = self.monitor.write().await;
            monitor.register_node(spec.node_id.clone(), spec.host.clone(), spec.port, spec.role);
            monitor.node_count()
        };
        self.discovery.write().await.register(ServiceRegistration {
            service_id: node_service_id(&spec.node_id),
            name: NODE_SERVICE_NAME.to_string(),
            host: spec.host.clone(),
            port: spec.port,
            tags: vec![spec.role.to_string()],
        });
        self.partitions.write().await.add_node(spec.node_id.clone());

        info!(node_id = %spec.node_id, role = %spec.role, total_nodes = total_nodes, "✅ Node added to cluster");
        self.emit(EventKind::NodeJoined {
            node_id: spec.node_id.clone(),
            role: spec.role,
        })
        .await;

        MembershipChange {
            node_id: spec.node_id,
            total_nodes,
        }
    }

    /// Remove a node everywhere. Keys it owned stay assigned until the next rebalance.
    pub async fn remove_node(&self, node_id: &str) -> Result<MembershipChange> {
        if node_id == self.node_id {
            return Err(CoordinationError::LocalNode(node_id.to_string()));
        }

        let known = self.monitor.read().await.get_node(node_id).is_some()
            || self.election.read().await.member(node_id).is_some();
        if !known {
            return Err(CoordinationError::NodeNotFound(node_id.to_string()));
        }

        self.election.write().await.remove_node(node_id);
        self.consensus.write().await.remove_node(node_id);
        let total_nodes = {
            let mut monitor = self.monitor.write().await;
            monitor.remove_node(node_id);
            monitor.node_count()
        };
        self.discovery.write().await.deregister(&node_service_id(node_id));
        self.partitions.write().await.remove_node(node_id);
        self.replication.write().await.remove_node_replicas(node_id);
        self.locks.write().await.cancel_waits(node_id);

        info!(node_id = %node_id, total_nodes = total_nodes, "Node removed from cluster");
        self.emit(EventKind::NodeLeft {
            node_id: node_id.to_string(),
        })
        .await;

        Ok(MembershipChange {
            node_id: node_id.to_string(),
            total_nodes,
        })
    }

    pub async fn heartbeat(&self, node_id: &str) -> Result<()> {
        let in_election = self.election.write().await.heartbeat(node_id);
        let in_monitor = self.monitor.write().await.touch(node_id);
        if !in_election && !in_monitor {
            return Err(CoordinationError::NodeNotFound(node_id.to_string()));
        }
        Ok(())
    }

    pub async fn update_metrics(&self, node_id: &str, cpu: f64, memory: f64, disk: f64) -> Result<MetricsUpdate> {
        self.monitor.write().await.update_metrics(node_id, cpu, memory, disk)
    }

    // ---- election ----

    pub async fn elect_leader(&self, algorithm: ElectionAlgorithm) -> ElectionOutcome {
        let outcome = self.election.write().await.elect(algorithm);
        if let Some(leader) = &outcome.leader {
            self.emit(EventKind::LeaderElected {
                leader: leader.clone(),
                term: outcome.term,
            })
            .await;
        }
        outcome
    }

    /// Fold monitor-detected failures into the election, then re-elect if the leader is unhealthy.
    pub async fn failover(&self) -> FailoverReport {
        let failure_timeout = self.config.failure_timeout();
        let failed_nodes = self.monitor.write().await.detect_failures(failure_timeout).node_ids;

        let (leader_health, reelection, split_brain) = {
            let mut election = self.election.write().await;
            for node_id in &failed_nodes {
                election.mark_failed(node_id);
            }
            let health = election.check_leader_health();
            let reelection = (!health.healthy).then(|| election.failover());
            (health, reelection, election.detect_split_brain())
        };

        for node_id in &failed_nodes {
            self.emit(EventKind::NodeFailed {
                node_id: node_id.clone(),
            })
            .await;
        }
        if let Some(outcome) = &reelection {
            warn!(
                old_leader = ?outcome.old_leader,
                new_leader = ?outcome.new_leader,
                term = outcome.term,
                "🔄 Failover executed"
            );
            self.emit(EventKind::Failover {
                old_leader: outcome.old_leader.clone(),
                new_leader: outcome.new_leader.clone(),
                term: outcome.term,
            })
            .await;
        }

        FailoverReport {
            leader_healthy: leader_health.healthy,
            leader_health,
            failed_nodes,
            reelection,
            split_brain,
        }
    }

    // ---- locks ----

    /// Acquire with the configured default TTL when `ttl` is `None`.
    pub async fn acquire_lock(
        &self,
        resource: &str,
        owner: &str,
        ttl: Option<Duration>,
        reentrant: bool,
    ) -> AcquireOutcome {
        let mut locks = self.locks.write().await;
        let ttl = ttl.unwrap_or_else(|| locks.default_ttl());
        locks.acquire(resource, owner, ttl, reentrant)
    }

    pub async fn release_lock(&self, resource: &str, owner: &str) -> Result<ReleaseOutcome> {
        self.locks.write().await.release(resource, owner)
    }

    pub async fn detect_deadlock(&self) -> DeadlockReport {
        self.locks.read().await.detect_deadlock()
    }

    // ---- consensus ----

    pub async fn propose(
        &self,
        proposal_id: &str,
        value: serde_json::Value,
        proposer: Option<NodeId>,
    ) -> Result<Proposal> {
        self.consensus
            .write()
            .await
            .propose(proposal_id, value, proposer)
            .cloned()
    }

    pub async fn vote(&self, proposal_id: &str, node_id: &str, approve: bool) -> Result<VoteReceipt> {
        self.consensus.write().await.vote(proposal_id, node_id, approve)
    }

    pub async fn check_consensus(&self, proposal_id: &str, consensus_type: ConsensusType) -> Result<ConsensusOutcome> {
        let (outcome, newly_decided) = {
            let mut consensus = self.consensus.write().await;
            let before = consensus.decision_count();
            let outcome = consensus.check_consensus(proposal_id, consensus_type)?;
            (outcome, consensus.decision_count() > before)
        };

        if let (true, Some(decision)) = (newly_decided, outcome.decision) {
            self.emit(EventKind::ConsensusReached {
                proposal_id: proposal_id.to_string(),
                decision,
            })
            .await;
        }
        Ok(outcome)
    }

    // ---- data ----

    pub async fn assign_key(&self, key: &str) -> Result<KeyAssignment> {
        self.partitions.write().await.assign_key(key)
    }

    /// Nodes that should hold copies of `key`, owner first, sized by the replication factor.
    pub async fn replica_nodes(&self, key: &str) -> Result<Vec<NodeId>> {
        let factor = self.config.replication.replication_factor as usize;
        self.partitions.read().await.preference_list(key, factor)
    }

    pub async fn replicate(
        &self,
        key: &str,
        value: serde_json::Value,
        version: Option<u64>,
        mode: Option<ReplicationMode>,
    ) -> Result<ReplicateOutcome> {
        self.replication.write().await.replicate(key, value, version, mode)
    }

    pub async fn read(&self, key: &str, consistency: ConsistencyLevel) -> ReadOutcome {
        self.replication.read().await.read(key, consistency)
    }

    pub async fn discover(&self, query: &ServiceQuery) -> Vec<ServiceRecord> {
        self.discovery.read().await.discover(query)
    }

    // ---- messaging ----

    pub async fn send_message(
        &self,
        queue: &str,
        data: serde_json::Value,
        priority: Option<u32>,
        dedup_id: Option<String>,
    ) -> EnqueueOutcome {
        self.queue.write().await.enqueue(queue, data, priority, dedup_id)
    }

    pub async fn receive_message(&self, queue: &str) -> Option<QueuedMessage> {
        self.queue.write().await.dequeue(queue)
    }

    pub async fn ack_message(&self, message_id: &str) -> bool {
        self.queue.write().await.ack(message_id)
    }

    pub async fn nack_message(&self, message_id: &str) -> Result<NackOutcome> {
        let outcome = self.queue.write().await.nack(message_id)?;
        if let NackOutcome::DeadLettered {
            message_id,
            retry_count,
        } = &outcome
        {
            self.emit(EventKind::MessageDeadLettered {
                message_id: message_id.clone(),
                retry_count: *retry_count,
            })
            .await;
        }
        Ok(outcome)
    }

    // ---- reporting ----

    pub async fn analytics(&self) -> Analytics {
        let cluster = self.monitor.read().await.check_health();
        let election = {
            let election = self.election.read().await;
            ElectionStats {
                leader: election.leader_id().map(str::to_string),
                term: election.term(),
                elections: election.election_count(),
                members: election.node_count(),
                active_members: election.active_count(),
            }
        };
        let locks = {
            let locks = self.locks.read().await;
            LockStats {
                active_locks: locks.lock_count(),
                waiters: locks.waiter_count(),
            }
        };
        let consensus = {
            let consensus = self.consensus.read().await;
            ConsensusStats {
                voters: consensus.node_count(),
                proposals: consensus.proposal_count(),
                decisions: consensus.decision_count(),
            }
        };
        let partitions = {
            let partitions = self.partitions.read().await;
            PartitionStats {
                nodes: partitions.node_count(),
                partitions: partitions.partition_count(),
                keys: partitions.key_count(),
                rebalances: partitions.rebalance_count(),
            }
        };
        let replication = {
            let replication = self.replication.read().await;
            ReplicationStats {
                replicas: replication.replica_count(),
                keys: replication.data_count(),
                conflicts: replication.conflict_count(),
                leader: replication.leader().map(str::to_string),
                avg_lag_ms: replication.check_lag().avg_lag_ms,
            }
        };
        let discovery = {
            let discovery = self.discovery.read().await;
            DiscoveryStats {
                services: discovery.service_count(),
                healthy: discovery.healthy_count(),
            }
        };
        let queues = self.queue.read().await.stats();

        Analytics {
            cluster,
            election,
            locks,
            consensus,
            partitions,
            replication,
            discovery,
            queues,
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let (nodes, active_nodes) = {
            let monitor = self.monitor.read().await;
            (monitor.node_count(), monitor.active_count())
        };
        let (leader, term) = {
            let election = self.election.read().await;
            (election.leader_id().map(str::to_string), election.term())
        };

        Snapshot {
            node_id: self.node_id.clone(),
            uptime: self.clock.now().saturating_duration_since(self.started_at).as_secs_f64(),
            nodes,
            active_nodes,
            leader,
            term,
            locks: self.locks.read().await.lock_count(),
            proposals: self.consensus.read().await.proposal_count(),
            queued_messages: self.queue.read().await.total_depth(),
            services: self.discovery.read().await.service_count(),
        }
    }

    /// One tick of background upkeep.
    ///
    /// The local node heartbeats itself, expired leases are swept, silent nodes are
    /// failed, the leader's health is checked, stale services are marked and
    /// unacknowledged messages are reclaimed.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        {
            let mut election = self.election.write().await;
            election.heartbeat(&self.node_id);
        }
        self.monitor.write().await.touch(&self.node_id);
        let mut errors = Vec::new();
        if let Err(e) = self
            .discovery
            .write()
            .await
            .health_check(&node_service_id(&self.node_id), true)
        {
            warn!(error = %e, node_id = %self.node_id, "Local service health check failed during maintenance");
            errors.push(e.to_string());
        }

        let expired_locks = self.locks.write().await.sweep_expired();
        // a standalone node has no peers to fail
        let failed_nodes = if self.config.distributed_enabled {
            self.monitor
                .write()
                .await
                .detect_failures(self.config.failure_timeout())
                .node_ids
        } else {
            Vec::new()
        };
        let leader_health = {
            let mut election = self.election.write().await;
            for node_id in &failed_nodes {
                election.mark_failed(node_id);
            }
            election.check_leader_health()
        };
        let stale_services = self.discovery.write().await.check_stale_services();
        let reclaimed_messages = self
            .queue
            .write()
            .await
            .reclaim_expired(self.config.visibility_timeout());
        let expired_proposals = self
            .consensus
            .write()
            .await
            .expire_proposals(self.config.consensus_timeout(), Utc::now());

        for lock in &expired_locks {
            self.emit(EventKind::LockExpired {
                resource: lock.resource.clone(),
                owner: lock.owner.clone(),
                promoted: lock.promoted.clone(),
            })
            .await;
        }
        for node_id in &failed_nodes {
            self.emit(EventKind::NodeFailed {
                node_id: node_id.clone(),
            })
            .await;
        }
        for proposal_id in &expired_proposals {
            self.emit(EventKind::ConsensusReached {
                proposal_id: proposal_id.clone(),
                decision: ProposalStatus::Rejected,
            })
            .await;
        }

        debug!(
            expired_locks = expired_locks.len(),
            failed_nodes = failed_nodes.len(),
            stale_services = stale_services.len(),
            reclaimed = reclaimed_messages.len(),
            "Maintenance tick completed"
        );

        MaintenanceReport {
            expired_locks,
            failed_nodes,
            leader_health,
            stale_services,
            reclaimed_messages,
            expired_proposals,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::infrastructure::{ManualClock, SequentialIdGenerator};
    use serde_json::json;

    fn create_test_orchestrator(clock: &ManualClock, bus: &EventBus) -> DistributedOrchestrator {
        let config = CoordinationConfig {
            node_id: "n0".to_string(),
            ..CoordinationConfig::default()
        };
        DistributedOrchestrator::with_collaborators(
            config,
            Collaborators {
                clock: Arc::new(clock.clone()),
                ids: Arc::new(SequentialIdGenerator::new("id")),
                rng: StdRng::seed_from_u64(1),
                events: Arc::new(bus.clone()),
            },
        )
    }

    #[tokio::test]
    async fn test_local_node_registered_everywhere() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        assert_eq!(orchestrator.election().read().await.node_count(), 1);
        assert_eq!(orchestrator.consensus().read().await.node_count(), 1);
        assert_eq!(orchestrator.monitor().read().await.node_count(), 1);
        assert_eq!(orchestrator.partitions().read().await.node_count(), 1);
        assert_eq!(orchestrator.discovery().read().await.service_count(), 1);
    }

    #[tokio::test]
    async fn test_add_and_remove_node_fan_out() {
        let clock = ManualClock::new();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let orchestrator = create_test_orchestrator(&clock, &bus);

        let added = orchestrator
            .add_node(NodeSpec::new("n1").with_address("h1", 8001))
            .await;
        assert_eq!(added.total_nodes, 2);
        assert_eq!(rx.recv().await.unwrap().event_type(), "node_joined");
        assert_eq!(orchestrator.partitions().read().await.node_count(), 2);

        let removed = orchestrator.remove_node("n1").await.unwrap();
        assert_eq!(removed.total_nodes, 1);
        assert_eq!(orchestrator.consensus().read().await.node_count(), 1);
        assert_eq!(orchestrator.discovery().read().await.service_count(), 1);

        let err = orchestrator.remove_node("n1").await.unwrap_err();
        assert_eq!(err.reason(), "node_not_found");
    }

    #[tokio::test]
    async fn test_elect_leader() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        orchestrator.add_node(NodeSpec::new("n1").with_priority(10)).await;

        let bully = orchestrator.elect_leader(ElectionAlgorithm::Bully).await;
        assert_eq!(bully.leader.as_deref(), Some("n1"));

        let raft = orchestrator.elect_leader(ElectionAlgorithm::Raft).await;
        assert_eq!(raft.leader.as_deref(), Some("n0"));
        assert!(raft.term > bully.term);
    }

    #[tokio::test]
    async fn test_failover_with_healthy_leader() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        orchestrator.elect_leader(ElectionAlgorithm::Bully).await;
        orchestrator.heartbeat("n0").await.unwrap();

        let report = orchestrator.failover().await;
        assert!(report.leader_healthy);
        assert!(report.reelection.is_none());
    }

    #[tokio::test]
    async fn test_failover_replaces_silent_leader() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        orchestrator.add_node(NodeSpec::new("n1").with_priority(10)).await;
        orchestrator.elect_leader(ElectionAlgorithm::Bully).await;

        clock.advance(Duration::from_secs(20));
        orchestrator.heartbeat("n0").await.unwrap();

        let report = orchestrator.failover().await;
        assert!(!report.leader_healthy);
        let reelection = report.reelection.unwrap();
        assert_eq!(reelection.old_leader.as_deref(), Some("n1"));
        assert_eq!(reelection.new_leader.as_deref(), Some("n0"));
    }

    #[tokio::test]
    async fn test_messages_round_trip() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        assert!(orchestrator.receive_message("q1").await.is_none());

        let sent = orchestrator.send_message("q1", json!({"x": 1}), None, None).await;
        assert!(matches!(sent, EnqueueOutcome::Enqueued { .. }));

        let msg = orchestrator.receive_message("q1").await.unwrap();
        assert_eq!(msg.data["x"], 1);
        assert!(orchestrator.ack_message(&msg.message_id).await);
    }

    #[tokio::test]
    async fn test_dead_letter_emits_event() {
        let clock = ManualClock::new();
        let bus = EventBus::default();
        let orchestrator = create_test_orchestrator(&clock, &bus);
        let mut rx = bus.subscribe();

        orchestrator.send_message("q1", json!(1), None, None).await;
        let mut outcome = None;
        for _ in 0..3 {
            let msg = orchestrator.receive_message("q1").await.unwrap();
            outcome = Some(orchestrator.nack_message(&msg.message_id).await.unwrap());
        }
        assert!(matches!(outcome, Some(NackOutcome::DeadLettered { retry_count: 3, .. })));
        assert_eq!(rx.recv().await.unwrap().event_type(), "message_dead_lettered");
    }

    #[tokio::test]
    async fn test_analytics_and_snapshot() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        orchestrator.add_node(NodeSpec::new("n1")).await;
        clock.advance(Duration::from_secs(2));

        let analytics = orchestrator.analytics().await;
        assert_eq!(analytics.cluster.total_nodes, 2);
        assert_eq!(analytics.consensus.voters, 2);

        let snapshot = orchestrator.snapshot().await;
        assert_eq!(snapshot.node_id, "n0");
        assert_eq!(snapshot.nodes, 2);
        assert_eq!(snapshot.uptime, 2.0);
    }

    #[tokio::test]
    async fn test_maintenance_sweeps_expired_locks() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        orchestrator
            .acquire_lock("res", "a", Some(Duration::from_secs(1)), false)
            .await;
        orchestrator.acquire_lock("res", "b", None, false).await;
        clock.advance(Duration::from_secs(2));

        let report = orchestrator.run_maintenance().await;
        assert_eq!(report.expired_locks.len(), 1);
        assert_eq!(report.expired_locks[0].promoted.as_deref(), Some("b"));
        let holder = orchestrator.locks().read().await.get_lock_info("res").map(|l| l.owner.clone());
        assert_eq!(holder.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_consensus_flow() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        orchestrator.add_node(NodeSpec::new("n1")).await;
        orchestrator.propose("p1", json!("v"), None).await.unwrap();
        orchestrator.vote("p1", "n0", true).await.unwrap();
        orchestrator.vote("p1", "n1", true).await.unwrap();

        let outcome = orchestrator.check_consensus("p1", ConsensusType::Majority).await.unwrap();
        assert!(outcome.reached);
    }

    #[tokio::test]
    async fn test_maintenance_reports_failed_health_check() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        orchestrator.discovery().write().await.deregister("node:n0");

        let report = orchestrator.run_maintenance().await;
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("node:n0"));

        // the remaining steps still ran
        assert!(report.expired_locks.is_empty());
        assert!(report.failed_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_standalone_node_skips_failure_detection() {
        let config = CoordinationConfig {
            node_id: "n0".to_string(),
            distributed_enabled: false,
            ..CoordinationConfig::default()
        };
        let clock = ManualClock::new();
        let orchestrator = DistributedOrchestrator::with_collaborators(
            config,
            Collaborators {
                clock: Arc::new(clock.clone()),
                ids: Arc::new(SequentialIdGenerator::new("id")),
                rng: StdRng::seed_from_u64(1),
                events: Arc::new(EventBus::default()),
            },
        );
        orchestrator.add_node(NodeSpec::new("n1")).await;
        clock.advance(Duration::from_secs(120));

        let report = orchestrator.run_maintenance().await;
        assert!(report.failed_nodes.is_empty());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_replica_nodes_follow_replication_factor() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        for node in ["n1", "n2", "n3"] {
            orchestrator.add_node(NodeSpec::new(node)).await;
        }

        let owner = orchestrator.assign_key("orders:42").await.unwrap().node_id;
        let replicas = orchestrator.replica_nodes("orders:42").await.unwrap();
        assert_eq!(replicas.len(), 3);
        assert_eq!(replicas[0], owner);
    }

    #[tokio::test]
    async fn test_remove_local_node_is_rejected() {
        let clock = ManualClock::new();
        let orchestrator = create_test_orchestrator(&clock, &EventBus::default());
        let err = orchestrator.remove_node("n0").await.unwrap_err();
        assert_eq!(err.reason(), "local_node");
        assert_eq!(orchestrator.consensus().read().await.node_count(), 1);
    }
}
