//! Coordination core
//!
//! Leaf components own their state and expose synchronous operations. The
//! orchestrator composes them and is the only place that deals with locking,
//! events and background maintenance.

// Membership, leader election and monitoring
pub mod cluster;

// Locks and consensus
pub mod coordination;

// Partitioning and replication
pub mod data;

// Service registry
pub mod discovery;

// Priority message queues
pub mod messaging;

// Injected clock and id sources
pub mod infrastructure;

// Coordination events
pub mod patterns;

pub mod logging;
pub mod maintenance;
pub mod orchestrator;

pub use cluster::{ClusterMonitor, ElectionAlgorithm, LeaderElection, Node, NodeId, NodeRole, NodeStatus};
pub use coordination::{ConsensusManager, ConsensusType, DistributedLock};
pub use data::{PartitionManager, ReplicationManager};
pub use discovery::ServiceDiscovery;
pub use infrastructure::{Clock, IdGenerator, ManualClock, SystemClock};
pub use maintenance::MaintenanceScheduler;
pub use messaging::DistributedQueue;
pub use orchestrator::{Collaborators, DistributedOrchestrator, NodeSpec};
pub use patterns::{CoordinationEvent, EventBus, EventPublisher};
