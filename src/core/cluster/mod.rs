//! Cluster membership, leadership and health monitoring

pub mod cluster_monitor;
pub mod leader_election;
pub mod node;

pub use cluster_monitor::{ClusterHealth, ClusterMonitor, Metric, ScalingAction};
pub use leader_election::{ElectionAlgorithm, ElectionOutcome, LeaderElection, Term};
pub use node::{Node, NodeId, NodeMetrics, NodeRole, NodeStatus};
