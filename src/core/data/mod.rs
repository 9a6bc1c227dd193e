//! Data placement: partitioning and replication.

pub mod partition;
pub mod replication;

pub use partition::{ring_hash, KeyAssignment, Partition, PartitionManager, RebalanceReport};
pub use replication::{
    ConsistencyLevel, ReadOutcome, ReplicaRole, ReplicaStatus, ReplicateOutcome, ReplicationManager, ReplicationMode,
    WriteConflictStrategy,
};
