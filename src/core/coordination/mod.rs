//! Mutual exclusion and agreement primitives.

pub mod consensus;
pub mod distributed_lock;

pub use consensus::{
    ConflictStrategy, ConsensusManager, ConsensusOutcome, ConsensusType, ProposalStatus, QuorumInfo, VoteReceipt,
};
pub use distributed_lock::{AcquireOutcome, DeadlockReport, DistributedLock, LockInfo, ReleaseOutcome};
