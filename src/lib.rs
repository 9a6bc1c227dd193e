//! clustercore - distributed coordination primitives
//!
//! Leader election, distributed locks, quorum consensus, consistent-hash
//! partitioning, replication, cluster monitoring, service discovery and priority
//! message queues, composed by a [`DistributedOrchestrator`].

use std::sync::Arc;

pub mod config;
pub mod core;
pub mod error;
pub mod presentation;

// Re-export commonly used types
pub use crate::config::CoordinationConfig;
pub use crate::core::orchestrator::DistributedOrchestrator;
pub use error::{CoordinationError, Result};

/// State shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DistributedOrchestrator>,
}
