//! Shared fixtures for integration tests

#![allow(dead_code)]

use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;

use clustercore::{
    config::CoordinationConfig,
    core::{
        infrastructure::{ManualClock, SequentialIdGenerator},
        orchestrator::{Collaborators, DistributedOrchestrator, NodeSpec},
        patterns::EventBus,
    },
};

/// Orchestrator wired to a manual clock and a subscribable event bus
pub struct TestCluster {
    pub clock: ManualClock,
    pub bus: EventBus,
    pub orchestrator: Arc<DistributedOrchestrator>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CoordinationConfig) -> Self {
        let clock = ManualClock::new();
        let bus = EventBus::new(64);
        let orchestrator = DistributedOrchestrator::with_collaborators(
            config,
            Collaborators {
                clock: Arc::new(clock.clone()),
                ids: Arc::new(SequentialIdGenerator::new("msg")),
                rng: StdRng::seed_from_u64(7),
                events: Arc::new(bus.clone()),
            },
        );

        Self {
            clock,
            bus,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Add `n1..=count` with increasing priority
    pub async fn with_nodes(self, count: u32) -> Self {
        for i in 1..=count {
            self.orchestrator
                .add_node(NodeSpec::new(format!("n{}", i)).with_address("10.0.0.1", 9000 + i as u16).with_priority(i))
                .await;
        }
        self
    }
}

pub fn test_config() -> CoordinationConfig {
    CoordinationConfig {
        node_id: "n0".to_string(),
        ..CoordinationConfig::default()
    }
}
