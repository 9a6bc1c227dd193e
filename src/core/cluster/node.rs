//! Cluster node entity shared by membership, monitoring and the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::error::CoordinationError;

pub type NodeId = String;

/// Liveness state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Suspect,
    Failed,
    Joining,
    Leaving,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Suspect => "suspect",
            NodeStatus::Failed => "failed",
            NodeStatus::Joining => "joining",
            NodeStatus::Leaving => "leaving",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a node plays in the cluster topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Master,
    #[default]
    Worker,
    Replica,
    Observer,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
            NodeRole::Replica => "replica",
            NodeRole::Observer => "observer",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(NodeRole::Master),
            "worker" => Ok(NodeRole::Worker),
            "replica" => Ok(NodeRole::Replica),
            "observer" => Ok(NodeRole::Observer),
            other => Err(CoordinationError::InvalidConfig(format!(
                "unknown node role: {}",
                other
            ))),
        }
    }
}

/// Resource utilisation ratios in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

/// A cluster member as seen by the monitor
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    pub status: NodeStatus,
    #[serde(skip)]
    pub last_seen: Instant,
    pub metrics: NodeMetrics,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, host: impl Into<String>, port: u16, role: NodeRole, now: Instant) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            role,
            status: NodeStatus::Active,
            last_seen: now,
            metrics: NodeMetrics::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}
