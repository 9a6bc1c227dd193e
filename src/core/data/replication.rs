//! Replica registry with simplified propagation and consistency-level reads
//!
//! Lag is modelled, not measured: a synchronous replica is at the written version
//! with zero lag, an asynchronous one trails by exactly one version with a fixed lag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::core::cluster::NodeId;
use crate::error::{CoordinationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    Sync,
    Async,
    SemiSync,
}

impl FromStr for ReplicationMode {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(ReplicationMode::Sync),
            "async" => Ok(ReplicationMode::Async),
            "semi_sync" | "semi-sync" => Ok(ReplicationMode::SemiSync),
            other => Err(CoordinationError::InvalidConfig(format!(
                "unknown replication mode: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaRole {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Active,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Eventual,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConflictStrategy {
    LastWriteWins,
    FirstWriteWins,
    HigherVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    pub replica_id: String,
    pub node_id: NodeId,
    pub mode: ReplicationMode,
    pub role: ReplicaRole,
    pub status: ReplicaStatus,
    pub lag_ms: f64,
    pub synced_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: serde_json::Value,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateOutcome {
    pub key: String,
    pub version: u64,
    /// Active replicas the write was propagated to
    pub synced: usize,
    /// Of those, replicas left one version behind
    pub lagging: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOutcome {
    pub key: String,
    pub found: bool,
    pub value: Option<serde_json::Value>,
    pub version: Option<u64>,
    pub consistency: ConsistencyLevel,
    pub consistent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagReport {
    pub replicas: usize,
    pub avg_lag_ms: f64,
    pub max_lag_ms: f64,
    pub lagging: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConflict {
    pub key: String,
    pub value_a: serde_json::Value,
    pub value_b: serde_json::Value,
    pub version_a: u64,
    pub version_b: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCheck {
    pub key: String,
    /// Same version, different values
    pub conflict: bool,
    /// The pair is pending resolution
    pub recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolved {
    pub key: String,
    pub resolved: bool,
    pub winner: serde_json::Value,
    pub version: u64,
    pub strategy: WriteConflictStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionOutcome {
    pub replica_id: String,
    pub role: ReplicaRole,
    pub demoted: Option<String>,
}

#[derive(Debug)]
pub struct ReplicationManager {
    replicas: BTreeMap<String, Replica>,
    data: HashMap<String, StoredValue>,
    conflicts: HashMap<String, WriteConflict>,
    async_lag_ms: f64,
}

impl ReplicationManager {
    pub fn new(async_lag_ms: f64) -> Self {
        Self {
            replicas: BTreeMap::new(),
            data: HashMap::new(),
            conflicts: HashMap::new(),
            async_lag_ms,
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn data_count(&self) -> usize {
        self.data.len()
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn get_replica(&self, replica_id: &str) -> Option<&Replica> {
        self.replicas.get(replica_id)
    }

    pub fn leader(&self) -> Option<&str> {
        self.replicas
            .values()
            .find(|r| r.role == ReplicaRole::Leader)
            .map(|r| r.replica_id.as_str())
    }

    fn demote_leader(&mut self) -> Option<String> {
        let leader = self.leader()?.to_string();
        if let Some(replica) = self.replicas.get_mut(&leader) {
            replica.role = ReplicaRole::Follower;
        }
        Some(leader)
    }

    /// Register a replica. Registering a leader demotes the current one.
    pub fn add_replica(
        &mut self,
        replica_id: &str,
        node_id: &str,
        mode: ReplicationMode,
        role: ReplicaRole,
    ) -> Result<&Replica> {
        if self.replicas.contains_key(replica_id) {
            return Err(CoordinationError::ReplicaExists(replica_id.to_string()));
        }
        if role == ReplicaRole::Leader {
            self.demote_leader();
        }

        info!(replica_id = %replica_id, node_id = %node_id, mode = ?mode, role = ?role, "Replica registered");
        let replica = Replica {
            replica_id: replica_id.to_string(),
            node_id: node_id.to_string(),
            mode,
            role,
            status: ReplicaStatus::Active,
            lag_ms: 0.0,
            synced_version: 0,
        };
        Ok(self.replicas.entry(replica_id.to_string()).or_insert(replica))
    }

    pub fn remove_replica(&mut self, replica_id: &str) -> bool {
        self.replicas.remove(replica_id).is_some()
    }

    /// Drop every replica hosted on `node_id`.
    pub fn remove_node_replicas(&mut self, node_id: &str) -> usize {
        let before = self.replicas.len();
        self.replicas.retain(|_, r| r.node_id != node_id);
        before - self.replicas.len()
    }

    pub fn set_replica_status(&mut self, replica_id: &str, status: ReplicaStatus) -> Result<()> {
        let replica = self
            .replicas
            .get_mut(replica_id)
            .ok_or_else(|| CoordinationError::ReplicaNotFound(replica_id.to_string()))?;
        if replica.status != status {
            debug!(replica_id = %replica_id, status = ?status, "Replica status changed");
        }
        replica.status = status;
        Ok(())
    }

    /// Store `value` and propagate it to every active replica.
    ///
    /// An omitted version means "stored version + 1"; `mode` overrides each
    /// replica's own propagation mode.
    pub fn replicate(
        &mut self,
        key: &str,
        value: serde_json::Value,
        version: Option<u64>,
        mode: Option<ReplicationMode>,
    ) -> Result<ReplicateOutcome> {
        let current = self.data.get(key).map(|stored| stored.version);
        let version = match (version, current) {
            (Some(attempted), Some(current)) if attempted < current => {
                return Err(CoordinationError::StaleVersion {
                    key: key.to_string(),
                    attempted,
                    current,
                });
            }
            (Some(v), _) => v,
            (None, current) => current.unwrap_or(0) + 1,
        };

        self.data.insert(
            key.to_string(),
            StoredValue {
                value,
                version,
                updated_at: Utc::now(),
            },
        );

        let mut synced = 0;
        let mut lagging = 0;
        for replica in self.replicas.values_mut().filter(|r| r.status == ReplicaStatus::Active) {
            let in_step = match mode.unwrap_or(replica.mode) {
                ReplicationMode::Sync => true,
                ReplicationMode::Async => false,
                ReplicationMode::SemiSync => replica.mode == ReplicationMode::Sync,
            };
            if in_step {
                replica.synced_version = version;
                replica.lag_ms = 0.0;
            } else {
                replica.synced_version = version.saturating_sub(1);
                replica.lag_ms = self.async_lag_ms;
                lagging += 1;
            }
            synced += 1;
        }

        debug!(key = %key, version = version, synced = synced, lagging = lagging, "Value replicated");
        Ok(ReplicateOutcome {
            key: key.to_string(),
            version,
            synced,
            lagging,
        })
    }

    /// Strong reads are consistent only if every active replica has caught up.
    pub fn read(&self, key: &str, consistency: ConsistencyLevel) -> ReadOutcome {
        let Some(stored) = self.data.get(key) else {
            return ReadOutcome {
                key: key.to_string(),
                found: false,
                value: None,
                version: None,
                consistency,
                consistent: false,
            };
        };

        let consistent = match consistency {
            ConsistencyLevel::Eventual => true,
            ConsistencyLevel::Strong => self
                .replicas
                .values()
                .filter(|r| r.status == ReplicaStatus::Active)
                .all(|r| r.synced_version >= stored.version),
        };

        ReadOutcome {
            key: key.to_string(),
            found: true,
            value: Some(stored.value.clone()),
            version: Some(stored.version),
            consistency,
            consistent,
        }
    }

    pub fn check_lag(&self) -> LagReport {
        let lags: Vec<f64> = self.replicas.values().map(|r| r.lag_ms).collect();
        let avg_lag_ms = if lags.is_empty() {
            0.0
        } else {
            lags.iter().sum::<f64>() / lags.len() as f64
        };
        let max_lag_ms = lags.iter().copied().fold(0.0, f64::max);

        LagReport {
            replicas: self.replicas.len(),
            avg_lag_ms,
            max_lag_ms,
            lagging: self
                .replicas
                .values()
                .filter(|r| r.lag_ms > 0.0)
                .map(|r| r.replica_id.clone())
                .collect(),
        }
    }

    /// Two different values written at the same version conflict.
    ///
    /// Any divergent pair is kept until resolved, so writes at different versions can
    /// still be settled by version.
    pub fn detect_conflict(
        &mut self,
        key: &str,
        value_a: serde_json::Value,
        value_b: serde_json::Value,
        version_a: u64,
        version_b: u64,
    ) -> ConflictCheck {
        let recorded = value_a != value_b;
        let conflict = recorded && version_a == version_b;
        if conflict {
            warn!(key = %key, version = version_a, "Write conflict detected");
        } else if recorded {
            debug!(key = %key, version_a = version_a, version_b = version_b, "Divergent writes recorded");
        }
        if recorded {
            self.conflicts.insert(
                key.to_string(),
                WriteConflict {
                    key: key.to_string(),
                    value_a,
                    value_b,
                    version_a,
                    version_b,
                },
            );
        }
        ConflictCheck {
            key: key.to_string(),
            conflict,
            recorded,
        }
    }

    /// Settle a recorded conflict and store the winning value.
    ///
    /// `HigherVersion` ties keep whichever side matches the stored value, else `value_b`.
    pub fn resolve_conflict(&mut self, key: &str, strategy: WriteConflictStrategy) -> Result<ConflictResolved> {
        let conflict = self
            .conflicts
            .remove(key)
            .ok_or_else(|| CoordinationError::NoConflict(key.to_string()))?;

        let a_wins = match strategy {
            WriteConflictStrategy::LastWriteWins => false,
            WriteConflictStrategy::FirstWriteWins => true,
            WriteConflictStrategy::HigherVersion => match conflict.version_a.cmp(&conflict.version_b) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => self.data.get(key).map_or(false, |stored| stored.value == conflict.value_a),
            },
        };
        let (winner, version) = if a_wins {
            (conflict.value_a, conflict.version_a)
        } else {
            (conflict.value_b, conflict.version_b)
        };

        let version = self
            .data
            .get(key)
            .map_or(version, |stored| stored.version.max(version));
        self.data.insert(
            key.to_string(),
            StoredValue {
                value: winner.clone(),
                version,
                updated_at: Utc::now(),
            },
        );
        info!(key = %key, strategy = ?strategy, "Write conflict resolved");

        Ok(ConflictResolved {
            key: key.to_string(),
            resolved: true,
            winner,
            version,
            strategy,
        })
    }

    /// Make `replica_id` the leader, demoting any current leader first.
    pub fn promote_replica(&mut self, replica_id: &str) -> Result<PromotionOutcome> {
        if !self.replicas.contains_key(replica_id) {
            return Err(CoordinationError::ReplicaNotFound(replica_id.to_string()));
        }

        let demoted = self.demote_leader().filter(|id| id != replica_id);
        if let Some(replica) = self.replicas.get_mut(replica_id) {
            replica.role = ReplicaRole::Leader;
        }
        info!(replica_id = %replica_id, demoted = ?demoted, "👑 Replica promoted to leader");

        Ok(PromotionOutcome {
            replica_id: replica_id.to_string(),
            role: ReplicaRole::Leader,
            demoted,
        })
    }
}
