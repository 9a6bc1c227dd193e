//! Quorum voting over proposals
//!
//! The thresholds are plain counting rules. The byzantine threshold `2f + 1` states
//! the intended fault tolerance only; votes are not authenticated and nothing here
//! is resilient to equivocating voters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::core::cluster::NodeId;
use crate::error::{CoordinationError, Result};

pub const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusType {
    Majority,
    Unanimity,
    Byzantine,
    WeightedMajority,
    /// Alias of majority
    Quorum,
    /// Alias of majority
    Raft,
}

impl FromStr for ConsensusType {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "majority" => Ok(ConsensusType::Majority),
            "unanimity" => Ok(ConsensusType::Unanimity),
            "byzantine" => Ok(ConsensusType::Byzantine),
            "weighted_majority" | "weighted" => Ok(ConsensusType::WeightedMajority),
            "quorum" => Ok(ConsensusType::Quorum),
            "raft" => Ok(ConsensusType::Raft),
            other => Err(CoordinationError::InvalidConfig(format!(
                "unknown consensus type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    For,
    Against,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub value: serde_json::Value,
    pub proposer: Option<NodeId>,
    pub votes_for: Vec<NodeId>,
    pub votes_against: Vec<NodeId>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    fn has_voted(&self, node_id: &str) -> bool {
        self.votes_for.iter().chain(self.votes_against.iter()).any(|n| n == node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumInfo {
    pub consensus_type: ConsensusType,
    pub needed: usize,
    pub total: usize,
    pub achievable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub proposal_id: String,
    pub node_id: NodeId,
    pub vote: VoteChoice,
    pub total_for: usize,
    pub total_against: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightTally {
    pub weight_for: f64,
    pub weight_against: f64,
    pub total_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub proposal_id: String,
    pub reached: bool,
    pub decision: Option<ProposalStatus>,
    pub votes_for: usize,
    pub votes_against: usize,
    pub needed: usize,
    pub weights: WeightTally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    Latest,
    First,
    Majority,
}

impl FromStr for ConflictStrategy {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "latest" => Ok(ConflictStrategy::Latest),
            "first" => Ok(ConflictStrategy::First),
            "majority" => Ok(ConflictStrategy::Majority),
            other => Err(CoordinationError::InvalidConfig(format!(
                "unknown conflict strategy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution<T> {
    pub resolved: bool,
    pub winner: Option<T>,
    pub strategy: ConflictStrategy,
    pub candidates: usize,
}

/// Count-based quorum for `total` voters.
pub fn quorum_size(consensus_type: ConsensusType, total: usize) -> usize {
    match consensus_type {
        ConsensusType::Majority
        | ConsensusType::Quorum
        | ConsensusType::Raft
        | ConsensusType::WeightedMajority => total / 2 + 1,
        ConsensusType::Unanimity => total,
        ConsensusType::Byzantine => {
            let f = total.saturating_sub(1) / 3;
            2 * f + 1
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsensusManager {
    weights: BTreeMap<NodeId, f64>,
    proposals: HashMap<String, Proposal>,
    decision_count: u64,
}

impl ConsensusManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node_id: impl Into<NodeId>, weight: f64) {
        let node_id = node_id.into();
        debug!(node_id = %node_id, weight = weight, "Voter registered");
        self.weights.insert(node_id, weight);
    }

    pub fn remove_node(&mut self, node_id: &str) -> bool {
        self.weights.remove(node_id).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.weights.len()
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    pub fn decision_count(&self) -> u64 {
        self.decision_count
    }

    pub fn get_proposal(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.get(proposal_id)
    }

    pub fn calculate_quorum(&self, consensus_type: ConsensusType) -> QuorumInfo {
        let total = self.weights.len();
        let needed = quorum_size(consensus_type, total);
        QuorumInfo {
            consensus_type,
            needed,
            total,
            achievable: total > 0 && needed <= total,
        }
    }

    pub fn propose(
        &mut self,
        proposal_id: impl Into<String>,
        value: serde_json::Value,
        proposer: Option<NodeId>,
    ) -> Result<&Proposal> {
        let proposal_id = proposal_id.into();
        if self.proposals.contains_key(&proposal_id) {
            return Err(CoordinationError::ProposalExists(proposal_id));
        }

        info!(proposal_id = %proposal_id, proposer = ?proposer, "📨 Proposal submitted");
        let proposal = Proposal {
            id: proposal_id.clone(),
            value,
            proposer,
            votes_for: Vec::new(),
            votes_against: Vec::new(),
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
        };
        Ok(self.proposals.entry(proposal_id).or_insert(proposal))
    }

    pub fn vote(&mut self, proposal_id: &str, node_id: &str, approve: bool) -> Result<VoteReceipt> {
        let proposal = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| CoordinationError::ProposalNotFound(proposal_id.to_string()))?;

        if !self.weights.contains_key(node_id) {
            return Err(CoordinationError::NodeNotFound(node_id.to_string()));
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(CoordinationError::ProposalClosed(proposal_id.to_string()));
        }
        if proposal.has_voted(node_id) {
            return Err(CoordinationError::AlreadyVoted {
                proposal_id: proposal_id.to_string(),
                node_id: node_id.to_string(),
            });
        }

        let vote = if approve {
            proposal.votes_for.push(node_id.to_string());
            VoteChoice::For
        } else {
            proposal.votes_against.push(node_id.to_string());
            VoteChoice::Against
        };
        debug!(proposal_id = %proposal_id, node_id = %node_id, vote = ?vote, "Vote recorded");

        Ok(VoteReceipt {
            proposal_id: proposal_id.to_string(),
            node_id: node_id.to_string(),
            vote,
            total_for: proposal.votes_for.len(),
            total_against: proposal.votes_against.len(),
        })
    }

    fn tally(&self, proposal: &Proposal) -> WeightTally {
        let weight_of = |voters: &[NodeId]| -> f64 {
            voters
                .iter()
                .map(|n| self.weights.get(n).copied().unwrap_or(0.0))
                .sum()
        };
        WeightTally {
            weight_for: weight_of(&proposal.votes_for),
            weight_against: weight_of(&proposal.votes_against),
            total_weight: self.weights.values().sum(),
        }
    }

    /// Finalize the proposal once either side meets the threshold.
    ///
    /// A finalized proposal keeps its decision; later calls report it unchanged.
    pub fn check_consensus(&mut self, proposal_id: &str, consensus_type: ConsensusType) -> Result<ConsensusOutcome> {
        let proposal = self
            .proposals
            .get(proposal_id)
            .ok_or_else(|| CoordinationError::ProposalNotFound(proposal_id.to_string()))?;

        let needed = quorum_size(consensus_type, self.weights.len());
        let weights = self.tally(proposal);
        let votes_for = proposal.votes_for.len();
        let votes_against = proposal.votes_against.len();

        let decision = match proposal.status {
            ProposalStatus::Pending => match consensus_type {
                ConsensusType::WeightedMajority => {
                    let half = weights.total_weight / 2.0;
                    if weights.total_weight > 0.0 && weights.weight_for > half {
                        Some(ProposalStatus::Accepted)
                    } else if weights.total_weight > 0.0 && weights.weight_against >= half {
                        Some(ProposalStatus::Rejected)
                    } else {
                        None
                    }
                }
                _ if votes_for >= needed && votes_for > 0 => Some(ProposalStatus::Accepted),
                _ if votes_against >= needed && votes_against > 0 => Some(ProposalStatus::Rejected),
                _ => None,
            },
            finalized => Some(finalized),
        };

        if let Some(status) = decision {
            if let Some(proposal) = self.proposals.get_mut(proposal_id) {
                if proposal.status == ProposalStatus::Pending {
                    proposal.status = status;
                    self.decision_count += 1;
                    info!(
                        proposal_id = %proposal_id,
                        decision = ?status,
                        votes_for = votes_for,
                        votes_against = votes_against,
                        "✅ Consensus reached"
                    );
                }
            }
        }

        Ok(ConsensusOutcome {
            proposal_id: proposal_id.to_string(),
            reached: decision.is_some(),
            decision,
            votes_for,
            votes_against,
            needed,
            weights,
        })
    }

    /// Reject pending proposals opened more than `timeout` before `now`.
    pub fn expire_proposals(&mut self, timeout: std::time::Duration, now: DateTime<Utc>) -> Vec<String> {
        let Ok(limit) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };

        let mut expired: Vec<String> = self
            .proposals
            .values_mut()
            .filter(|p| p.status == ProposalStatus::Pending && now - p.created_at > limit)
            .map(|p| {
                p.status = ProposalStatus::Rejected;
                p.id.clone()
            })
            .collect();
        expired.sort();

        self.decision_count += expired.len() as u64;
        for proposal_id in &expired {
            warn!(proposal_id = %proposal_id, timeout_secs = timeout.as_secs(), "Proposal timed out, rejecting");
        }
        expired
    }

    /// Pick one of several competing values.
    ///
    /// `Majority` ties go to the value seen first.
    pub fn resolve_conflict<T: Clone + PartialEq>(
        &self,
        values: &[T],
        strategy: ConflictStrategy,
    ) -> ConflictResolution<T> {
        let winner = match strategy {
            ConflictStrategy::Latest => values.last().cloned(),
            ConflictStrategy::First => values.first().cloned(),
            ConflictStrategy::Majority => {
                let mut counts: Vec<(&T, usize)> = Vec::new();
                for value in values {
                    match counts.iter_mut().find(|(v, _)| *v == value) {
                        Some(entry) => entry.1 += 1,
                        None => counts.push((value, 1)),
                    }
                }
                let mut best: Option<(&T, usize)> = None;
                for (value, count) in counts {
                    if best.map_or(true, |(_, c)| count > c) {
                        best = Some((value, count));
                    }
                }
                best.map(|(v, _)| v.clone())
            }
        };

        ConflictResolution {
            resolved: winner.is_some(),
            winner,
            strategy,
            candidates: values.len(),
        }
    }
}
