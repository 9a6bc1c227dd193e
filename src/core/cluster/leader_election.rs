//! Leader election for the coordination cluster
//!
//! Two strategies are offered. The bully election picks the active member with the
//! highest `(priority, id)` tuple. The raft-style election is a simplified majority
//! vote: every active member is counted as voting for the local node, and leadership
//! is granted once that count reaches `⌊n/2⌋ + 1` of the known membership. There is
//! no replicated log and no term persistence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::cluster::node::{NodeId, NodeStatus};
use crate::core::infrastructure::SharedClock;

/// Current term number in the election process
pub type Term = u64;

/// Heartbeat misses tolerated before the leader becomes suspect
const HEARTBEAT_TOLERANCE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionAlgorithm {
    Bully,
    Raft,
}

impl std::str::FromStr for ElectionAlgorithm {
    type Err = crate::error::CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bully" => Ok(ElectionAlgorithm::Bully),
            "raft" => Ok(ElectionAlgorithm::Raft),
            other => Err(crate::error::CoordinationError::InvalidConfig(format!(
                "unknown election algorithm: {}",
                other
            ))),
        }
    }
}

/// A participant in elections
#[derive(Debug, Clone, Serialize)]
pub struct ElectionMember {
    pub id: NodeId,
    pub priority: u32,
    pub status: NodeStatus,
    #[serde(skip)]
    pub last_heartbeat: Instant,
}

/// Result of one election round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionOutcome {
    pub algorithm: ElectionAlgorithm,
    pub leader: Option<NodeId>,
    pub term: Term,
    pub votes: usize,
    pub quorum: usize,
    pub candidates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderHealthIssue {
    NoLeader,
    HeartbeatTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderHealth {
    pub healthy: bool,
    pub leader: Option<NodeId>,
    pub reason: Option<LeaderHealthIssue>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBrainReport {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub quorum: usize,
    pub has_quorum: bool,
    pub risk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverOutcome {
    pub old_leader: Option<NodeId>,
    pub new_leader: Option<NodeId>,
    pub term: Term,
}

/// Membership plus leader state for one coordinating process
#[derive(Debug)]
pub struct LeaderElection {
    local_id: NodeId,
    members: HashMap<NodeId, ElectionMember>,
    leader_id: Option<NodeId>,
    term: Term,
    election_count: u64,
    heartbeat_interval: Duration,
    clock: SharedClock,
}

/// Majority threshold over `total` members
pub fn majority(total: usize) -> usize {
    total / 2 + 1
}

impl LeaderElection {
    /// Create an election manager; the local node joins as an active member.
    pub fn new(local_id: impl Into<NodeId>, heartbeat_interval: Duration, clock: SharedClock) -> Self {
        let local_id = local_id.into();
        let mut election = Self {
            local_id: local_id.clone(),
            members: HashMap::new(),
            leader_id: None,
            term: 0,
            election_count: 0,
            heartbeat_interval,
            clock,
        };
        election.add_node(local_id, 0);
        election
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Add or re-add a member. Re-adding resets the member to active.
    pub fn add_node(&mut self, node_id: impl Into<NodeId>, priority: u32) {
        let node_id = node_id.into();
        let now = self.clock.now();
        info!(node_id = %node_id, priority = priority, "Adding election member");
        self.members.insert(
            node_id.clone(),
            ElectionMember {
                id: node_id,
                priority,
                status: NodeStatus::Active,
                last_heartbeat: now,
            },
        );
    }

    pub fn remove_node(&mut self, node_id: &str) -> bool {
        if self.members.remove(node_id).is_none() {
            return false;
        }
        if self.leader_id.as_deref() == Some(node_id) {
            warn!(node_id = %node_id, term = self.term, "Leader removed from membership");
            self.leader_id = None;
        }
        info!(node_id = %node_id, "Removed election member");
        true
    }

    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    pub fn active_count(&self) -> usize {
        self.members
            .values()
            .filter(|m| m.status == NodeStatus::Active)
            .count()
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn election_count(&self) -> u64 {
        self.election_count
    }

    pub fn member(&self, node_id: &str) -> Option<&ElectionMember> {
        self.members.get(node_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &ElectionMember> {
        self.members.values()
    }

    fn begin_round(&mut self) -> Term {
        self.term += 1;
        self.election_count += 1;
        self.term
    }

    fn install_leader(&mut self, leader: &str) {
        let now = self.clock.now();
        if let Some(member) = self.members.get_mut(leader) {
            member.last_heartbeat = now;
        }
        self.leader_id = Some(leader.to_string());
    }

    /// Elect the active member with the highest `(priority, id)`.
    pub fn elect_bully(&mut self) -> ElectionOutcome {
        let term = self.begin_round();

        let winner = self
            .members
            .values()
            .filter(|m| m.status == NodeStatus::Active)
            .max_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)))
            .map(|m| m.id.clone());
        let candidates = self.active_count();

        match &winner {
            Some(leader) => {
                self.install_leader(leader);
                info!(leader_id = %leader, term = term, "Leader elected (bully)");
            }
            None => {
                self.leader_id = None;
                warn!(term = term, "Bully election found no active candidates");
            }
        }

        ElectionOutcome {
            algorithm: ElectionAlgorithm::Bully,
            leader: winner,
            term,
            votes: candidates,
            quorum: 1,
            candidates,
        }
    }

    /// Simplified majority vote with the local node as the only candidate.
    pub fn elect_raft(&mut self) -> ElectionOutcome {
        let term = self.begin_round();
        let total = self.members.len();
        let quorum = majority(total);

        let local_active = self
            .members
            .get(&self.local_id)
            .map(|m| m.status == NodeStatus::Active)
            .unwrap_or(false);
        let votes = if local_active { self.active_count() } else { 0 };

        let leader = if votes >= quorum {
            let local = self.local_id.clone();
            self.install_leader(&local);
            info!(leader_id = %local, term = term, votes = votes, quorum = quorum, "Leader elected (raft)");
            Some(local)
        } else {
            self.leader_id = None;
            warn!(term = term, votes = votes, quorum = quorum, "Raft election failed to reach quorum");
            None
        };

        ElectionOutcome {
            algorithm: ElectionAlgorithm::Raft,
            leader,
            term,
            votes,
            quorum,
            candidates: usize::from(local_active),
        }
    }

    pub fn elect(&mut self, algorithm: ElectionAlgorithm) -> ElectionOutcome {
        match algorithm {
            ElectionAlgorithm::Bully => self.elect_bully(),
            ElectionAlgorithm::Raft => self.elect_raft(),
        }
    }

    /// Refresh liveness of a member. Does not revive suspect or failed members.
    pub fn heartbeat(&mut self, node_id: &str) -> bool {
        let now = self.clock.now();
        match self.members.get_mut(node_id) {
            Some(member) => {
                member.last_heartbeat = now;
                debug!(node_id = %node_id, "Heartbeat received");
                true
            }
            None => false,
        }
    }

    /// Check the leader's heartbeat against `3 × heartbeat_interval`.
    pub fn check_leader_health(&mut self) -> LeaderHealth {
        let leader_id = match &self.leader_id {
            Some(id) => id.clone(),
            None => {
                return LeaderHealth {
                    healthy: false,
                    leader: None,
                    reason: Some(LeaderHealthIssue::NoLeader),
                    elapsed_ms: 0,
                }
            }
        };

        let now = self.clock.now();
        let timeout = self.heartbeat_interval * HEARTBEAT_TOLERANCE;
        let Some(member) = self.members.get_mut(&leader_id) else {
            return LeaderHealth {
                healthy: false,
                leader: Some(leader_id),
                reason: Some(LeaderHealthIssue::NoLeader),
                elapsed_ms: 0,
            };
        };

        let elapsed = now.saturating_duration_since(member.last_heartbeat);
        let timed_out = elapsed > timeout || member.status != NodeStatus::Active;

        if timed_out {
            if member.status == NodeStatus::Active {
                member.status = NodeStatus::Suspect;
            }
            warn!(
                leader_id = %leader_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Leader heartbeat timed out, marking suspect"
            );
        }

        LeaderHealth {
            healthy: !timed_out,
            leader: Some(leader_id),
            reason: timed_out.then_some(LeaderHealthIssue::HeartbeatTimeout),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn detect_split_brain(&self) -> SplitBrainReport {
        let total = self.members.len();
        let active = self.active_count();
        let quorum = majority(total);
        let has_quorum = active >= quorum;

        if !has_quorum {
            warn!(total = total, active = active, quorum = quorum, "Split-brain risk detected");
        }

        SplitBrainReport {
            total_nodes: total,
            active_nodes: active,
            quorum,
            has_quorum,
            risk: !has_quorum,
        }
    }

    /// Mark a member failed (one-way until re-added).
    pub fn mark_failed(&mut self, node_id: &str) -> bool {
        match self.members.get_mut(node_id) {
            Some(member) => {
                member.status = NodeStatus::Failed;
                if self.leader_id.as_deref() == Some(node_id) {
                    self.leader_id = None;
                }
                true
            }
            None => false,
        }
    }

    /// Fail the current leader and run a fresh bully election.
    pub fn failover(&mut self) -> FailoverOutcome {
        let old_leader = self.leader_id.clone();
        if let Some(old) = &old_leader {
            warn!(leader_id = %old, term = self.term, "Failing over from leader");
            self.mark_failed(old);
        }

        let outcome = self.elect_bully();
        FailoverOutcome {
            old_leader,
            new_leader: outcome.leader,
            term: outcome.term,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::infrastructure::ManualClock;
    use std::sync::Arc;

    fn election(clock: &ManualClock) -> LeaderElection {
        LeaderElection::new("n0", Duration::from_secs(5), Arc::new(clock.clone()))
    }

    #[test]
    fn test_new_election_contains_local_node() {
        let clock = ManualClock::new();
        let le = election(&clock);
        assert_eq!(le.node_count(), 1);
        assert!(le.leader_id().is_none());
        assert_eq!(le.term(), 0);
    }

    #[test]
    fn test_add_and_remove_node() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 5);
        assert_eq!(le.node_count(), 2);
        assert!(le.remove_node("n1"));
        assert!(!le.remove_node("missing"));
        assert_eq!(le.node_count(), 1);
    }

    #[test]
    fn test_elect_bully_picks_highest_priority() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 10);
        le.add_node("n2", 5);

        let outcome = le.elect_bully();
        assert_eq!(outcome.leader.as_deref(), Some("n1"));
        assert_eq!(outcome.algorithm, ElectionAlgorithm::Bully);
        assert_eq!(le.leader_id(), Some("n1"));
        assert_eq!(le.term(), 1);
    }

    #[test]
    fn test_elect_bully_breaks_ties_by_id() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.remove_node("n0");
        le.add_node("b", 5);
        le.add_node("a", 10);
        le.add_node("c", 10);

        let outcome = le.elect_bully();
        assert_eq!(outcome.leader.as_deref(), Some("c"));
    }

    #[test]
    fn test_elect_bully_without_members() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.remove_node("n0");
        let outcome = le.elect_bully();
        assert!(outcome.leader.is_none());
        assert_eq!(outcome.term, 1);
    }

    #[test]
    fn test_elect_raft_grants_local_node_with_majority() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 0);
        le.add_node("n2", 0);

        let outcome = le.elect_raft();
        assert_eq!(outcome.algorithm, ElectionAlgorithm::Raft);
        assert_eq!(outcome.leader.as_deref(), Some("n0"));
        assert!(outcome.votes >= outcome.quorum);
        assert_eq!(outcome.quorum, 2);
    }

    #[test]
    fn test_elect_raft_fails_without_majority() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 0);
        le.add_node("n2", 0);
        le.mark_failed("n1");
        le.mark_failed("n2");

        let outcome = le.elect_raft();
        assert!(outcome.leader.is_none());
        assert_eq!(outcome.votes, 1);
    }

    #[test]
    fn test_heartbeat_unknown_node() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 0);
        assert!(le.heartbeat("n1"));
        assert!(!le.heartbeat("unknown"));
    }

    #[test]
    fn test_leader_health_without_leader() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        let health = le.check_leader_health();
        assert!(!health.healthy);
        assert_eq!(health.reason, Some(LeaderHealthIssue::NoLeader));
    }

    #[test]
    fn test_leader_health_times_out_and_marks_suspect() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.elect_bully();
        le.heartbeat("n0");
        assert!(le.check_leader_health().healthy);

        clock.advance(Duration::from_secs(16));
        let health = le.check_leader_health();
        assert!(!health.healthy);
        assert_eq!(health.reason, Some(LeaderHealthIssue::HeartbeatTimeout));
        assert_eq!(le.member("n0").unwrap().status, NodeStatus::Suspect);

        // a late heartbeat does not revive a suspect leader
        le.heartbeat("n0");
        assert!(!le.check_leader_health().healthy);
    }

    #[test]
    fn test_split_brain_detection() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 0);
        le.add_node("n2", 0);

        let report = le.detect_split_brain();
        assert_eq!(report.total_nodes, 3);
        assert!(report.has_quorum);

        le.mark_failed("n1");
        le.mark_failed("n2");
        let report = le.detect_split_brain();
        assert!(report.risk);
        assert_eq!(report.quorum, 2);
    }

    #[test]
    fn test_failover_elects_next_best() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 10);
        le.elect_bully();
        assert_eq!(le.leader_id(), Some("n1"));

        let outcome = le.failover();
        assert_eq!(outcome.old_leader.as_deref(), Some("n1"));
        assert_eq!(outcome.new_leader.as_deref(), Some("n0"));
        assert_eq!(le.member("n1").unwrap().status, NodeStatus::Failed);
        assert_eq!(outcome.term, 2);
    }

    #[test]
    fn test_re_add_restores_active() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.add_node("n1", 1);
        le.mark_failed("n1");
        le.add_node("n1", 1);
        assert_eq!(le.member("n1").unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn test_election_count_and_monotonic_term() {
        let clock = ManualClock::new();
        let mut le = election(&clock);
        le.elect_bully();
        le.elect_raft();
        assert_eq!(le.election_count(), 2);
        assert_eq!(le.term(), 2);
    }
}
