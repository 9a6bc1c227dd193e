//! Coordination events and their fan-out
//!
//! Components never publish directly; the orchestrator turns notable state
//! transitions into [`CoordinationEvent`]s and hands them to an [`EventPublisher`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::core::cluster::{NodeId, NodeRole, Term};
use crate::core::coordination::ProposalStatus;
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    NodeJoined { node_id: NodeId, role: NodeRole },
    NodeLeft { node_id: NodeId },
    NodeFailed { node_id: NodeId },
    LeaderElected { leader: NodeId, term: Term },
    Failover {
        old_leader: Option<NodeId>,
        new_leader: Option<NodeId>,
        term: Term,
    },
    LockExpired {
        resource: String,
        owner: String,
        promoted: Option<String>,
    },
    MessageDeadLettered { message_id: String, retry_count: u32 },
    ConsensusReached { proposal_id: String, decision: ProposalStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub event_id: Uuid,
    /// Node that observed the transition
    pub source: NodeId,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl CoordinationEvent {
    pub fn new(source: impl Into<NodeId>, kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            source: source.into(),
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::NodeJoined { .. } => "node_joined",
            EventKind::NodeLeft { .. } => "node_left",
            EventKind::NodeFailed { .. } => "node_failed",
            EventKind::LeaderElected { .. } => "leader_elected",
            EventKind::Failover { .. } => "failover",
            EventKind::LockExpired { .. } => "lock_expired",
            EventKind::MessageDeadLettered { .. } => "message_dead_lettered",
            EventKind::ConsensusReached { .. } => "consensus_reached",
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: CoordinationEvent) -> Result<()>;
}

/// In-process broadcast of coordination events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: CoordinationEvent) -> Result<()> {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type = event_type, receivers = receivers, "Event published"),
            // no subscribers is not a failure
            Err(_) => debug!(event_type = event_type, "Event dropped, no subscribers"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(CoordinationEvent::new(
            "n0",
            EventKind::LeaderElected {
                leader: "n1".into(),
                term: 3,
            },
        ))
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "leader_elected");
        assert_eq!(event.source, "n0");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        let event = CoordinationEvent::new("n0", EventKind::NodeLeft { node_id: "n1".into() });
        assert!(bus.publish(event).await.is_ok());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CoordinationEvent::new("n0", EventKind::NodeFailed { node_id: "n2".into() });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "node_failed");
        assert_eq!(value["node_id"], "n2");
    }
}
