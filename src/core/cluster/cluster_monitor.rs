//! Cluster monitor
//!
//! Tracks per-node resource metrics and contact times, raises threshold alerts,
//! detects silent nodes and evaluates autoscaling rules. Scaling actions are only
//! reported; executing them is left to the caller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::cluster::node::{Node, NodeId, NodeMetrics, NodeRole, NodeStatus};
use crate::core::infrastructure::SharedClock;
use crate::error::{CoordinationError, Result};

/// Alerts retained for inspection
const MAX_RETAINED_ALERTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
}

impl Metric {
    fn read(&self, metrics: &NodeMetrics) -> f64 {
        match self {
            Metric::Cpu => metrics.cpu,
            Metric::Memory => metrics.memory,
            Metric::Disk => metrics.disk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Threshold,
    NodeFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub node_id: NodeId,
    pub kind: AlertKind,
    pub metric: Option<Metric>,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub raised_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRule {
    pub metric: Metric,
    pub threshold: f64,
    pub action: ScalingAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAction {
    pub metric: Metric,
    pub value: f64,
    pub threshold: f64,
    pub action: ScalingAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvaluation {
    pub triggered: usize,
    pub actions: Vec<TriggeredAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub node_id: NodeId,
    pub alerts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub total_nodes: usize,
    pub active: usize,
    pub suspect: usize,
    pub failed: usize,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_disk: f64,
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: BTreeMap<String, Vec<NodeId>>,
    pub role_count: BTreeMap<String, usize>,
    pub status_count: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub failed: usize,
    pub node_ids: Vec<NodeId>,
}

#[derive(Debug)]
pub struct ClusterMonitor {
    nodes: HashMap<NodeId, Node>,
    alerts: VecDeque<Alert>,
    alert_count: u64,
    alert_threshold: f64,
    scaling_rules: Vec<ScalingRule>,
    clock: SharedClock,
}

impl ClusterMonitor {
    pub fn new(alert_threshold: f64, clock: SharedClock) -> Self {
        Self {
            nodes: HashMap::new(),
            alerts: VecDeque::new(),
            alert_count: 0,
            alert_threshold,
            scaling_rules: Vec::new(),
            clock,
        }
    }

    pub fn register_node(
        &mut self,
        node_id: impl Into<NodeId>,
        host: impl Into<String>,
        port: u16,
        role: NodeRole,
    ) -> Node {
        let node = Node::new(node_id, host, port, role, self.clock.now());
        info!(node_id = %node.id, host = %node.host, role = %node.role, "Registered node with monitor");
        self.nodes.insert(node.id.clone(), node.clone());
        node
    }

    pub fn remove_node(&mut self, node_id: &str) -> bool {
        self.nodes.remove(node_id).is_some()
    }

    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn active_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_active()).count()
    }

    pub fn alert_count(&self) -> u64 {
        self.alert_count
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }

    /// Refresh last-seen without touching metrics.
    pub fn touch(&mut self, node_id: &str) -> bool {
        let now = self.clock.now();
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.last_seen = now;
                true
            }
            None => false,
        }
    }

    fn raise(&mut self, alert: Alert) {
        self.alert_count += 1;
        self.alerts.push_back(alert);
        while self.alerts.len() > MAX_RETAINED_ALERTS {
            self.alerts.pop_front();
        }
    }

    /// Record utilisation for a node; every dimension above the threshold raises an alert.
    pub fn update_metrics(&mut self, node_id: &str, cpu: f64, memory: f64, disk: f64) -> Result<MetricsUpdate> {
        let now = self.clock.now();
        let threshold = self.alert_threshold;
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoordinationError::NodeNotFound(node_id.to_string()))?;

        node.metrics = NodeMetrics { cpu, memory, disk };
        node.last_seen = now;
        let metrics = node.metrics;

        let mut raised = 0;
        for metric in [Metric::Cpu, Metric::Memory, Metric::Disk] {
            let value = metric.read(&metrics);
            if value > threshold {
                warn!(node_id = %node_id, metric = ?metric, value = value, threshold = threshold, "Resource threshold exceeded");
                self.raise(Alert {
                    node_id: node_id.to_string(),
                    kind: AlertKind::Threshold,
                    metric: Some(metric),
                    value,
                    threshold,
                    message: format!("{:?} at {:.2} exceeds {:.2}", metric, value, threshold),
                    raised_at: chrono::Utc::now(),
                });
                raised += 1;
            }
        }

        debug!(node_id = %node_id, cpu = cpu, memory = memory, disk = disk, "Metrics updated");
        Ok(MetricsUpdate {
            node_id: node_id.to_string(),
            alerts: raised,
        })
    }

    fn average(&self, metric: Metric) -> f64 {
        let active: Vec<&Node> = self.nodes.values().filter(|n| n.is_active()).collect();
        if active.is_empty() {
            return 0.0;
        }
        active.iter().map(|n| metric.read(&n.metrics)).sum::<f64>() / active.len() as f64
    }

    pub fn check_health(&self) -> ClusterHealth {
        let count = |status: NodeStatus| self.nodes.values().filter(|n| n.status == status).count();
        let total = self.nodes.len();
        let active = count(NodeStatus::Active);

        ClusterHealth {
            total_nodes: total,
            active,
            suspect: count(NodeStatus::Suspect),
            failed: count(NodeStatus::Failed),
            avg_cpu: self.average(Metric::Cpu),
            avg_memory: self.average(Metric::Memory),
            avg_disk: self.average(Metric::Disk),
            healthy: total > 0 && active * 2 > total,
        }
    }

    pub fn get_topology(&self) -> Topology {
        let mut nodes: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        let mut role_count = BTreeMap::new();
        let mut status_count = BTreeMap::new();

        for node in self.nodes.values() {
            nodes
                .entry(node.role.to_string())
                .or_default()
                .push(node.id.clone());
            *role_count.entry(node.role.to_string()).or_insert(0) += 1;
            *status_count.entry(node.status.to_string()).or_insert(0) += 1;
        }
        for ids in nodes.values_mut() {
            ids.sort();
        }

        Topology {
            nodes,
            role_count,
            status_count,
        }
    }

    /// Mark every node silent for longer than `timeout` as failed.
    pub fn detect_failures(&mut self, timeout: Duration) -> FailureReport {
        let now = self.clock.now();
        let mut node_ids: Vec<NodeId> = self
            .nodes
            .values_mut()
            .filter(|n| n.status != NodeStatus::Failed)
            .filter(|n| now.saturating_duration_since(n.last_seen) > timeout)
            .map(|n| {
                n.status = NodeStatus::Failed;
                n.id.clone()
            })
            .collect();
        node_ids.sort();

        for node_id in &node_ids {
            error!(node_id = %node_id, timeout_secs = timeout.as_secs(), "Node failure detected");
            self.raise(Alert {
                node_id: node_id.clone(),
                kind: AlertKind::NodeFailure,
                metric: None,
                value: 0.0,
                threshold: timeout.as_secs_f64(),
                message: format!("no contact for more than {:?}", timeout),
                raised_at: chrono::Utc::now(),
            });
        }

        FailureReport {
            failed: node_ids.len(),
            node_ids,
        }
    }

    pub fn add_scaling_rule(&mut self, metric: Metric, threshold: f64, action: ScalingAction) -> ScalingRule {
        let rule = ScalingRule {
            metric,
            threshold,
            action,
        };
        self.scaling_rules.push(rule.clone());
        rule
    }

    /// Compare each rule against the average over active nodes.
    pub fn evaluate_scaling(&self) -> ScalingEvaluation {
        let actions: Vec<TriggeredAction> = self
            .scaling_rules
            .iter()
            .filter_map(|rule| {
                let value = self.average(rule.metric);
                let fires = match rule.action {
                    ScalingAction::ScaleUp => value > rule.threshold,
                    ScalingAction::ScaleDown => value < rule.threshold,
                };
                fires.then(|| TriggeredAction {
                    metric: rule.metric,
                    value,
                    threshold: rule.threshold,
                    action: rule.action,
                })
            })
            .collect();

        if !actions.is_empty() {
            info!(triggered = actions.len(), "Scaling rules triggered");
        }

        ScalingEvaluation {
            triggered: actions.len(),
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::infrastructure::ManualClock;
    use std::sync::Arc;

    fn monitor(clock: &ManualClock, threshold: f64) -> ClusterMonitor {
        ClusterMonitor::new(threshold, Arc::new(clock.clone()))
    }

    #[test]
    fn test_register_and_remove() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.8);
        cm.register_node("n1", "h1", 8000, NodeRole::Master);
        assert_eq!(cm.node_count(), 1);
        assert!(cm.remove_node("n1"));
        assert!(!cm.remove_node("n1"));
        assert_eq!(cm.node_count(), 0);
    }

    #[test]
    fn test_update_metrics_below_threshold() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.8);
        cm.register_node("n1", "h1", 8000, NodeRole::Worker);
        let update = cm.update_metrics("n1", 0.5, 0.6, 0.3).unwrap();
        assert_eq!(update.alerts, 0);
        assert_eq!(cm.alert_count(), 0);
    }

    #[test]
    fn test_update_metrics_raises_alert_per_dimension() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.7);
        cm.register_node("n1", "h1", 8000, NodeRole::Worker);
        let update = cm.update_metrics("n1", 0.9, 0.9, 0.9).unwrap();
        assert_eq!(update.alerts, 3);
        assert_eq!(cm.alert_count(), 3);
        assert_eq!(cm.recent_alerts(1)[0].metric, Some(Metric::Disk));
    }

    #[test]
    fn test_update_metrics_unknown_node() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.8);
        let err = cm.update_metrics("x", 0.5, 0.5, 0.5).unwrap_err();
        assert_eq!(err, CoordinationError::NodeNotFound("x".to_string()));
    }

    #[test]
    fn test_check_health() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.8);
        cm.register_node("n1", "h1", 8000, NodeRole::Worker);
        cm.register_node("n2", "h2", 8000, NodeRole::Worker);
        cm.update_metrics("n1", 0.2, 0.4, 0.6).unwrap();
        cm.update_metrics("n2", 0.4, 0.4, 0.2).unwrap();

        let health = cm.check_health();
        assert_eq!(health.total_nodes, 2);
        assert_eq!(health.active, 2);
        assert!(health.healthy);
        assert!((health.avg_cpu - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_topology_counts_roles() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.8);
        cm.register_node("n1", "h", 1, NodeRole::Master);
        cm.register_node("n2", "h", 2, NodeRole::Worker);
        cm.register_node("n3", "h", 3, NodeRole::Worker);

        let topology = cm.get_topology();
        assert_eq!(topology.role_count["master"], 1);
        assert_eq!(topology.role_count["worker"], 2);
        assert_eq!(topology.nodes["worker"], vec!["n2".to_string(), "n3".to_string()]);
        assert_eq!(topology.status_count["active"], 3);
    }

    #[test]
    fn test_detect_failures_after_timeout() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.8);
        cm.register_node("n1", "h", 1, NodeRole::Worker);
        cm.register_node("n2", "h", 2, NodeRole::Worker);

        clock.advance(Duration::from_secs(120));
        cm.touch("n2");

        let report = cm.detect_failures(Duration::from_secs(60));
        assert_eq!(report.failed, 1);
        assert_eq!(report.node_ids, vec!["n1".to_string()]);
        assert_eq!(cm.get_node("n1").unwrap().status, NodeStatus::Failed);
        assert_eq!(cm.alert_count(), 1);

        // already-failed nodes are not reported twice
        clock.advance(Duration::from_secs(120));
        let report = cm.detect_failures(Duration::from_secs(60));
        assert_eq!(report.node_ids, vec!["n2".to_string()]);
    }

    #[test]
    fn test_evaluate_scaling() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.95);
        cm.register_node("n1", "h", 1, NodeRole::Worker);
        cm.update_metrics("n1", 0.9, 0.5, 0.3).unwrap();
        let rule = cm.add_scaling_rule(Metric::Cpu, 0.8, ScalingAction::ScaleUp);
        assert_eq!(rule.metric, Metric::Cpu);
        cm.add_scaling_rule(Metric::Memory, 0.2, ScalingAction::ScaleDown);

        let evaluation = cm.evaluate_scaling();
        assert_eq!(evaluation.triggered, 1);
        assert_eq!(evaluation.actions[0].action, ScalingAction::ScaleUp);
    }

    #[test]
    fn test_evaluate_scaling_no_trigger() {
        let clock = ManualClock::new();
        let mut cm = monitor(&clock, 0.8);
        cm.register_node("n1", "h", 1, NodeRole::Worker);
        cm.update_metrics("n1", 0.3, 0.3, 0.3).unwrap();
        cm.add_scaling_rule(Metric::Cpu, 0.8, ScalingAction::ScaleUp);
        assert_eq!(cm.evaluate_scaling().triggered, 0);
    }
}
