//! Service registry with health tracking and client-side load balancing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::infrastructure::SharedClock;
use crate::error::{CoordinationError, Result};

/// Missed health intervals before a service is considered stale
const STALE_INTERVALS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    RoundRobin,
    Random,
}

impl FromStr for LoadBalanceStrategy {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "round_robin" | "round-robin" => Ok(LoadBalanceStrategy::RoundRobin),
            "random" => Ok(LoadBalanceStrategy::Random),
            other => Err(CoordinationError::InvalidConfig(format!(
                "unknown load balancing strategy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRecord {
    pub service_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub status: ServiceStatus,
    #[serde(skip)]
    pub last_seen: Instant,
}

impl ServiceRecord {
    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// Registration request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Filter for [`ServiceDiscovery::discover`]; every tag must be present on a match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuery {
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub healthy_only: bool,
}

impl ServiceQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    fn matches(&self, record: &ServiceRecord) -> bool {
        self.name.as_ref().map_or(true, |n| &record.name == n)
            && self.tags.iter().all(|t| record.tags.contains(t))
            && (!self.healthy_only || record.is_healthy())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckOutcome {
    pub service_id: String,
    pub status: ServiceStatus,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    pub service_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug)]
pub struct ServiceDiscovery {
    services: BTreeMap<String, ServiceRecord>,
    counters: HashMap<String, usize>,
    health_interval: Duration,
    clock: SharedClock,
    rng: StdRng,
}

impl ServiceDiscovery {
    pub fn new(health_interval: Duration, clock: SharedClock, rng: StdRng) -> Self {
        Self {
            services: BTreeMap::new(),
            counters: HashMap::new(),
            health_interval,
            clock,
            rng,
        }
    }

    pub fn with_seed(health_interval: Duration, clock: SharedClock, seed: u64) -> Self {
        Self::new(health_interval, clock, StdRng::seed_from_u64(seed))
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn healthy_count(&self) -> usize {
        self.services.values().filter(|s| s.is_healthy()).count()
    }

    pub fn get_service(&self, service_id: &str) -> Option<&ServiceRecord> {
        self.services.get(service_id)
    }

    /// Register or refresh a service; a re-registered service is healthy again.
    pub fn register(&mut self, registration: ServiceRegistration) -> &ServiceRecord {
        let now = self.clock.now();
        info!(
            service_id = %registration.service_id,
            name = %registration.name,
            host = %registration.host,
            port = registration.port,
            "🔎 Service registered"
        );
        let service_id = registration.service_id;
        let record = ServiceRecord {
            service_id: service_id.clone(),
            name: registration.name,
            host: registration.host,
            port: registration.port,
            tags: registration.tags,
            status: ServiceStatus::Healthy,
            last_seen: now,
        };
        self.services.insert(service_id.clone(), record);
        &self.services[&service_id]
    }

    pub fn deregister(&mut self, service_id: &str) -> bool {
        let removed = self.services.remove(service_id).is_some();
        if removed {
            info!(service_id = %service_id, "Service deregistered");
        }
        removed
    }

    pub fn discover(&self, query: &ServiceQuery) -> Vec<ServiceRecord> {
        self.services
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect()
    }

    /// Record a health check result. A check counts as a sighting.
    pub fn health_check(&mut self, service_id: &str, healthy: bool) -> Result<HealthCheckOutcome> {
        let now = self.clock.now();
        let record = self
            .services
            .get_mut(service_id)
            .ok_or_else(|| CoordinationError::ServiceNotFound(service_id.to_string()))?;

        let status = if healthy {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };
        let changed = record.status != status;
        record.status = status;
        record.last_seen = now;

        if changed {
            warn!(service_id = %service_id, status = ?status, "Service health changed");
        }
        Ok(HealthCheckOutcome {
            service_id: service_id.to_string(),
            status,
            changed,
        })
    }

    /// Pick one healthy instance of `name`; `None` when no instance is healthy.
    pub fn load_balance(&mut self, name: &str, strategy: LoadBalanceStrategy) -> Option<ServiceRecord> {
        let healthy: Vec<&ServiceRecord> = self
            .services
            .values()
            .filter(|s| s.name == name && s.is_healthy())
            .collect();
        if healthy.is_empty() {
            return None;
        }

        let index = match strategy {
            LoadBalanceStrategy::RoundRobin => {
                let counter = self.counters.entry(name.to_string()).or_insert(0);
                let index = *counter % healthy.len();
                *counter = counter.wrapping_add(1);
                index
            }
            LoadBalanceStrategy::Random => self.rng.gen_range(0..healthy.len()),
        };

        let chosen = healthy[index].clone();
        debug!(name = %name, service_id = %chosen.service_id, strategy = ?strategy, "Instance selected");
        Some(chosen)
    }

    pub fn resolve_dns(&self, name: &str) -> Vec<DnsRecord> {
        self.services
            .values()
            .filter(|s| s.name == name && s.is_healthy())
            .map(|s| DnsRecord {
                name: s.name.clone(),
                service_id: s.service_id.clone(),
                host: s.host.clone(),
                port: s.port,
            })
            .collect()
    }

    /// Mark healthy services unseen for three health intervals as unhealthy.
    pub fn check_stale_services(&mut self) -> Vec<String> {
        let now = self.clock.now();
        let limit = self.health_interval * STALE_INTERVALS;
        let mut stale = Vec::new();

        for record in self.services.values_mut() {
            if record.is_healthy() && now.saturating_duration_since(record.last_seen) > limit {
                record.status = ServiceStatus::Unhealthy;
                warn!(service_id = %record.service_id, "Service marked stale");
                stale.push(record.service_id.clone());
            }
        }
        stale
    }
}
