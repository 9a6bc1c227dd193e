//! Per-resource mutual exclusion with TTL leases, FIFO waiters and deadlock detection
//!
//! At most one owner holds a resource at any instant. Expired leases are swept
//! before every acquisition, and freeing a lock hands it to the head of the
//! resource's waiter queue.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::infrastructure::{SharedClock, SharedIdGenerator};
use crate::error::{CoordinationError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    pub lock_id: String,
    pub resource: String,
    pub owner: String,
    pub ttl: Duration,
    #[serde(skip)]
    pub acquired_at: Instant,
    pub reentry_count: u32,
}

impl LockInfo {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.acquired_at) > self.ttl
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcquireOutcome {
    Acquired {
        lock_id: String,
        resource: String,
        owner: String,
        reentrant: bool,
        reentry_count: u32,
    },
    /// The resource is held by someone else; the caller is queued at `position` (1-based).
    Queued {
        resource: String,
        held_by: String,
        position: usize,
    },
    /// The caller already holds the lock and did not ask for reentrancy.
    AlreadyHeld {
        lock_id: String,
        resource: String,
        owner: String,
    },
}

impl AcquireOutcome {
    pub fn acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }

    pub fn holder(&self) -> &str {
        match self {
            AcquireOutcome::Acquired { owner, .. } => owner,
            AcquireOutcome::Queued { held_by, .. } => held_by,
            AcquireOutcome::AlreadyHeld { owner, .. } => owner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released {
        resource: String,
        next_owner: Option<String>,
    },
    /// A reentrant holder released one level but still holds the lock.
    ReentrantPending { resource: String, remaining: u32 },
}

impl ReleaseOutcome {
    pub fn released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredLock {
    pub resource: String,
    pub owner: String,
    pub promoted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub deadlock_detected: bool,
    pub cycles: Vec<Vec<String>>,
}

#[derive(Debug)]
pub struct DistributedLock {
    locks: HashMap<String, LockInfo>,
    waiters: HashMap<String, VecDeque<String>>,
    default_ttl: Duration,
    clock: SharedClock,
    ids: SharedIdGenerator,
}

impl DistributedLock {
    pub fn new(default_ttl: Duration, clock: SharedClock, ids: SharedIdGenerator) -> Self {
        Self {
            locks: HashMap::new(),
            waiters: HashMap::new(),
            default_ttl,
            clock,
            ids,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.values().map(VecDeque::len).sum()
    }

    pub fn waiters(&self, resource: &str) -> Vec<String> {
        self.waiters
            .get(resource)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_lock_info(&self, resource: &str) -> Option<&LockInfo> {
        self.locks.get(resource)
    }

    fn grant(&mut self, resource: &str, owner: &str, ttl: Duration) -> &LockInfo {
        let lock = LockInfo {
            lock_id: self.ids.next_id(),
            resource: resource.to_string(),
            owner: owner.to_string(),
            ttl,
            acquired_at: self.clock.now(),
            reentry_count: 1,
        };
        self.locks.insert(resource.to_string(), lock);
        &self.locks[resource]
    }

    /// Hand a freed resource to the head of its waiter queue.
    fn promote_next(&mut self, resource: &str) -> Option<String> {
        let next = self.waiters.get_mut(resource).and_then(VecDeque::pop_front);
        if self.waiters.get(resource).is_some_and(VecDeque::is_empty) {
            self.waiters.remove(resource);
        }

        if let Some(owner) = &next {
            let ttl = self.default_ttl;
            self.grant(resource, owner, ttl);
            info!(resource = %resource, owner = %owner, "Lock handed to next waiter");
        }
        next
    }

    /// Drop every lease past its TTL, promoting waiters where present.
    pub fn sweep_expired(&mut self) -> Vec<ExpiredLock> {
        let now = self.clock.now();
        let mut expired: Vec<(String, String)> = self
            .locks
            .values()
            .filter(|lock| lock.is_expired(now))
            .map(|lock| (lock.resource.clone(), lock.owner.clone()))
            .collect();
        expired.sort();

        expired
            .into_iter()
            .map(|(resource, owner)| {
                self.locks.remove(&resource);
                warn!(resource = %resource, owner = %owner, "Lock lease expired");
                let promoted = self.promote_next(&resource);
                ExpiredLock {
                    resource,
                    owner,
                    promoted,
                }
            })
            .collect()
    }

    /// Try to take `resource` for `owner`.
    ///
    /// A reentrant request from the current holder deepens the hold; any other
    /// contender is appended (once) to the FIFO waiter queue.
    pub fn acquire(&mut self, resource: &str, owner: &str, ttl: Duration, reentrant: bool) -> AcquireOutcome {
        self.sweep_expired();
        let now = self.clock.now();

        let Some(lock) = self.locks.get_mut(resource) else {
            let lock = self.grant(resource, owner, ttl);
            debug!(resource = %resource, owner = %owner, lock_id = %lock.lock_id, "Lock acquired");
            return AcquireOutcome::Acquired {
                lock_id: lock.lock_id.clone(),
                resource: resource.to_string(),
                owner: owner.to_string(),
                reentrant: false,
                reentry_count: 1,
            };
        };

        if lock.owner == owner && reentrant {
            lock.reentry_count += 1;
            lock.acquired_at = now;
            lock.ttl = ttl;
            debug!(resource = %resource, owner = %owner, reentry_count = lock.reentry_count, "Reentrant lock acquired");
            return AcquireOutcome::Acquired {
                lock_id: lock.lock_id.clone(),
                resource: resource.to_string(),
                owner: owner.to_string(),
                reentrant: true,
                reentry_count: lock.reentry_count,
            };
        }

        if lock.owner == owner {
            // the holder never waits on itself
            debug!(resource = %resource, owner = %owner, "Non-reentrant acquire by current holder");
            return AcquireOutcome::AlreadyHeld {
                lock_id: lock.lock_id.clone(),
                resource: resource.to_string(),
                owner: owner.to_string(),
            };
        }

        let held_by = lock.owner.clone();

        let queue = self.waiters.entry(resource.to_string()).or_default();
        let position = match queue.iter().position(|w| w == owner) {
            Some(index) => index + 1,
            None => {
                queue.push_back(owner.to_string());
                queue.len()
            }
        };

        debug!(resource = %resource, owner = %owner, held_by = %held_by, position = position, "Lock busy, owner queued");
        AcquireOutcome::Queued {
            resource: resource.to_string(),
            held_by,
            position,
        }
    }

    pub fn release(&mut self, resource: &str, owner: &str) -> Result<ReleaseOutcome> {
        let lock = self
            .locks
            .get_mut(resource)
            .ok_or_else(|| CoordinationError::NotLocked(resource.to_string()))?;

        if lock.owner != owner {
            return Err(CoordinationError::NotOwner {
                resource: resource.to_string(),
                holder: lock.owner.clone(),
                requester: owner.to_string(),
            });
        }

        if lock.reentry_count > 1 {
            lock.reentry_count -= 1;
            return Ok(ReleaseOutcome::ReentrantPending {
                resource: resource.to_string(),
                remaining: lock.reentry_count,
            });
        }

        self.locks.remove(resource);
        debug!(resource = %resource, owner = %owner, "Lock released");
        let next_owner = self.promote_next(resource);

        Ok(ReleaseOutcome::Released {
            resource: resource.to_string(),
            next_owner,
        })
    }

    /// Operator override: drop the lock regardless of owner, then promote the next waiter.
    pub fn force_release(&mut self, resource: &str) -> bool {
        match self.locks.remove(resource) {
            Some(lock) => {
                warn!(resource = %resource, owner = %lock.owner, "Lock force-released");
                self.promote_next(resource);
                true
            }
            None => false,
        }
    }

    /// Drop `owner` from every waiter queue, e.g. when its node leaves.
    pub fn cancel_waits(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for queue in self.waiters.values_mut() {
            let before = queue.len();
            queue.retain(|w| w != owner);
            removed += before - queue.len();
        }
        self.waiters.retain(|_, q| !q.is_empty());
        removed
    }

    /// Build the wait-for graph (waiter → holder) and report its cycles.
    ///
    /// Detection only; nothing is released.
    pub fn detect_deadlock(&self) -> DeadlockReport {
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (resource, queue) in &self.waiters {
            let Some(lock) = self.locks.get(resource) else {
                continue;
            };
            for waiter in queue {
                graph
                    .entry(waiter.clone())
                    .or_default()
                    .insert(lock.owner.clone());
            }
        }

        let mut cycles = BTreeSet::new();
        for start in graph.keys() {
            let mut path = vec![start.clone()];
            walk_wait_for(&graph, start, &mut path, &mut cycles);
        }

        if !cycles.is_empty() {
            warn!(cycles = cycles.len(), "Deadlock detected in wait-for graph");
        }

        DeadlockReport {
            deadlock_detected: !cycles.is_empty(),
            cycles: cycles.into_iter().collect(),
        }
    }
}

fn walk_wait_for(
    graph: &BTreeMap<String, BTreeSet<String>>,
    node: &str,
    path: &mut Vec<String>,
    cycles: &mut BTreeSet<Vec<String>>,
) {
    let Some(next_hops) = graph.get(node) else {
        return;
    };
    for next in next_hops {
        if let Some(start) = path.iter().position(|p| p == next) {
            cycles.insert(canonical_cycle(&path[start..]));
        } else {
            path.push(next.clone());
            walk_wait_for(graph, next, path, cycles);
            path.pop();
        }
    }
}

/// Rotate a cycle so it starts at its smallest member.
fn canonical_cycle(cycle: &[String]) -> Vec<String> {
    let pivot = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[pivot..].iter().chain(cycle[..pivot].iter()).cloned().collect()
}
