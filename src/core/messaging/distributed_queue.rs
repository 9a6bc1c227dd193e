//! Named priority queues with at-least-once delivery
//!
//! Lower priority numbers are more urgent. Messages with equal priority keep their
//! enqueue order. Delivery moves a message in flight until it is acked, nacked or
//! reclaimed after the visibility timeout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::infrastructure::{SharedClock, SharedIdGenerator};
use crate::error::{CoordinationError, Result};

pub const DEFAULT_PRIORITY: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub message_id: String,
    pub queue: String,
    pub data: serde_json::Value,
    pub priority: u32,
    pub dedup_id: Option<String>,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct InFlight {
    message: QueuedMessage,
    delivered_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// `position` is 1-based within the queue at insertion time.
    Enqueued {
        message_id: String,
        queue: String,
        position: usize,
    },
    Duplicate { dedup_id: String },
}

impl EnqueueOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NackOutcome {
    Requeued { message_id: String, retry_count: u32 },
    DeadLettered { message_id: String, retry_count: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    pub retried: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub acked: u64,
    pub nacked: u64,
    pub dead_lettered: u64,
    pub duplicates: u64,
    pub reclaimed: u64,
    pub queues: usize,
    pub depth: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
}

#[derive(Debug)]
pub struct DistributedQueue {
    queues: BTreeMap<String, VecDeque<QueuedMessage>>,
    in_flight: HashMap<String, InFlight>,
    dead_letters: Vec<QueuedMessage>,
    processed: HashSet<String>,
    max_retries: u32,
    stats: QueueStats,
    clock: SharedClock,
    ids: SharedIdGenerator,
}

impl DistributedQueue {
    pub fn new(max_retries: u32, clock: SharedClock, ids: SharedIdGenerator) -> Self {
        Self {
            queues: BTreeMap::new(),
            in_flight: HashMap::new(),
            dead_letters: Vec::new(),
            processed: HashSet::new(),
            max_retries,
            stats: QueueStats::default(),
            clock,
            ids,
        }
    }

    /// Returns `false` if the queue already existed.
    pub fn create_queue(&mut self, name: &str) -> bool {
        if self.queues.contains_key(name) {
            return false;
        }
        debug!(queue = %name, "Queue created");
        self.queues.insert(name.to_string(), VecDeque::new());
        true
    }

    /// Stable insertion: after every message of equal or more urgent priority.
    fn insert_sorted(queue: &mut VecDeque<QueuedMessage>, message: QueuedMessage) -> usize {
        let index = queue
            .iter()
            .position(|m| m.priority > message.priority)
            .unwrap_or(queue.len());
        queue.insert(index, message);
        index + 1
    }

    pub fn enqueue(
        &mut self,
        queue: &str,
        data: serde_json::Value,
        priority: Option<u32>,
        dedup_id: Option<String>,
    ) -> EnqueueOutcome {
        if let Some(dedup_id) = dedup_id.as_ref().filter(|d| self.processed.contains(*d)) {
            self.stats.duplicates += 1;
            debug!(queue = %queue, dedup_id = %dedup_id, "Duplicate message rejected");
            return EnqueueOutcome::Duplicate {
                dedup_id: dedup_id.clone(),
            };
        }

        let message = QueuedMessage {
            message_id: self.ids.next_id(),
            queue: queue.to_string(),
            data,
            priority: priority.unwrap_or(DEFAULT_PRIORITY),
            dedup_id,
            retry_count: 0,
            enqueued_at: Utc::now(),
        };
        let message_id = message.message_id.clone();
        let position = Self::insert_sorted(self.queues.entry(queue.to_string()).or_default(), message);
        self.stats.enqueued += 1;

        debug!(queue = %queue, message_id = %message_id, position = position, "Message enqueued");
        EnqueueOutcome::Enqueued {
            message_id,
            queue: queue.to_string(),
            position,
        }
    }

    /// Pop the most urgent message and hold it in flight until acked.
    pub fn dequeue(&mut self, queue: &str) -> Option<QueuedMessage> {
        let message = self.queues.get_mut(queue)?.pop_front()?;
        self.in_flight.insert(
            message.message_id.clone(),
            InFlight {
                message: message.clone(),
                delivered_at: self.clock.now(),
            },
        );
        self.stats.dequeued += 1;
        Some(message)
    }

    pub fn peek(&self, queue: &str) -> Option<&QueuedMessage> {
        self.queues.get(queue)?.front()
    }

    pub fn ack(&mut self, message_id: &str) -> bool {
        let Some(entry) = self.in_flight.remove(message_id) else {
            return false;
        };
        if let Some(dedup_id) = entry.message.dedup_id {
            self.processed.insert(dedup_id);
        }
        self.stats.acked += 1;
        debug!(message_id = %message_id, "Message acknowledged");
        true
    }

    /// Return a delivered message; it is dead-lettered once its retries reach the limit.
    pub fn nack(&mut self, message_id: &str) -> Result<NackOutcome> {
        let InFlight { mut message, .. } = self
            .in_flight
            .remove(message_id)
            .ok_or_else(|| CoordinationError::MessageNotInFlight(message_id.to_string()))?;

        self.stats.nacked += 1;
        message.retry_count += 1;
        let retry_count = message.retry_count;

        if retry_count >= self.max_retries {
            warn!(
                message_id = %message_id,
                queue = %message.queue,
                retry_count = retry_count,
                "☠️ Message moved to dead-letter list"
            );
            self.dead_letters.push(message);
            self.stats.dead_lettered += 1;
            return Ok(NackOutcome::DeadLettered {
                message_id: message_id.to_string(),
                retry_count,
            });
        }

        let queue = self.queues.entry(message.queue.clone()).or_default();
        Self::insert_sorted(queue, message);
        Ok(NackOutcome::Requeued {
            message_id: message_id.to_string(),
            retry_count,
        })
    }

    /// Reinsert dead letters (optionally only those of `queue`) with a fresh retry budget.
    pub fn retry_dead_letters(&mut self, queue: Option<&str>) -> RetryReport {
        let (selected, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut self.dead_letters)
            .into_iter()
            .partition(|m| queue.map_or(true, |q| m.queue == q));
        self.dead_letters = remaining;

        let retried = selected.len();
        for mut message in selected {
            message.retry_count = 0;
            let target = self.queues.entry(message.queue.clone()).or_default();
            Self::insert_sorted(target, message);
        }

        if retried > 0 {
            info!(retried = retried, queue = ?queue, "Dead letters requeued");
        }
        RetryReport {
            retried,
            remaining: self.dead_letters.len(),
        }
    }

    /// Return in-flight messages older than `visibility_timeout` to their queues.
    pub fn reclaim_expired(&mut self, visibility_timeout: Duration) -> Vec<String> {
        let now = self.clock.now();
        let mut expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.delivered_at) > visibility_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();

        for message_id in &expired {
            if let Some(entry) = self.in_flight.remove(message_id) {
                let queue = self.queues.entry(entry.message.queue.clone()).or_default();
                Self::insert_sorted(queue, entry.message);
                self.stats.reclaimed += 1;
            }
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "In-flight messages reclaimed after visibility timeout");
        }
        expired
    }

    pub fn get_queue_depth(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn purge_queue(&mut self, queue: &str) -> usize {
        let purged = self.queues.get_mut(queue).map_or(0, |q| q.drain(..).count());
        if purged > 0 {
            info!(queue = %queue, purged = purged, "Queue purged");
        }
        purged
    }

    pub fn total_depth(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.len()
    }

    pub fn dead_letters(&self) -> &[QueuedMessage] {
        &self.dead_letters
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queues: self.queue_count(),
            depth: self.total_depth(),
            in_flight: self.in_flight_count(),
            dead_letters: self.dead_letter_count(),
            ..self.stats.clone()
        }
    }
}
