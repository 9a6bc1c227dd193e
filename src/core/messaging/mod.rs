pub mod distributed_queue;

pub use distributed_queue::{
    DistributedQueue, EnqueueOutcome, NackOutcome, QueueStats, QueuedMessage, RetryReport, DEFAULT_PRIORITY,
};
