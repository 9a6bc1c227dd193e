//! Cross-cutting patterns shared by the coordination components.

pub mod events;

pub use events::{CoordinationEvent, EventBus, EventKind, EventPublisher};
