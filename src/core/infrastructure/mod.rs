//! Injected collaborators: clock and id generation.

pub mod clock;
pub mod ids;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use ids::{uuid_generator, IdGenerator, SequentialIdGenerator, SharedIdGenerator, UuidGenerator};
