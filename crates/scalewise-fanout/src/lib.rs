//! scalewise-fanout: push scaling events to connected observers.
//!
//! The `ConnectionRegistry` tracks every live observer and delivers each
//! broadcast to all of them concurrently. Observers that fail or stall
//! past the send timeout are evicted; the rest still receive the event.
//!
//! Wire frames are JSON objects tagged by `"type"` (see [`frame`]).

pub mod frame;
pub mod registry;

pub use frame::{ClientFrame, EventType, ServerFrame, reply_for};
pub use registry::{BroadcastReport, ConnectionId, ConnectionRegistry, Observer};
