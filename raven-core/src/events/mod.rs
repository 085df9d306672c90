//! Observability event bus: non-blocking emission, drop-on-full.
//!
//! Every component that does meaningful work (the workflow engine, the
//! implementation loop, the review fan-out, the PRD pipeline) takes an
//! optional [`EventBus`] handle and emits [`Event`]s describing its
//! progress. Emission never blocks the caller; a slow or absent consumer
//! only ever causes drops, counted via [`EventBus::dropped_count`].

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventReceiver};
pub use types::{Event, EventKind};
