//! Non-blocking, drop-on-full observability bus.
//!
//! Grounded on `events::bus::EventBus`, which used a
//! `tokio::sync::broadcast` channel. Broadcast channels lag (a slow
//! consumer loses its oldest messages and is told how many it missed) —
//! the opposite of what is needed here: a producer must never block, and
//! drops must be silent to the producer and merely counted for the
//! consumer to see. A bounded `mpsc` with `try_send` gives exactly that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::types::Event;

/// Default channel capacity. Generous enough that a burst of step/tool
/// events during a single agent invocation does not spuriously drop.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Producer handle. Cloneable; every clone shares the same bounded queue
/// and the same drop counter.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// Consumer handle. Not cloneable — a bus has exactly one consumer,
/// matching the spec's "the loop owns the stream-events channel" rule.
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            EventReceiver { rx },
        )
    }

    pub fn with_default_capacity() -> (Self, EventReceiver) {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Emit an event. Never blocks; silently drops (and counts the drop)
    /// when the consumer is slow or has been dropped entirely.
    pub fn emit(&self, event: Event) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped since bus creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventReceiver {
    /// Pull the next event, or `None` once every producer has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drain whatever is currently queued without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}
