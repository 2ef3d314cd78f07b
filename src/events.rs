//! Typed event fan-out shared by the fragment engine and the queue manager.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Receiving half handed out by [`EventBus::subscribe`].
pub type EventReceiver<E> = mpsc::UnboundedReceiver<E>;

/// Event bus with named, typed variants instead of string-keyed callbacks.
///
/// `emit()` is synchronous: every live subscriber gets its own clone of the
/// event before `emit()` returns. Delivery is lossless; subscribers whose
/// receiver has been dropped are pruned on the next emit.
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventBus<E> {
    /// Create an event bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> EventReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every subscriber.
    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}
