//! Event subscriber lists.
//!
//! A [`Signal`] holds the handlers connected to one event. Connecting returns
//! a [`Connection`] token; handlers that need to detach themselves (or a
//! sibling subscription) keep the token and call [`Connection::disconnect`].
//!
//! Dropping a `Connection` does not disconnect the handler.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

impl<T> Slots<T> {
    fn contains(&self, id: u64) -> bool {
        self.handlers.iter().any(|(slot, _)| *slot == id)
    }
}

/// Type-erased removal, so `Connection` does not carry the event type.
trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<T: 'static> Detach for Mutex<Slots<T>> {
    fn detach(&self, id: u64) -> bool {
        let mut slots = self.lock();
        let before = slots.handlers.len();
        slots.handlers.retain(|(slot, _)| *slot != id);
        slots.handlers.len() != before
    }
}

/// Subscriber list for one event.
pub struct Signal<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Connect a handler. It stays connected until the returned token is
    /// used to disconnect it or the signal is dropped.
    pub fn connect<F>(&self, handler: F) -> Connection
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.handlers.push((id, Arc::new(handler)));
            id
        };

        let slots: Weak<dyn Detach> = Arc::downgrade(&self.slots) as Weak<dyn Detach>;
        Connection {
            id,
            slots,
            live: AtomicBool::new(true),
        }
    }

    /// Invoke every connected handler with `value`.
    ///
    /// Handlers run without the subscriber lock held, so they may connect or
    /// disconnect freely. A handler disconnected by an earlier handler during
    /// the same emission is skipped.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(u64, Handler<T>)> = self.slots.lock().handlers.clone();

        for (id, handler) in snapshot {
            if !self.slots.lock().contains(id) {
                continue;
            }
            handler(value);
        }
    }

    /// Number of currently connected handlers.
    pub fn connection_count(&self) -> usize {
        self.slots.lock().handlers.len()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.slots.lock().handlers.len())
            .finish()
    }
}

/// Cancellation token for one connected handler.
pub struct Connection {
    id: u64,
    slots: Weak<dyn Detach>,
    live: AtomicBool,
}

impl Connection {
    /// Disconnect the handler.
    ///
    /// Returns `true` only for the call that actually removed it; repeated
    /// calls, or calls after the signal was dropped, return `false`.
    pub fn disconnect(&self) -> bool {
        if !self.live.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.slots
            .upgrade()
            .map_or(false, |slots| slots.detach(self.id))
    }

    /// Whether the handler is still connected to a live signal.
    pub fn is_connected(&self) -> bool {
        self.live.load(Ordering::Acquire) && self.slots.strong_count() > 0
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_handlers() {
        let signal = Signal::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = total.clone();
            signal.connect(move |value| {
                total.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }

        signal.emit(&5);
        assert_eq!(total.load(Ordering::SeqCst), 15);
        assert_eq!(signal.connection_count(), 3);
    }

    #[test]
    fn test_disconnect_succeeds_once() {
        let signal = Signal::<()>::new();
        let connection = signal.connect(|_| {});

        assert!(connection.is_connected());
        assert!(connection.disconnect());
        assert!(!connection.disconnect());
        assert!(!connection.is_connected());
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn test_dropping_token_keeps_handler() {
        let signal = Signal::<()>::new();
        drop(signal.connect(|_| {}));
        assert_eq!(signal.connection_count(), 1);
    }

    #[test]
    fn test_handler_can_disconnect_sibling_during_emit() {
        let signal = Signal::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let sibling: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));

        let first = {
            let sibling = sibling.clone();
            signal.connect(move |_| {
                if let Some(connection) = sibling.lock().as_ref() {
                    connection.disconnect();
                }
            })
        };
        let second = {
            let calls = calls.clone();
            signal.connect(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        *sibling.lock() = Some(second);

        signal.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(signal.connection_count(), 1);
        assert!(first.disconnect());
    }

    #[test]
    fn test_disconnect_after_signal_dropped() {
        let signal = Signal::<u8>::new();
        let connection = signal.connect(|_| {});
        drop(signal);

        assert!(!connection.is_connected());
        assert!(!connection.disconnect());
    }
}
