//! Ownership helpers for self-releasing handles.
//!
//! Replies and streams keep themselves alive while the channel may still
//! deliver events to them. [`SelfRelease`] holds that self-reference together
//! with the connections that were installed for it, and gives both up in one
//! step. [`WeakHandle`] is the non-owning counterpart used by delayed
//! callbacks.

use crate::event_loop::EventLoopHandle;
use crate::signal::Connection;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

struct Held<T> {
    handle: Arc<T>,
    connections: Vec<Connection>,
}

/// Self-reference of a handle plus the subscriptions tied to it.
///
/// Handlers connected to the handle's own events capture an
/// `Arc<SelfRelease<T>>`, which forms a cycle through the handle's signals.
/// [`release`](Self::release) breaks the cycle: it disconnects every tracked
/// connection and hands the final reference to the owning loop, so the handle
/// is never destroyed in the middle of an emission.
pub struct SelfRelease<T: Send + Sync + 'static> {
    owner: EventLoopHandle,
    held: Mutex<Option<Held<T>>>,
}

impl<T: Send + Sync + 'static> SelfRelease<T> {
    pub fn new(handle: Arc<T>, owner: EventLoopHandle) -> Arc<Self> {
        Arc::new(Self {
            owner,
            held: Mutex::new(Some(Held {
                handle,
                connections: Vec::new(),
            })),
        })
    }

    /// Tie `connection` to this handle's lifetime.
    ///
    /// If the handle was already released the connection is disconnected
    /// immediately.
    pub fn track(&self, connection: Connection) {
        let mut held = self.held.lock();
        if let Some(held) = held.as_mut() {
            held.connections.push(connection);
            return;
        }
        drop(held);
        connection.disconnect();
    }

    /// Disconnect all tracked connections and drop the self-reference.
    ///
    /// Only the first call has an effect; it returns `true`.
    pub fn release(&self) -> bool {
        let Some(Held {
            handle,
            connections,
        }) = self.held.lock().take()
        else {
            return false;
        };

        for connection in &connections {
            connection.disconnect();
        }

        // The last reference is dropped by a queued task, not by the handler
        // that is still running inside the handle's emission.
        if self.owner.post(move || drop(handle)).is_err() {
            debug!("Owning loop stopped, releasing handle in place");
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.held.lock().is_none()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for SelfRelease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRelease")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Non-owning reference that can only be resolved for the duration of a
/// closure.
pub struct WeakHandle<T> {
    inner: Weak<T>,
}

impl<T> WeakHandle<T> {
    pub fn new(handle: &Arc<T>) -> Self {
        Self {
            inner: Arc::downgrade(handle),
        }
    }

    /// Run `f` with the live instance, or return `None` if every owner has
    /// already released it.
    pub fn resolve<R>(&self, f: impl FnOnce(&Arc<T>) -> R) -> Option<R> {
        self.inner.upgrade().map(|live| f(&live))
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::signal::Signal;

    struct Tracked;

    #[test]
    fn test_release_happens_once() {
        let event_loop = EventLoop::new().unwrap();
        let owner = event_loop.handle().clone();
        let tracked = Arc::new(Tracked);
        let weak = WeakHandle::new(&tracked);

        let retained = SelfRelease::new(tracked, owner.clone());
        assert!(weak.is_alive());

        assert!(retained.release());
        assert!(!retained.release());
        assert!(retained.is_released());

        owner.invoke_blocking(|| ()).unwrap();
        assert!(!weak.is_alive());
        assert!(weak.resolve(|_| ()).is_none());
    }

    #[test]
    fn test_release_disconnects_tracked_connections() {
        let event_loop = EventLoop::new().unwrap();
        let signal = Signal::<()>::new();
        let retained = SelfRelease::new(Arc::new(Tracked), event_loop.handle().clone());

        retained.track(signal.connect(|_| {}));
        retained.track(signal.connect(|_| {}));
        assert_eq!(signal.connection_count(), 2);

        retained.release();
        assert_eq!(signal.connection_count(), 0);

        retained.track(signal.connect(|_| {}));
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn test_handler_cycle_is_broken_by_release() {
        let event_loop = EventLoop::new().unwrap();
        let owner = event_loop.handle().clone();
        let signal = Arc::new(Signal::<()>::new());
        let tracked = Arc::new(Tracked);
        let weak = WeakHandle::new(&tracked);

        let retained = SelfRelease::new(tracked, owner.clone());
        let connection = signal.connect({
            let retained = retained.clone();
            move |_| {
                retained.release();
            }
        });
        retained.track(connection);
        drop(retained);

        assert!(weak.is_alive());
        signal.emit(&());
        owner.invoke_blocking(|| ()).unwrap();
        assert!(!weak.is_alive());
    }

    #[test]
    fn test_weak_handle_resolves_live_instance() {
        let value = Arc::new(7_u32);
        let weak = WeakHandle::new(&value);
        assert_eq!(weak.resolve(|v| **v + 1), Some(8));
        drop(value);
        assert_eq!(weak.resolve(|v| **v + 1), None);
    }
}
