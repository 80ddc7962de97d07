//! Server-streaming subscription handle.
//!
//! A [`Stream`] is identified by its method name and argument payload; two
//! streams with the same pair are the same logical subscription, which is
//! what the client deduplicates on. Every registered handler receives every
//! message delivered by the channel.
//!
//! State machine:
//!
//! ```text
//!   Active ──error──▶ Reconnecting ──resubscribe──▶ Active
//!     │                    │
//!     └──────finish────────┴──────▶ Finished (terminal)
//! ```

use crate::channel::Channel;
use crate::event_loop::EventLoopHandle;
use crate::signal::Signal;
use crate::status::Status;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Callback invoked with every message of a stream.
pub type StreamHandler = Arc<dyn Fn(&Bytes) + Send + Sync>;

/// Shared handle to a subscription.
pub type StreamHandle = Arc<Stream>;

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Subscribed, or subscribing.
    Active,
    /// An error was reported; a resubscribe may be pending.
    Reconnecting,
    Finished,
}

/// One subscription to a server-streaming method.
pub struct Stream {
    method: String,
    payload: Bytes,
    handlers: Mutex<Vec<StreamHandler>>,
    channel: Arc<dyn Channel>,
    owner: EventLoopHandle,
    state: Mutex<StreamState>,
    /// Consecutive errors since the last delivered message.
    failures: AtomicU32,
    error: Signal<Status>,
    finished: Signal<()>,
}

impl Stream {
    pub(crate) fn new(
        channel: Arc<dyn Channel>,
        owner: EventLoopHandle,
        method: impl Into<String>,
        payload: Bytes,
        handler: StreamHandler,
    ) -> StreamHandle {
        Arc::new(Self {
            method: method.into(),
            payload,
            handlers: Mutex::new(vec![handler]),
            channel,
            owner,
            state: Mutex::new(StreamState::Active),
            failures: AtomicU32::new(0),
            error: Signal::new(),
            finished: Signal::new(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Serialized argument the subscription was opened with.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Whether this stream is the subscription for `(method, payload)`.
    pub fn matches(&self, method: &str, payload: &[u8]) -> bool {
        self.method == method && self.payload[..] == *payload
    }

    /// Register another message callback.
    pub fn add_handler(&self, handler: StreamHandler) {
        self.handlers.lock().push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == StreamState::Finished
    }

    /// Raised on every subscription error.
    pub fn on_error(&self) -> &Signal<Status> {
        &self.error
    }

    /// Raised once when the stream ends.
    pub fn on_finished(&self) -> &Signal<()> {
        &self.finished
    }

    /// Hand a message to every registered handler.
    pub fn deliver(self: &Arc<Self>, message: Bytes) {
        let stream = Arc::clone(self);
        let queued = self.owner.run_or_post(move || {
            {
                let mut state = stream.state.lock();
                if *state == StreamState::Finished {
                    return;
                }
                *state = StreamState::Active;
            }
            stream.failures.store(0, Ordering::Release);

            let handlers: Vec<StreamHandler> = stream.handlers.lock().clone();
            for handler in handlers {
                handler(&message);
            }
        });
        if queued.is_err() {
            debug!("Owning loop stopped, message for {} dropped", self.method);
        }
    }

    /// Report a broken subscription. Ignored once finished.
    pub fn fail(self: &Arc<Self>, status: Status) {
        let stream = Arc::clone(self);
        let queued = self.owner.run_or_post(move || {
            {
                let mut state = stream.state.lock();
                if *state == StreamState::Finished {
                    debug!("Stream {} finished, error {} ignored", stream.method, status);
                    return;
                }
                *state = StreamState::Reconnecting;
            }
            stream.failures.fetch_add(1, Ordering::AcqRel);
            stream.error.emit(&status);
        });
        if queued.is_err() {
            debug!("Owning loop stopped, error for {} dropped", self.method);
        }
    }

    /// End the stream. Only the first call raises `finished`.
    ///
    /// Runs in place when the owning loop has stopped, so the stream is
    /// still released.
    pub fn finish(self: &Arc<Self>) {
        let stream = Arc::clone(self);
        if self.owner.run_or_post(move || stream.finish_now()).is_err() {
            debug!("Owning loop stopped, finishing {} in place", self.method);
            self.finish_now();
        }
    }

    fn finish_now(&self) {
        {
            let mut state = self.state.lock();
            if *state == StreamState::Finished {
                return;
            }
            *state = StreamState::Finished;
        }
        self.finished.emit(&());
    }

    /// Stop the subscription from the application side.
    pub fn cancel(self: &Arc<Self>) {
        debug!("Stream {} cancelled by caller", self.method);
        self.finish();
    }

    /// Move back to `Active` ahead of a resubscribe. `false` once finished.
    pub(crate) fn resume(&self) -> bool {
        let mut state = self.state.lock();
        if *state == StreamState::Finished {
            return false;
        }
        *state = StreamState::Active;
        true
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.method, &other.payload)
    }
}

impl Eq for Stream {}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("method", &self.method)
            .field("payload_len", &self.payload.len())
            .field("handlers", &self.handler_count())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
