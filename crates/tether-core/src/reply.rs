//! Asynchronous unary call handle.
//!
//! An [`AsyncReply`] represents one outstanding call. It moves from
//! `Pending` to exactly one terminal state and ignores every event after
//! that. The client keeps it alive (see [`crate::lifecycle::SelfRelease`])
//! until the first terminal event, so callers may drop their handle right
//! after issuing the call.

use crate::channel::Channel;
use crate::client::ClientShared;
use crate::error::{Result, RpcError};
use crate::event_loop::EventLoopHandle;
use crate::signal::Signal;
use crate::status::{Status, StatusCode};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shared handle to an in-flight call.
pub type AsyncReplyHandle = Arc<AsyncReply>;

/// Message carried by the status of an aborted call.
pub const ABORTED_MESSAGE: &str = "Call aborted by user or timeout";

/// Lifecycle of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    Pending,
    Completed,
    Failed,
}

/// One outstanding unary call result.
pub struct AsyncReply {
    channel: Arc<dyn Channel>,
    owner: EventLoopHandle,
    client: Weak<ClientShared>,
    state: Mutex<ReplyState>,
    status: Mutex<Status>,
    data: Mutex<Bytes>,
    finished: Signal<()>,
    error: Signal<Status>,
}

impl AsyncReply {
    pub(crate) fn new(
        channel: Arc<dyn Channel>,
        owner: EventLoopHandle,
        client: Weak<ClientShared>,
    ) -> AsyncReplyHandle {
        Arc::new(Self {
            channel,
            owner,
            client,
            state: Mutex::new(ReplyState::Pending),
            status: Mutex::new(Status::ok()),
            data: Mutex::new(Bytes::new()),
            finished: Signal::new(),
            error: Signal::new(),
        })
    }

    pub fn state(&self) -> ReplyState {
        *self.state.lock()
    }

    /// Whether the reply reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state() != ReplyState::Pending
    }

    /// Final status; `Ok` while pending.
    pub fn status(&self) -> Status {
        self.status.lock().clone()
    }

    /// Raw reply payload. Empty until completed, and after a failure.
    pub fn data(&self) -> Bytes {
        self.data.lock().clone()
    }

    /// Decode the reply payload with the issuing client's serializer.
    ///
    /// Fails with [`RpcError::ReplyPending`] until the call has finished.
    pub fn read<T: DeserializeOwned>(&self) -> Result<T> {
        match self.state() {
            ReplyState::Pending => return Err(RpcError::ReplyPending),
            ReplyState::Failed => return Err(RpcError::Channel(self.status())),
            ReplyState::Completed => {}
        }
        let client = self.client.upgrade().ok_or(RpcError::ClientDropped)?;
        client.serializer().deserialize(&self.data())
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Raised once when the call completes successfully.
    pub fn on_finished(&self) -> &Signal<()> {
        &self.finished
    }

    /// Raised once when the call fails or is aborted.
    pub fn on_error(&self) -> &Signal<Status> {
        &self.error
    }

    /// Report a successful result. Ignored if the reply is already terminal.
    ///
    /// Runs in place when the owning loop has stopped, so the reply is still
    /// released.
    pub fn complete(self: &Arc<Self>, payload: Bytes) {
        let reply = Arc::clone(self);
        let queued = payload.clone();
        if self.owner.run_or_post(move || reply.complete_now(queued)).is_err() {
            debug!("Owning loop stopped, completing reply in place");
            self.complete_now(payload);
        }
    }

    /// Report a failed result. Ignored if the reply is already terminal.
    pub fn fail(self: &Arc<Self>, status: Status) {
        let reply = Arc::clone(self);
        let queued = status.clone();
        if self.owner.run_or_post(move || reply.fail_now(queued)).is_err() {
            debug!("Owning loop stopped, failing reply in place");
            self.fail_now(status);
        }
    }

    fn complete_now(&self, payload: Bytes) {
        if !self.transition(ReplyState::Completed) {
            debug!("Reply already {:?}, completion ignored", self.state());
            return;
        }
        *self.data.lock() = payload;
        self.finished.emit(&());
    }

    fn fail_now(&self, status: Status) {
        if !self.transition(ReplyState::Failed) {
            debug!("Reply already {:?}, error {} ignored", self.state(), status);
            return;
        }
        *self.data.lock() = Bytes::new();
        *self.status.lock() = status.clone();
        self.error.emit(&status);
    }

    /// Fail the call with an `Aborted` status so the channel can drop it.
    pub fn abort(self: &Arc<Self>) {
        self.fail(Status::new(StatusCode::Aborted, ABORTED_MESSAGE));
    }

    fn transition(&self, to: ReplyState) -> bool {
        let mut state = self.state.lock();
        if *state != ReplyState::Pending {
            return false;
        }
        *state = to;
        true
    }
}

impl fmt::Debug for AsyncReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncReply")
            .field("state", &self.state())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
