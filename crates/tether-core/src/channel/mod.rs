//! Channel contract.
//!
//! A channel performs the actual unary calls and stream subscriptions. The
//! client only talks to it through [`Channel`]; results come back as return
//! values (synchronous calls) or as events raised on the reply or stream
//! handle the client passes in.
//!
//! # Thread Safety
//!
//! The client invokes channel methods only from its owning event loop.
//! Channels may raise handle events from any thread: `complete`, `fail`,
//! `deliver` and `finish` queue themselves onto the owning loop when called
//! elsewhere.

pub mod local;

use crate::event_loop::EventLoopHandle;
use crate::reply::AsyncReplyHandle;
use crate::serializer::Serializer;
use crate::status::Status;
use crate::stream::StreamHandle;
use bytes::Bytes;
use std::sync::Arc;

pub use local::{LocalChannel, LocalService, StreamSink};

/// Transport collaborator used by a client.
pub trait Channel: Send + Sync + 'static {
    /// Perform a unary call and wait for its result.
    fn call(&self, method: &str, service: &str, payload: &Bytes) -> (Status, Bytes);

    /// Start a unary call. The outcome is reported later through
    /// [`AsyncReply::complete`](crate::reply::AsyncReply::complete) or
    /// [`AsyncReply::fail`](crate::reply::AsyncReply::fail).
    fn call_async(&self, method: &str, service: &str, payload: Bytes, reply: &AsyncReplyHandle);

    /// Start (or resume) delivery for `stream`.
    ///
    /// Messages go to [`Stream::deliver`](crate::stream::Stream::deliver);
    /// a broken subscription is reported with
    /// [`Stream::fail`](crate::stream::Stream::fail) and a server-side end
    /// with [`Stream::finish`](crate::stream::Stream::finish). The channel
    /// should stop delivering once the stream's `finished` event fires.
    fn subscribe(&self, stream: &StreamHandle, service: &str, owner: &EventLoopHandle);

    /// Serializer matching this channel's payload format.
    fn serializer(&self) -> Arc<dyn Serializer>;
}
