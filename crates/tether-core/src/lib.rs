//! Tether: RPC client dispatch core.
//!
//! Sits between application code and a pluggable transport [`Channel`]:
//!
//! - unary calls, blocking ([`Client::call`]) or through an
//!   [`AsyncReply`](reply::AsyncReply) handle ([`Client::call_async`])
//! - server-streaming subscriptions, deduplicated per method and payload and
//!   resubscribed automatically after errors ([`Client::subscribe`])
//! - single-owner execution: a client's state lives on one [`EventLoop`], and
//!   calls from other threads are marshalled onto it transparently
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_core::{Client, EventLoop, LocalChannel};
//!
//! # fn main() -> tether_core::Result<()> {
//! let event_loop = EventLoop::new()?;
//! let client = Client::new("Greeter", event_loop.handle());
//!
//! let attach = client.clone();
//! event_loop
//!     .handle()
//!     .invoke_blocking(move || attach.attach_channel(Arc::new(LocalChannel::new())))??;
//!
//! let (status, _reply) = client.call("SayHello", &b"{}"[..]);
//! println!("{}", status);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod lifecycle;
pub mod reply;
pub mod serializer;
pub mod signal;
pub mod status;
pub mod stream;

pub use cancel::CancellationToken;
pub use channel::{Channel, LocalChannel, LocalService, StreamSink};
pub use client::{Client, ClientBuilder};
pub use config::{ReconnectConfig, StreamConfig};
pub use error::{Result, RpcError};
pub use event_loop::{EventLoop, EventLoopHandle};
pub use reply::{AsyncReply, AsyncReplyHandle, ReplyState};
pub use serializer::{JsonSerializer, Serializer};
pub use signal::{Connection, Signal};
pub use status::{Status, StatusCode};
pub use stream::{Stream, StreamHandle, StreamHandler, StreamState};

pub use bytes::Bytes;
