//! In-process channel.
//!
//! Routes calls to [`LocalService`] implementations registered by service
//! name. Synchronous calls run inline; asynchronous calls and streams run on
//! worker threads and report back through the reply or stream handle, the
//! same way a network transport would.

use super::Channel;
use crate::cancel::CancellationToken;
use crate::config::LocalChannelConfig;
use crate::event_loop::EventLoopHandle;
use crate::reply::AsyncReplyHandle;
use crate::serializer::{JsonSerializer, Serializer};
use crate::status::{Status, StatusCode};
use crate::stream::StreamHandle;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Server side of a local service.
pub trait LocalService: Send + Sync + 'static {
    /// Handle a unary call.
    fn unary(&self, method: &str, payload: &Bytes) -> Result<Bytes, Status>;

    /// Produce a server stream into `sink` and return its final status.
    ///
    /// Should return promptly once [`StreamSink::send`] reports `false`.
    fn server_stream(&self, method: &str, payload: &Bytes, sink: &StreamSink) -> Status {
        let _ = (payload, sink);
        Status::new(
            StatusCode::Unimplemented,
            format!("Method {} is not a server stream", method),
        )
    }
}

/// Delivery end of a local stream.
pub struct StreamSink {
    stream: StreamHandle,
    token: CancellationToken,
}

impl StreamSink {
    /// Deliver one message. Returns `false` once the stream was cancelled or
    /// finished; the service should stop producing then.
    pub fn send(&self, message: impl Into<Bytes>) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.stream.deliver(message.into());
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSink")
            .field("method", &self.stream.method())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Channel that dispatches to services living in the same process.
#[derive(Clone)]
pub struct LocalChannel {
    services: HashMap<String, Arc<dyn LocalService>>,
    serializer: Arc<dyn Serializer>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            serializer: Arc::new(JsonSerializer),
        }
    }

    /// Register `service` under `name`, replacing any previous one.
    pub fn with_service(mut self, name: impl Into<String>, service: impl LocalService) -> Self {
        self.services.insert(name.into(), Arc::new(service));
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    fn lookup(&self, service: &str) -> Result<Arc<dyn LocalService>, Status> {
        self.services.get(service).cloned().ok_or_else(|| {
            Status::new(
                StatusCode::Unimplemented,
                format!("Service {} is not registered", service),
            )
        })
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for LocalChannel {
    fn call(&self, method: &str, service: &str, payload: &Bytes) -> (Status, Bytes) {
        let handler = match self.lookup(service) {
            Ok(handler) => handler,
            Err(status) => return (status, Bytes::new()),
        };

        match handler.unary(method, payload) {
            Ok(data) => (Status::ok(), data),
            Err(status) => (status, Bytes::new()),
        }
    }

    fn call_async(&self, method: &str, service: &str, payload: Bytes, reply: &AsyncReplyHandle) {
        let handler = match self.lookup(service) {
            Ok(handler) => handler,
            Err(status) => {
                reply.fail(status);
                return;
            }
        };

        let method = method.to_owned();
        let worker_reply = reply.clone();
        let spawned = std::thread::Builder::new()
            .name(LocalChannelConfig::CALL_THREAD_NAME.to_owned())
            .spawn(move || {
                if worker_reply.is_finished() {
                    debug!("Call {} aborted before it started", method);
                    return;
                }
                match handler.unary(&method, &payload) {
                    Ok(data) => worker_reply.complete(data),
                    Err(status) => worker_reply.fail(status),
                }
            });

        if let Err(e) = spawned {
            error!("Failed to start worker for async call: {}", e);
            reply.fail(Status::new(StatusCode::Internal, e.to_string()));
        }
    }

    fn subscribe(&self, stream: &StreamHandle, service: &str, owner: &EventLoopHandle) {
        let handler = match self.lookup(service) {
            Ok(handler) => handler,
            Err(status) => {
                stream.fail(status);
                return;
            }
        };

        let token = CancellationToken::new();
        let connection = stream.on_finished().connect({
            let token = token.clone();
            move |_| {
                token.cancel();
            }
        });
        if stream.is_finished() {
            connection.disconnect();
            return;
        }

        debug!(
            "Starting local stream {}/{} for loop {}",
            service,
            stream.method(),
            owner.name()
        );

        let sink = StreamSink {
            stream: stream.clone(),
            token: token.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(LocalChannelConfig::STREAM_THREAD_NAME.to_owned())
            .spawn(move || {
                let status = handler.server_stream(sink.stream.method(), sink.stream.payload(), &sink);
                connection.disconnect();

                if token.is_cancelled() {
                    debug!("Local stream {} cancelled", sink.stream.method());
                } else if status.is_ok() {
                    sink.stream.finish();
                } else {
                    sink.stream.fail(status);
                }
            });

        if let Err(e) = spawned {
            error!("Failed to start worker for stream: {}", e);
            stream.fail(Status::new(StatusCode::Internal, e.to_string()));
        }
    }

    fn serializer(&self) -> Arc<dyn Serializer> {
        self.serializer.clone()
    }
}

impl fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChannel")
            .field("services", &self.service_names())
            .field("serializer", &self.serializer.name())
            .finish()
    }
}
