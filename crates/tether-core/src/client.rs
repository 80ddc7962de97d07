//! Client core.
//!
//! A [`Client`] binds a service name to one channel and turns method
//! invocations into unary calls, asynchronous replies and deduplicated
//! stream subscriptions.
//!
//! # Thread Safety
//!
//! `Client` is `Send + Sync` and cheap to clone. Its state belongs to the
//! owning event loop: `call`, `call_async` and `subscribe` invoked from any
//! other thread are re-run on the loop through
//! [`EventLoopHandle::invoke_blocking`], blocking the caller until they
//! return. `attach_channel` is the exception and panics off the loop.
//!
//! Every failure that reaches the client (a non-Ok call, a failed reply, a
//! stream error, a missing channel) is also raised on [`Client::on_error`].

use crate::channel::Channel;
use crate::config::ReconnectConfig;
use crate::error::{Result, RpcError};
use crate::event_loop::EventLoopHandle;
use crate::lifecycle::{SelfRelease, WeakHandle};
use crate::reply::{AsyncReply, AsyncReplyHandle};
use crate::serializer::{JsonSerializer, Serializer};
use crate::signal::Signal;
use crate::status::Status;
use crate::stream::{Stream, StreamHandle, StreamHandler};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct ClientState {
    channel: Option<Arc<dyn Channel>>,
    serializer: Arc<dyn Serializer>,
    streams: Vec<StreamHandle>,
}

/// State shared by every clone of a [`Client`].
///
/// Replies and streams refer back to it weakly.
pub(crate) struct ClientShared {
    service: String,
    owner: EventLoopHandle,
    reconnect: ReconnectConfig,
    state: Mutex<ClientState>,
    errors: Signal<Status>,
}

impl ClientShared {
    pub(crate) fn serializer(&self) -> Arc<dyn Serializer> {
        self.state.lock().serializer.clone()
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.state.lock().channel.clone()
    }

    fn raise_no_channel(&self) -> Status {
        let status = RpcError::NoChannelAttached.to_status();
        warn!("Client for {}: {}", self.service, status.message());
        self.errors.emit(&status);
        status
    }

    fn call_on_loop(&self, method: &str, payload: &Bytes) -> (Status, Bytes) {
        let Some(channel) = self.channel() else {
            return (self.raise_no_channel(), Bytes::new());
        };

        let (status, data) = channel.call(method, &self.service, payload);
        if !status.is_ok() {
            debug!("Call {}/{} failed: {}", self.service, method, status);
            self.errors.emit(&status);
        }
        (status, data)
    }

    fn call_async_on_loop(self: &Arc<Self>, method: &str, payload: Bytes) -> Result<AsyncReplyHandle> {
        let Some(channel) = self.channel() else {
            self.raise_no_channel();
            return Err(RpcError::NoChannelAttached);
        };

        let reply = AsyncReply::new(channel.clone(), self.owner.clone(), Arc::downgrade(self));
        let release = SelfRelease::new(reply.clone(), self.owner.clone());

        let finished = reply.on_finished().connect({
            let release = release.clone();
            move |_| {
                release.release();
            }
        });
        let errored = reply.on_error().connect({
            let release = release.clone();
            let client = Arc::downgrade(self);
            move |status| {
                if let Some(client) = client.upgrade() {
                    client.errors.emit(status);
                }
                release.release();
            }
        });
        release.track(finished);
        release.track(errored);

        channel.call_async(method, &self.service, payload, &reply);
        Ok(reply)
    }

    fn subscribe_on_loop(
        self: &Arc<Self>,
        method: &str,
        payload: Bytes,
        handler: StreamHandler,
    ) -> Result<StreamHandle> {
        let Some(channel) = self.channel() else {
            self.raise_no_channel();
            return Err(RpcError::NoChannelAttached);
        };

        let existing = self
            .state
            .lock()
            .streams
            .iter()
            .find(|stream| stream.matches(method, &payload) && !stream.is_finished())
            .cloned();
        if let Some(stream) = existing {
            debug!("Joining active stream {}/{}", self.service, method);
            stream.add_handler(handler);
            return Ok(stream);
        }

        let stream = Stream::new(channel.clone(), self.owner.clone(), method, payload, handler);
        self.wire_stream(&stream);
        self.state.lock().streams.push(stream.clone());

        debug!("Subscribing to {}/{}", self.service, method);
        channel.subscribe(&stream, &self.service, &self.owner);
        Ok(stream)
    }

    fn wire_stream(self: &Arc<Self>, stream: &StreamHandle) {
        let release = SelfRelease::new(stream.clone(), self.owner.clone());

        let errored = stream.on_error().connect({
            let client = Arc::downgrade(self);
            let stream = WeakHandle::new(stream);
            move |status| {
                if let Some(client) = client.upgrade() {
                    client.on_stream_error(&stream, status);
                }
            }
        });

        let finished = stream.on_finished().connect({
            let release = release.clone();
            let client = Arc::downgrade(self);
            let method = stream.method().to_owned();
            let payload = stream.payload().clone();
            move |_| {
                if let Some(client) = client.upgrade() {
                    client.forget_stream(&method, &payload);
                }
                release.release();
            }
        });

        release.track(errored);
        release.track(finished);
    }

    fn on_stream_error(&self, stream: &WeakHandle<Stream>, status: &Status) {
        let Some((method, failures)) = stream.resolve(|live| (live.method().to_owned(), live.failures()))
        else {
            return;
        };

        warn!(
            "Stream error for method {} of service {}: {}",
            method, self.service, status
        );
        self.errors.emit(status);

        if !self.reconnect.allows(failures) {
            warn!(
                "Stream {}/{} failed {} times in a row, giving up",
                self.service, method, failures
            );
            stream.resolve(|live| live.finish());
            return;
        }

        let stream = stream.clone();
        let service = self.service.clone();
        let owner = self.owner.clone();
        self.owner.single_shot(self.reconnect.delay, move || {
            let resubscribed = stream.resolve(|live| {
                if !live.resume() {
                    return false;
                }
                live.channel().subscribe(live, &service, &owner);
                true
            });
            match resubscribed {
                Some(true) => debug!("Resubscribed to {}/{}", service, method),
                Some(false) => debug!("Stream {}/{} finished before reconnect", service, method),
                None => debug!("Stream {}/{} released before reconnect", service, method),
            }
        });
    }

    fn forget_stream(&self, method: &str, payload: &Bytes) {
        let mut state = self.state.lock();
        let before = state.streams.len();
        state.streams.retain(|stream| !stream.matches(method, payload));
        if state.streams.len() < before {
            debug!("Stream {}/{} finished and removed", self.service, method);
        }
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        let streams = std::mem::take(&mut self.state.get_mut().streams);
        if !streams.is_empty() {
            debug!(
                "Client for {} dropped, finishing {} streams",
                self.service,
                streams.len()
            );
        }
        for stream in streams {
            stream.finish();
        }
    }
}

/// Handle to a client of one service.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Create a client with the default serializer and reconnect settings.
    pub fn new(service: impl Into<String>, owner: &EventLoopHandle) -> Self {
        Self::builder(service).build(owner)
    }

    pub fn builder(service: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(service)
    }

    pub fn service(&self) -> &str {
        &self.shared.service
    }

    /// The loop this client's state belongs to.
    pub fn owner(&self) -> &EventLoopHandle {
        &self.shared.owner
    }

    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.shared.reconnect
    }

    /// Serializer used by the typed helpers. Replaced by the channel's own
    /// serializer on attach.
    pub fn serializer(&self) -> Arc<dyn Serializer> {
        self.shared.serializer()
    }

    pub fn has_channel(&self) -> bool {
        self.shared.state.lock().channel.is_some()
    }

    /// Number of streams currently subscribed or reconnecting.
    pub fn active_stream_count(&self) -> usize {
        self.shared.state.lock().streams.len()
    }

    /// Client-level error event.
    pub fn on_error(&self) -> &Signal<Status> {
        &self.shared.errors
    }

    /// Attach the channel that carries this client's calls.
    ///
    /// A second attach is rejected and leaves the first channel in place.
    ///
    /// # Panics
    ///
    /// Panics when called from any thread other than the owning event loop.
    pub fn attach_channel(&self, channel: Arc<dyn Channel>) -> Result<()> {
        if !self.shared.owner.is_current() {
            let violation = RpcError::ForeignContext {
                operation: "attach_channel",
            };
            error!("{}", violation);
            panic!("{}", violation);
        }

        let serializer = channel.serializer();
        let mut state = self.shared.state.lock();
        if state.channel.is_some() {
            warn!("Client for {} already has a channel", self.shared.service);
            return Err(RpcError::ChannelAlreadyAttached {
                service: self.shared.service.clone(),
            });
        }
        state.serializer = serializer;
        state.channel = Some(channel);
        drop(state);

        info!("Channel attached to client for {}", self.shared.service);
        Ok(())
    }

    /// Perform a unary call, blocking until the channel answers.
    ///
    /// Returns exactly one status. Non-Ok statuses are also raised on
    /// [`on_error`](Self::on_error), except `Unavailable` for a stopped loop.
    pub fn call(&self, method: &str, payload: impl Into<Bytes>) -> (Status, Bytes) {
        let shared = self.shared.clone();
        let method_name = method.to_owned();
        let payload = payload.into();

        match self
            .shared
            .owner
            .invoke_blocking(move || shared.call_on_loop(&method_name, &payload))
        {
            Ok(result) => result,
            Err(e) => {
                warn!("Call {}/{} not dispatched: {}", self.shared.service, method, e);
                (e.to_status(), Bytes::new())
            }
        }
    }

    /// Start a unary call and return its reply handle.
    ///
    /// `None` when no channel is attached or the owning loop has stopped.
    pub fn call_async(&self, method: &str, payload: impl Into<Bytes>) -> Option<AsyncReplyHandle> {
        self.dispatch_call_async(method, payload.into()).ok()
    }

    /// Subscribe `handler` to a server-streaming method.
    ///
    /// Subscribing again with the same method and payload joins the active
    /// stream instead of opening a second one. `None` when no channel is
    /// attached or the owning loop has stopped.
    pub fn subscribe<F>(&self, method: &str, payload: impl Into<Bytes>, handler: F) -> Option<StreamHandle>
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.dispatch_subscribe(method, payload.into(), Arc::new(handler))
            .ok()
    }

    /// Unary call with typed argument and result, encoded by the client's
    /// serializer.
    pub fn call_message<A, R>(&self, method: &str, argument: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let serializer = self.serializer();
        let payload = serializer.serialize(argument)?;
        let (status, data) = self.call(method, payload);
        if !status.is_ok() {
            return Err(RpcError::Channel(status));
        }
        serializer.deserialize(&data)
    }

    /// Typed subscription. Messages that fail to decode are logged and
    /// dropped.
    pub fn subscribe_message<A, R, F>(&self, method: &str, argument: &A, handler: F) -> Result<StreamHandle>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + 'static,
        F: Fn(R) + Send + Sync + 'static,
    {
        let serializer = self.serializer();
        let payload = serializer.serialize(argument)?;
        let handler = decoding_handler(serializer, method.to_owned(), handler);
        self.dispatch_subscribe(method, payload, handler)
    }

    fn dispatch_call_async(&self, method: &str, payload: Bytes) -> Result<AsyncReplyHandle> {
        let shared = self.shared.clone();
        let method_name = method.to_owned();
        self.shared
            .owner
            .invoke_blocking(move || shared.call_async_on_loop(&method_name, payload))
            .inspect_err(|e| self.log_undispatched(method, e))?
    }

    fn dispatch_subscribe(&self, method: &str, payload: Bytes, handler: StreamHandler) -> Result<StreamHandle> {
        let shared = self.shared.clone();
        let method_name = method.to_owned();
        self.shared
            .owner
            .invoke_blocking(move || shared.subscribe_on_loop(&method_name, payload, handler))
            .inspect_err(|e| self.log_undispatched(method, e))?
    }

    fn log_undispatched(&self, method: &str, e: &RpcError) {
        warn!("{}/{} not dispatched: {}", self.shared.service, method, e);
    }
}

fn decoding_handler<R, F>(serializer: Arc<dyn Serializer>, method: String, handler: F) -> StreamHandler
where
    R: DeserializeOwned + 'static,
    F: Fn(R) + Send + Sync + 'static,
{
    Arc::new(move |message: &Bytes| match serializer.deserialize::<R>(message) {
        Ok(value) => handler(value),
        Err(e) => warn!("Dropping undecodable message on {}: {}", method, e),
    })
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.shared.service)
            .field("has_channel", &self.has_channel())
            .field("active_streams", &self.active_stream_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    service: String,
    reconnect: ReconnectConfig,
    serializer: Arc<dyn Serializer>,
}

impl ClientBuilder {
    fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            reconnect: ReconnectConfig::default(),
            serializer: Arc::new(JsonSerializer),
        }
    }

    /// Stream recovery settings.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Serializer used until a channel is attached.
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Create the client, owned by the loop behind `owner`.
    pub fn build(self, owner: &EventLoopHandle) -> Client {
        debug!("Creating client for {} on loop {}", self.service, owner.name());
        Client {
            shared: Arc::new(ClientShared {
                service: self.service,
                owner: owner.clone(),
                reconnect: self.reconnect,
                state: Mutex::new(ClientState {
                    channel: None,
                    serializer: self.serializer,
                    streams: Vec::new(),
                }),
                errors: Signal::new(),
            }),
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("service", &self.service)
            .field("reconnect", &self.reconnect)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::status::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let event_loop = EventLoop::new().unwrap();
        let client = Client::new("Greeter", event_loop.handle());

        assert_eq!(client.service(), "Greeter");
        assert_eq!(client.serializer().name(), "json");
        assert_eq!(client.reconnect_config(), &ReconnectConfig::default());
        assert!(!client.has_channel());
        assert_eq!(client.active_stream_count(), 0);
    }

    #[test]
    fn test_builder_overrides_reconnect() {
        let event_loop = EventLoop::new().unwrap();
        let reconnect = ReconnectConfig::new()
            .with_delay(Duration::from_millis(5))
            .with_max_attempts(2);
        let client = Client::builder("Greeter")
            .reconnect(reconnect.clone())
            .build(event_loop.handle());

        assert_eq!(client.reconnect_config(), &reconnect);
    }

    #[test]
    fn test_unattached_operations_raise_error_each_time() {
        let event_loop = EventLoop::new().unwrap();
        let client = Client::new("Greeter", event_loop.handle());
        let errors = Arc::new(AtomicUsize::new(0));
        client.on_error().connect({
            let errors = errors.clone();
            move |status: &Status| {
                assert_eq!(status.code(), StatusCode::Unknown);
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(client.call_async("SayHello", Bytes::new()).is_none());
        assert!(client.subscribe("Watch", Bytes::new(), |_| {}).is_none());
        assert!(matches!(
            client.call_message::<_, String>("SayHello", "ada"),
            Err(RpcError::Channel(_))
        ));
        assert_eq!(errors.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stopped_loop_reports_unavailable() {
        let mut event_loop = EventLoop::new().unwrap();
        let client = Client::new("Greeter", event_loop.handle());
        let errors = Arc::new(AtomicUsize::new(0));
        client.on_error().connect({
            let errors = errors.clone();
            move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });
        event_loop.stop();

        let (status, data) = client.call("SayHello", Bytes::new());
        assert_eq!(status.code(), StatusCode::Unavailable);
        assert!(data.is_empty());
        assert!(client.call_async("SayHello", Bytes::new()).is_none());
        assert!(client.subscribe("Watch", Bytes::new(), |_| {}).is_none());
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }
}
