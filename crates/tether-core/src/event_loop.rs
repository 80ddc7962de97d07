//! Owning event loop and cross-context dispatch.
//!
//! A client and every handle it spawns mutate their state on exactly one
//! thread: the event loop. The loop is a dedicated OS thread driving a tokio
//! current-thread runtime that drains a task queue and services timers.
//!
//! ```text
//!   caller thread                 queue                 loop thread
//!   ┌────────────────────┐   ───────────────▶   ┌────────────────────────┐
//!   │ invoke_blocking(f) │                      │ runs f(), fulfils the  │
//!   │ blocks on oneshot  │   ◀───────────────   │ oneshot with its value │
//!   └────────────────────┘      oneshot         └────────────────────────┘
//! ```
//!
//! Calls made on the loop thread itself run inline, so public entry points
//! can marshal unconditionally without deadlocking.

use crate::config::LoopConfig;
use crate::error::{Result, RpcError};
use std::fmt;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Quit,
}

struct LoopShared {
    name: String,
    thread_id: ThreadId,
    tx: mpsc::UnboundedSender<Message>,
    runtime: Handle,
}

/// Clonable, thread-safe handle to an owning event loop.
#[derive(Clone)]
pub struct EventLoopHandle {
    inner: Arc<LoopShared>,
}

impl EventLoopHandle {
    /// Name of the loop thread.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is the loop thread.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Whether the loop still accepts work.
    pub fn is_running(&self) -> bool {
        !self.inner.tx.is_closed()
    }

    /// Queue `f` for execution on the loop without waiting for it.
    ///
    /// Tasks run in the order they were posted.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .tx
            .send(Message::Run(Box::new(f)))
            .map_err(|_| RpcError::EventLoopStopped)
    }

    /// Run `f` now if on the loop thread, otherwise queue it.
    ///
    /// Used for event delivery, where a foreign caller must not wait.
    pub fn run_or_post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            f();
            return Ok(());
        }
        self.post(f)
    }

    /// Run `f` on the loop and return its result, blocking the caller until
    /// it has run.
    ///
    /// On the loop thread `f` runs inline. If the loop stops before running
    /// `f`, returns [`RpcError::EventLoopStopped`] instead of blocking forever.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a foreign async runtime, where blocking
    /// the worker thread is not allowed. Call it from `spawn_blocking` or a
    /// plain thread instead.
    pub fn invoke_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move || {
            let _ = reply_tx.send(f());
        })?;

        reply_rx
            .blocking_recv()
            .map_err(|_| RpcError::EventLoopStopped)
    }

    /// Run `f` on the loop once `delay` has elapsed.
    ///
    /// Dropped silently if the loop stops first.
    pub fn single_shot<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            debug!("Event loop {} stopped, timer discarded", self.inner.name);
            return;
        }

        self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
    }

    fn quit(&self) {
        let _ = self.inner.tx.send(Message::Quit);
    }
}

impl fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("name", &self.inner.name)
            .field("thread_id", &self.inner.thread_id)
            .finish()
    }
}

/// An owning event loop thread. Dropping it stops the loop.
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start a loop on a new thread with the default name.
    pub fn new() -> Result<Self> {
        Self::spawn(LoopConfig::THREAD_NAME)
    }

    /// Start a loop on a new thread called `name`.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let runtime_handle = runtime.handle().clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(runtime, rx))?;

        info!("Event loop {} started", name);

        let handle = EventLoopHandle {
            inner: Arc::new(LoopShared {
                name,
                thread_id: thread.thread().id(),
                tx,
                runtime: runtime_handle,
            }),
        };

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    fn run(runtime: Runtime, mut rx: mpsc::UnboundedReceiver<Message>) {
        runtime.block_on(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Run(task) => task(),
                    Message::Quit => break,
                }
            }
        });
    }

    pub fn handle(&self) -> &EventLoopHandle {
        &self.handle
    }

    /// Stop the loop and wait for its thread to exit.
    ///
    /// Tasks still queued are dropped without running; callers blocked in
    /// `invoke_blocking` on them get [`RpcError::EventLoopStopped`].
    pub fn stop(&mut self) {
        self.handle.quit();
        let Some(thread) = self.thread.take() else {
            return;
        };

        if self.handle.is_current() {
            // Cannot join ourselves; the loop exits after the current task.
            return;
        }

        if thread.join().is_err() {
            warn!("Event loop {} panicked", self.handle.name());
        } else {
            info!("Event loop {} stopped", self.handle.name());
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_invoke_from_foreign_thread_runs_on_loop() {
        let event_loop = EventLoop::spawn("test-loop").unwrap();
        let handle = event_loop.handle().clone();

        assert!(!handle.is_current());
        let on_loop = handle
            .invoke_blocking({
                let handle = handle.clone();
                move || handle.is_current()
            })
            .unwrap();
        assert!(on_loop);

        let name = handle
            .invoke_blocking(|| std::thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-loop"));
    }

    #[test]
    fn test_nested_invoke_runs_inline() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle().clone();

        let value = handle
            .invoke_blocking({
                let handle = handle.clone();
                move || handle.invoke_blocking(|| 21 * 2).unwrap()
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_post_preserves_order() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle().clone();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            handle.post(move || seen.lock().push(i)).unwrap();
        }
        handle.invoke_blocking(|| ()).unwrap();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_invocations_never_interleave() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle().clone();
        let busy = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                let busy = busy.clone();
                let completed = completed.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let busy = busy.clone();
                        let completed = completed.clone();
                        handle
                            .invoke_blocking(move || {
                                assert!(!busy.swap(true, Ordering::SeqCst));
                                completed.fetch_add(1, Ordering::SeqCst);
                                busy.store(false, Ordering::SeqCst);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn test_single_shot_fires_on_loop_after_delay() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle().clone();
        let (tx, rx) = std::sync::mpsc::channel();

        let started = std::time::Instant::now();
        let checker = handle.clone();
        handle.single_shot(Duration::from_millis(30), move || {
            let _ = tx.send(checker.is_current());
        });

        let on_loop = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(on_loop);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_invoke_after_stop_returns_error() {
        let mut event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle().clone();
        event_loop.stop();

        assert!(!handle.is_running());
        assert!(matches!(
            handle.invoke_blocking(|| 1),
            Err(RpcError::EventLoopStopped)
        ));
        assert!(handle.post(|| ()).is_err());
        // Timers on a stopped loop are discarded rather than panicking.
        handle.single_shot(Duration::from_millis(1), || ());
    }
}
