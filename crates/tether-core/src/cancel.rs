//! Cancellation token for channel-side work.
//!
//! Channels run calls and stream deliveries off the owning loop. The client
//! signals "stop" through events (a stream's `finished`, a reply's abort);
//! a channel turns that into a `CancellationToken` its worker polls.

use crate::status::{Status, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token for cooperative cancellation of channel work.
///
/// Clones share state: cancelling any clone cancels all of them.
///
/// # Example
///
/// ```
/// use tether_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// // In the worker
/// // while !worker_token.is_cancelled() {
/// //     // deliver the next message
/// // }
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Returns `true` if this call made the change.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check cancellation and return a `Cancelled` status if set.
    ///
    /// Convenient inside delivery loops that report a final status.
    pub fn check(&self) -> Result<(), Status> {
        if self.is_cancelled() {
            Err(Status::new(StatusCode::Cancelled, "Operation was cancelled"))
        } else {
            Ok(())
        }
    }
}
