//! Error types for the dispatch core.
//!
//! Most client operations report failures as a [`Status`] because that is
//! what channels produce. `RpcError` covers the cases that do not come from a
//! channel (contract violations, a stopped event loop, codec failures) and is
//! what the typed helpers return.

use crate::status::{Status, StatusCode};
use thiserror::Error;

/// Main error type for the dispatch core.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("No channel(s) attached.")]
    NoChannelAttached,

    #[error("Channel error: {0}")]
    Channel(Status),

    /// An owner-only operation was invoked from a foreign thread.
    #[error("{operation} called from a thread other than the client's owning event loop")]
    ForeignContext { operation: &'static str },

    #[error("A channel is already attached to client for {service}")]
    ChannelAlreadyAttached { service: String },

    #[error("Owning event loop is not running")]
    EventLoopStopped,

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Client was dropped before the operation completed")]
    ClientDropped,

    /// The reply was read before the call finished.
    #[error("Reply is still pending")]
    ReplyPending,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dispatch core operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        RpcError::Channel(status)
    }
}

impl RpcError {
    /// Convert to the status a caller would observe for this failure.
    pub fn to_status(&self) -> Status {
        match self {
            RpcError::NoChannelAttached => Status::no_channel(),
            RpcError::Channel(status) => status.clone(),
            RpcError::ForeignContext { .. } => {
                Status::new(StatusCode::FailedPrecondition, self.to_string())
            }
            RpcError::ChannelAlreadyAttached { .. } => {
                Status::new(StatusCode::AlreadyExists, self.to_string())
            }
            RpcError::EventLoopStopped | RpcError::ClientDropped | RpcError::ReplyPending => {
                Status::new(StatusCode::Unavailable, self.to_string())
            }
            RpcError::Serialization { .. } => Status::new(StatusCode::Internal, self.to_string()),
            RpcError::Io(_) => Status::new(StatusCode::Internal, self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::ForeignContext {
            operation: "attach_channel",
        };
        assert_eq!(
            err.to_string(),
            "attach_channel called from a thread other than the client's owning event loop"
        );
    }

    #[test]
    fn test_no_channel_maps_to_unknown_status() {
        assert_eq!(RpcError::NoChannelAttached.to_status(), Status::no_channel());
    }

    #[test]
    fn test_channel_status_passes_through() {
        let status = Status::new(StatusCode::PermissionDenied, "denied");
        assert_eq!(RpcError::from(status.clone()).to_status(), status);
    }

    #[test]
    fn test_stopped_loop_is_unavailable() {
        assert_eq!(
            RpcError::EventLoopStopped.to_status().code(),
            StatusCode::Unavailable
        );
    }

    #[test]
    fn test_json_error_converts() {
        let err: RpcError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, RpcError::Serialization { source: Some(_), .. }));
        assert_eq!(err.to_status().code(), StatusCode::Internal);
    }
}
