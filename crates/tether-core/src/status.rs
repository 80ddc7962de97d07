//! Call status values.
//!
//! Every call-like operation in the client produces exactly one [`Status`]:
//! a [`StatusCode`] plus a human-readable message. The code set follows the
//! gRPC status codes so channel implementations can pass transport results
//! through unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl From<i32> for StatusCode {
    /// Decode a numeric code. Values outside the known range map to `Unknown`.
    fn from(value: i32) -> Self {
        match value {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            2 => StatusCode::Unknown,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// Message carried by the status returned when no channel is attached.
pub const NO_CHANNEL_MESSAGE: &str = "No channel(s) attached.";

/// Outcome of a call: a code and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Successful status with an empty message.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, String::new())
    }

    /// Status reported by a client that has no channel attached.
    pub fn no_channel() -> Self {
        Self::new(StatusCode::Unknown, NO_CHANNEL_MESSAGE)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl PartialEq<StatusCode> for Status {
    fn eq(&self, other: &StatusCode) -> bool {
        self.code == *other
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_channel_status() {
        let status = Status::no_channel();
        assert_eq!(status.code(), StatusCode::Unknown);
        assert_eq!(status.message(), "No channel(s) attached.");
        assert!(!status.is_ok());
    }

    #[test]
    fn test_status_compares_with_code() {
        assert!(Status::ok() == StatusCode::Ok);
        assert!(Status::new(StatusCode::NotFound, "gone") != StatusCode::Ok);
    }

    #[test]
    fn test_unknown_numeric_code_decodes_as_unknown() {
        assert_eq!(StatusCode::from(14), StatusCode::Unavailable);
        assert_eq!(StatusCode::from(42), StatusCode::Unknown);
        assert_eq!(StatusCode::from(-1), StatusCode::Unknown);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::ok().to_string(), "OK");
        assert_eq!(
            Status::new(StatusCode::Unavailable, "connection reset").to_string(),
            "UNAVAILABLE: connection reset"
        );
    }

    #[test]
    fn test_status_serializes_with_code_name() {
        let json = serde_json::to_value(Status::new(StatusCode::Aborted, "stop")).unwrap();
        assert_eq!(json["code"], "Aborted");
        assert_eq!(json["message"], "stop");
    }
}
