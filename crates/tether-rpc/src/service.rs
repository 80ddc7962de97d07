//! Demo greeter service served through the in-process channel.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tether_core::{LocalService, Status, StatusCode, StreamSink};
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "Greeter";

#[derive(Debug, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicksRequest {
    pub interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Tick {
    pub index: u64,
}

/// Greets callers and streams ticks until the subscriber goes away.
///
/// With `fail_after` set, the first tick stream breaks after that many ticks
/// so the client's reconnect path can be observed.
pub struct GreeterService {
    fail_after: Option<u64>,
    failed_once: AtomicBool,
    ticks: AtomicU64,
}

impl GreeterService {
    pub fn new(fail_after: Option<u64>) -> Self {
        Self {
            fail_after,
            failed_once: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    fn should_fail(&self, sent: u64) -> bool {
        match self.fail_after {
            Some(limit) if sent >= limit => !self.failed_once.swap(true, Ordering::SeqCst),
            _ => false,
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &Bytes) -> Result<T, Status> {
    serde_json::from_slice(payload)
        .map_err(|e| Status::new(StatusCode::InvalidArgument, format!("Invalid request: {}", e)))
}

fn encode<T: Serialize>(message: &T) -> Result<Bytes, Status> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| Status::new(StatusCode::Internal, e.to_string()))
}

impl LocalService for GreeterService {
    fn unary(&self, method: &str, payload: &Bytes) -> Result<Bytes, Status> {
        match method {
            "SayHello" => {
                let request: HelloRequest = decode(payload)?;
                debug!("SayHello from {}", request.name);
                encode(&HelloReply {
                    message: format!("Hello, {}!", request.name),
                })
            }
            _ => Err(Status::new(
                StatusCode::Unimplemented,
                format!("Unknown method: {}", method),
            )),
        }
    }

    fn server_stream(&self, method: &str, payload: &Bytes, sink: &StreamSink) -> Status {
        if method != "Ticks" {
            return Status::new(
                StatusCode::Unimplemented,
                format!("Unknown stream: {}", method),
            );
        }
        let request: TicksRequest = match decode(payload) {
            Ok(request) => request,
            Err(status) => return status,
        };

        let mut sent = 0;
        loop {
            if let Err(status) = sink.token().check() {
                debug!("Tick stream stopped after {} ticks: {}", sent, status);
                return status;
            }
            if self.should_fail(sent) {
                info!("Injecting stream failure after {} ticks", sent);
                return Status::new(StatusCode::Unavailable, "Injected stream failure");
            }

            let index = self.ticks.fetch_add(1, Ordering::SeqCst);
            let tick = match encode(&Tick { index }) {
                Ok(tick) => tick,
                Err(status) => return status,
            };
            if !sink.send(tick) {
                debug!("Tick stream cancelled after {} ticks", sent);
                return Status::ok();
            }
            sent += 1;
            std::thread::sleep(Duration::from_millis(request.interval_ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_say_hello() {
        let service = GreeterService::new(None);
        let payload = encode(&HelloRequest { name: "ada".into() }).unwrap();

        let reply: HelloReply = decode(&service.unary("SayHello", &payload).unwrap()).unwrap();
        assert_eq!(reply.message, "Hello, ada!");
    }

    #[test]
    fn test_bad_request_is_invalid_argument() {
        let service = GreeterService::new(None);
        let status = service
            .unary("SayHello", &Bytes::from_static(b"not json"))
            .unwrap_err();
        assert_eq!(status.code(), StatusCode::InvalidArgument);
    }

    #[test]
    fn test_unknown_method_is_unimplemented() {
        let service = GreeterService::new(None);
        let status = service.unary("Shout", &Bytes::new()).unwrap_err();
        assert_eq!(status.code(), StatusCode::Unimplemented);
    }

    #[test]
    fn test_failure_injected_once() {
        let service = GreeterService::new(Some(2));
        assert!(!service.should_fail(1));
        assert!(service.should_fail(2));
        assert!(!service.should_fail(2));
    }
}
