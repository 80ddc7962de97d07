//! Tether demo - drives a client against the in-process channel.
//!
//! Runs one blocking unary call, one asynchronous call and one tick stream
//! (optionally with an injected failure to show the reconnect path), then
//! cancels the stream and shuts the loop down.

mod service;

use anyhow::{bail, Context, Result};
use clap::Parser;
use service::{GreeterService, HelloReply, HelloRequest, Tick, TicksRequest, SERVICE_NAME};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    AsyncReplyHandle, Client, EventLoop, EventLoopHandle, LocalChannel, ReconnectConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "tether-rpc")]
#[command(about = "Exercise the tether client against an in-process service")]
struct Args {
    /// Name sent in the greeting calls
    #[arg(long, default_value = "world")]
    name: String,

    /// Number of stream ticks to receive before cancelling
    #[arg(long, default_value = "5")]
    ticks: usize,

    /// Milliseconds between ticks
    #[arg(long, default_value = "100")]
    interval_ms: u64,

    /// Break the first tick stream after this many ticks
    #[arg(long)]
    fail_after: Option<u64>,

    /// Milliseconds before a broken stream is resubscribed
    #[arg(long, default_value = "1000")]
    reconnect_ms: u64,

    /// Seconds to wait for any single reply or tick
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting tether demo");

    let mut event_loop = EventLoop::new().context("failed to start event loop")?;
    let client = Client::builder(SERVICE_NAME)
        .reconnect(ReconnectConfig::new().with_delay(Duration::from_millis(args.reconnect_ms)))
        .build(event_loop.handle());

    client.on_error().connect(|status| warn!("Client error: {}", status));

    let channel = LocalChannel::new().with_service(SERVICE_NAME, GreeterService::new(args.fail_after));
    let attach = client.clone();
    event_loop
        .handle()
        .invoke_blocking(move || attach.attach_channel(Arc::new(channel)))??;

    let timeout = Duration::from_secs(args.timeout_secs);
    run_unary(&client, &args.name)?;
    run_async(&client, event_loop.handle(), &args.name, timeout)?;
    run_stream(&client, event_loop.handle(), &args, timeout)?;

    drop(client);
    event_loop.stop();
    info!("Demo finished");
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true);
    if args.log_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn run_unary(client: &Client, name: &str) -> Result<()> {
    let reply: HelloReply = client.call_message(
        "SayHello",
        &HelloRequest {
            name: name.to_owned(),
        },
    )?;
    info!("Unary reply: {}", reply.message);
    Ok(())
}

fn run_async(client: &Client, owner: &EventLoopHandle, name: &str, timeout: Duration) -> Result<()> {
    let payload = client.serializer().serialize(&HelloRequest {
        name: format!("{} (async)", name),
    })?;
    let Some(reply) = client.call_async("SayHello", payload) else {
        bail!("async call was not dispatched");
    };

    wait_for_reply(owner, &reply, timeout)?;
    let message: HelloReply = reply.read()?;
    info!("Async reply: {}", message.message);
    Ok(())
}

/// Block until `reply` reaches a terminal state.
///
/// Subscribing happens on the owning loop, so an event delivered in between
/// cannot be missed.
fn wait_for_reply(owner: &EventLoopHandle, reply: &AsyncReplyHandle, timeout: Duration) -> Result<()> {
    let (done_tx, done_rx) = mpsc::channel();
    let watched = reply.clone();
    owner.invoke_blocking(move || {
        if watched.is_finished() {
            let _ = done_tx.send(());
            return;
        }
        let on_error = done_tx.clone();
        watched.on_finished().connect(move |_| {
            let _ = done_tx.send(());
        });
        watched.on_error().connect(move |_| {
            let _ = on_error.send(());
        });
    })?;

    done_rx
        .recv_timeout(timeout)
        .context("timed out waiting for async reply")
}

fn run_stream(client: &Client, owner: &EventLoopHandle, args: &Args, timeout: Duration) -> Result<()> {
    let (tick_tx, tick_rx) = mpsc::channel();
    let stream = client.subscribe_message(
        "Ticks",
        &TicksRequest {
            interval_ms: args.interval_ms,
        },
        move |tick: Tick| {
            info!("Tick {}", tick.index);
            let _ = tick_tx.send(tick.index);
        },
    )?;

    let mut received = 0;
    while received < args.ticks {
        if tick_rx.recv_timeout(timeout).is_err() {
            warn!("No tick within {:?}, giving up", timeout);
            break;
        }
        received += 1;
    }

    stream.cancel();
    owner.invoke_blocking(|| ())?;
    info!(
        "Received {} ticks; stream finished: {}, active streams: {}",
        received,
        stream.is_finished(),
        client.active_stream_count()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_flags_parse() {
        let args = Args::try_parse_from(["tether-rpc", "--log-json", "-d"]).unwrap();
        assert!(args.log_json);
        assert!(args.debug);

        let args = Args::try_parse_from(["tether-rpc"]).unwrap();
        assert!(!args.log_json);
        assert!(!args.debug);
    }
}
