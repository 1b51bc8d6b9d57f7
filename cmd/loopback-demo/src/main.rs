//! Loopback demo
//!
//! Runs a client manager and a server in one process over the loopback
//! transport: a batch of unary calls, one bidirectional stream and an alarm.
//!
//! # Environment Variables
//!
//! - `RUST_LOG=debug` - Log filter (default `info`)
//! - `CQRPC_THREADS=4` - Event loops per manager
//! - `CQRPC_MAX_CALLS=1024` - Live call limit per manager
//! - `CQRPC_TIMER_POLL_MS=5` - Timer thread poll interval
//! - `DEMO_CALLS=100` - Number of unary calls
//! - `DEMO_MESSAGES=8` - Messages sent on the bidirectional stream

use std::sync::mpsc;
use std::time::{Duration, Instant};

use cqrpc::{
    env_get, ClientManager, LoopbackService, ManagerConfig, Result, Server, Status, StreamAccept,
    StreamContext, StreamHandler, UnaryAccept, UnaryContext, UnaryHandler,
};
use tracing_subscriber::EnvFilter;

const TIMES_100: &str = "demo.Times100";
const ECHO: &str = "demo.Echo";

struct Times100 {
    service: LoopbackService,
}

impl UnaryHandler for Times100 {
    type Request = i64;
    type Response = i64;

    fn on_request(&mut self, accept: UnaryAccept<Self>) {
        self.service.request_unary(TIMES_100, accept);
    }

    fn on_accept(&mut self, ctx: &UnaryContext<i64>, request: i64) {
        ctx.finish(request * 100, Status::ok());
    }
}

struct Echo {
    service: LoopbackService,
    reads: usize,
}

impl StreamHandler for Echo {
    type Request = String;
    type Response = String;

    fn on_request(&mut self, accept: StreamAccept<Self>) {
        self.service.request_stream(ECHO, accept);
    }

    fn on_accept(&mut self, ctx: &StreamContext<String>) {
        ctx.write("hello".to_string());
    }

    fn on_read(&mut self, ctx: &StreamContext<String>, msg: String) {
        self.reads += 1;
        ctx.write(msg.to_uppercase());
    }

    fn on_read_done_or_error(&mut self, ctx: &StreamContext<String>) {
        ctx.write(format!("bye after {} messages", self.reads));
        ctx.finish(Status::ok());
    }
}

enum Event {
    Reply(i64, Status),
    Read(String),
    Done(Status),
    Failed(String),
    Alarm,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// RUST_LOG=debug cargo run -p cqrpc-loopback-demo
fn main() -> Result<()> {
    init_logging();
    println!("=== cqrpc Loopback Demo ===\n");

    let calls: i64 = env_get("DEMO_CALLS", 100);
    let messages: usize = env_get("DEMO_MESSAGES", 8);

    let service = LoopbackService::new();
    service.add_unary::<i64, i64>(TIMES_100);
    service.add_stream::<String, String>(ECHO);

    let server = Server::with_config(ManagerConfig::from_env().thread_name("demo-server"))?;
    let svc = service.clone();
    server.register_unary_handler(move || Times100 {
        service: svc.clone(),
    })?;
    let svc = service.clone();
    server.register_stream_handler(move || Echo {
        service: svc.clone(),
        reads: 0,
    })?;
    server.start()?;

    let client = ClientManager::with_config(ManagerConfig::from_env().thread_name("demo-client"))?;
    client.start()?;
    println!(
        "Server and client running with {} event loop(s) each",
        client.config().threads
    );

    let (tx, rx) = mpsc::channel();
    let start = Instant::now();

    // Unary batch
    let mut handles = Vec::new();
    for i in 0..calls {
        let svc = service.clone();
        let (tx_ok, tx_err) = (tx.clone(), tx.clone());
        handles.push(client.create_unary_call(
            move |ctx, req| svc.unary(TIMES_100, ctx, req),
            i,
            move |resp, status| {
                let _ = tx_ok.send(Event::Reply(resp, status));
            },
            move |err| {
                let _ = tx_err.send(Event::Failed(err.to_string()));
            },
        )?);
    }

    // Bidirectional stream
    let svc = service.clone();
    let (tx_read, tx_done, tx_err) = (tx.clone(), tx.clone(), tx.clone());
    let stream = client.create_bidi_stream(
        move |ctx| svc.bidi(ECHO, ctx),
        move |msg| {
            let _ = tx_read.send(Event::Read(msg));
        },
        move |status| {
            let _ = tx_done.send(Event::Done(status));
        },
        move |err| {
            let _ = tx_err.send(Event::Failed(err.to_string()));
        },
    )?;
    for i in 0..messages {
        stream.write(format!("message {i}"))?;
    }
    stream.writes_done();

    // Alarm
    let tx_alarm = tx.clone();
    let _alarm = client.create_alarm(Duration::from_millis(50), move || {
        let _ = tx_alarm.send(Event::Alarm);
    })?;
    drop(tx);

    let expected = calls as usize + 2;
    let mut finished = 0;
    let mut replies = 0;
    let mut wrong = 0;
    let timeout = Duration::from_secs(10);
    while finished < expected {
        match rx.recv_timeout(timeout) {
            Ok(Event::Reply(resp, status)) => {
                replies += 1;
                finished += 1;
                if !status.is_ok() || resp % 100 != 0 {
                    wrong += 1;
                }
            }
            Ok(Event::Read(msg)) => println!("  stream <- {msg}"),
            Ok(Event::Done(status)) => {
                println!("  stream finished: {status}");
                finished += 1;
            }
            Ok(Event::Failed(err)) => {
                tracing::error!(%err, "call failed");
                finished += 1;
            }
            Ok(Event::Alarm) => {
                println!("  alarm fired after {:?}", start.elapsed());
                finished += 1;
            }
            Err(_) => {
                println!("WARNING: Timeout!");
                break;
            }
        }
    }

    println!(
        "\n{replies}/{calls} unary replies ({wrong} wrong) in {:?}",
        start.elapsed()
    );
    tracing::info!(
        client_calls = client.live_calls(),
        server_calls = server.live_calls(),
        "shutting down"
    );

    drop(handles);
    client.shutdown();
    server.shutdown();
    service.shutdown();

    println!("\n=== Demo Complete ===");
    Ok(())
}
