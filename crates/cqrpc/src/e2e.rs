//! End-to-end tests: client manager and server over the loopback transport

use std::fmt::Debug;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::*;

const TIMES_100: &str = "Times100";
const ECHO: &str = "Echo";
const COLLECT: &str = "Collect";
const COUNTDOWN: &str = "Countdown";
/// Registered, but no server ever accepts them
const STALLED: &str = "Stalled";
const STALLED_STREAM: &str = "StalledStream";

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

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

/// Replies once on accept, once per read and once at end of stream
struct Echo {
    service: LoopbackService,
}

impl StreamHandler for Echo {
    type Request = i64;
    type Response = i64;

    fn on_request(&mut self, accept: StreamAccept<Self>) {
        self.service.request_stream(ECHO, accept);
    }

    fn on_accept(&mut self, ctx: &StreamContext<i64>) {
        ctx.write(0);
    }

    fn on_read(&mut self, ctx: &StreamContext<i64>, msg: i64) {
        ctx.write(msg * 10);
    }

    fn on_read_done_or_error(&mut self, ctx: &StreamContext<i64>) {
        ctx.write(-1);
        ctx.finish(Status::ok());
    }
}

/// Client-streaming: records every message, answers with the count
struct Collect {
    service: LoopbackService,
    seen: Arc<Mutex<Vec<i64>>>,
    count: i64,
}

impl StreamHandler for Collect {
    type Request = i64;
    type Response = i64;

    fn on_request(&mut self, accept: StreamAccept<Self>) {
        self.service.request_stream(COLLECT, accept);
    }

    fn on_read(&mut self, _ctx: &StreamContext<i64>, msg: i64) {
        self.seen.lock().push(msg);
        self.count += 1;
    }

    fn on_read_done_or_error(&mut self, ctx: &StreamContext<i64>) {
        ctx.write(self.count);
        ctx.finish(Status::ok());
    }
}

/// Server-streaming: answers `n` with `n, n-1, ..., 1`
struct Countdown {
    service: LoopbackService,
}

impl StreamHandler for Countdown {
    type Request = i64;
    type Response = i64;

    fn on_request(&mut self, accept: StreamAccept<Self>) {
        self.service.request_stream(COUNTDOWN, accept);
    }

    fn on_read(&mut self, ctx: &StreamContext<i64>, n: i64) {
        for i in (1..=n).rev() {
            ctx.write(i);
        }
    }

    fn on_read_done_or_error(&mut self, ctx: &StreamContext<i64>) {
        ctx.finish(Status::ok());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ev {
    Read(i64),
    Done(Code),
    Response(i64, Code),
    Error(CallError),
}

struct Fixture {
    client: ClientManager,
    server: Server,
    service: LoopbackService,
    seen: Arc<Mutex<Vec<i64>>>,
}

fn fixture() -> Fixture {
    let service = LoopbackService::new();
    service.add_unary::<i64, i64>(TIMES_100);
    service.add_unary::<i64, i64>(STALLED);
    service.add_stream::<i64, i64>(STALLED_STREAM);
    service.add_stream::<i64, i64>(ECHO);
    service.add_stream::<i64, i64>(COLLECT);
    service.add_stream::<i64, i64>(COUNTDOWN);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let server = Server::new(2).unwrap();
    let svc = service.clone();
    server
        .register_unary_handler(move || Times100 {
            service: svc.clone(),
        })
        .unwrap();
    let svc = service.clone();
    server
        .register_stream_handler(move || Echo {
            service: svc.clone(),
        })
        .unwrap();
    let (svc, s) = (service.clone(), Arc::clone(&seen));
    server
        .register_stream_handler(move || Collect {
            service: svc.clone(),
            seen: Arc::clone(&s),
            count: 0,
        })
        .unwrap();
    let svc = service.clone();
    server
        .register_stream_handler(move || Countdown {
            service: svc.clone(),
        })
        .unwrap();
    server.start().unwrap();

    let client = ClientManager::new(2).unwrap();
    client.start().unwrap();

    Fixture {
        client,
        server,
        service,
        seen,
    }
}

/// Nothing arrives for a while; the caller still holds a sender
fn assert_quiet<T: Debug>(rx: &mpsc::Receiver<T>, wait: Duration) {
    match rx.recv_timeout(wait) {
        Err(mpsc::RecvTimeoutError::Timeout) => {}
        other => panic!("expected no event, got {other:?}"),
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

impl Fixture {
    fn unary(&self, method: &'static str, request: i64, tx: mpsc::Sender<Ev>) -> UnaryHandle<i64> {
        let service = self.service.clone();
        let tx_err = tx.clone();
        self.client
            .create_unary_call(
                move |ctx, req| service.unary(method, ctx, req),
                request,
                move |resp, status| {
                    let _ = tx.send(Ev::Response(resp, status.code()));
                },
                move |err| {
                    let _ = tx_err.send(Ev::Error(err));
                },
            )
            .unwrap()
    }

    fn bidi(&self, method: &'static str, tx: mpsc::Sender<Ev>) -> BidiHandle<i64, i64> {
        let service = self.service.clone();
        let (tx_done, tx_err) = (tx.clone(), tx.clone());
        self.client
            .create_bidi_stream(
                move |ctx| service.bidi(method, ctx),
                move |msg| {
                    let _ = tx.send(Ev::Read(msg));
                },
                move |status| {
                    let _ = tx_done.send(Ev::Done(status.code()));
                },
                move |err| {
                    let _ = tx_err.send(Ev::Error(err));
                },
            )
            .unwrap()
    }
}

#[test]
fn test_unary_times_100() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let _calls: Vec<_> = (0..100).map(|i| fx.unary(TIMES_100, i, tx.clone())).collect();

    let mut answers = Vec::new();
    for _ in 0..100 {
        match rx.recv_timeout(WAIT).unwrap() {
            Ev::Response(resp, code) => {
                assert_eq!(code, Code::Ok);
                answers.push(resp);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    answers.sort_unstable();
    assert_eq!(answers, (0..100).map(|i| i * 100).collect::<Vec<_>>());
    // Exactly one outcome per call
    assert_quiet(&rx, QUIET);
}

#[test]
fn test_bidi_reply_sequence() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let call = fx.bidi(ECHO, tx.clone());
    call.write(1).unwrap();
    call.write(2).unwrap();
    call.writes_done();

    let events: Vec<Ev> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(
        events,
        vec![
            Ev::Read(0),
            Ev::Read(10),
            Ev::Read(20),
            Ev::Read(-1),
            Ev::Done(Code::Ok),
        ]
    );
    assert_quiet(&rx, QUIET);
    assert!(call.is_closed());
}

#[test]
fn test_rapid_writes_arrive_in_order() {
    const N: i64 = 500;
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let service = fx.service.clone();
    let tx_err = tx.clone();
    let call = fx
        .client
        .create_client_stream_writer(
            move |ctx| service.client_stream(COLLECT, ctx),
            move |resp: i64, status| {
                let _ = tx.send(Ev::Response(resp, status.code()));
            },
            move |err| {
                let _ = tx_err.send(Ev::Error(err));
            },
        )
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..N {
        ids.push(call.write(i).unwrap());
    }
    call.writes_done();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ev::Response(N, Code::Ok));
    assert_eq!(*fx.seen.lock(), (0..N).collect::<Vec<_>>());
    assert!(matches!(call.write(0), Err(Error::Closed | Error::WritesDone)));
}

#[test]
fn test_server_stream() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let service = fx.service.clone();
    let (tx_read, tx_done, tx_err) = (tx.clone(), tx.clone(), tx.clone());
    let _call = fx
        .client
        .create_server_stream_reader(
            move |ctx, req| service.server_stream(COUNTDOWN, ctx, req),
            3i64,
            move |msg| {
                let _ = tx_read.send(Ev::Read(msg));
            },
            move |status| {
                let _ = tx_done.send(Ev::Done(status.code()));
            },
            move |err| {
                let _ = tx_err.send(Ev::Error(err));
            },
        )
        .unwrap();

    let events: Vec<Ev> = (0..4).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(
        events,
        vec![Ev::Read(3), Ev::Read(2), Ev::Read(1), Ev::Done(Code::Ok)]
    );
    assert_quiet(&rx, QUIET);
}

#[test]
fn test_unknown_method_reports_error() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let _stream = fx.bidi("Missing", tx.clone());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ev::Error(CallError::Connect));

    let _unary = fx.unary("Missing", 1, tx.clone());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ev::Error(CallError::Finish));
    assert_quiet(&rx, QUIET);
}

#[test]
fn test_drop_before_completion() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let call = fx.unary(STALLED, 1, tx.clone());
    let stream = fx.bidi(STALLED_STREAM, tx.clone());
    drop(call);
    drop(stream);

    assert_quiet(&rx, QUIET);
    assert!(wait_until(|| fx.client.live_calls() == 0));
    assert_eq!(fx.service.backlog_len(STALLED), 1);
}

#[test]
fn test_alarm_cancel_before_fire() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let t = tx.clone();
    let alarm = fx
        .client
        .create_alarm(Duration::from_millis(300), move || {
            let _ = t.send(());
        })
        .unwrap();
    alarm.cancel();
    assert_quiet(&rx, Duration::from_millis(600));
}

#[test]
fn test_alarm_cancel_after_fire() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    let alarm = fx
        .client
        .create_alarm(Duration::from_millis(10), move || {
            let _ = tx.send(1);
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);
    alarm.cancel();
    assert_quiet(&rx, QUIET);

    // Still usable after a cancel
    assert!(alarm.set(Duration::from_millis(10), move || {
        let _ = tx2.send(2);
    }));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
}

#[test]
fn test_double_shutdown() {
    let fx = fixture();
    fx.client.shutdown();
    fx.client.shutdown();
    fx.server.shutdown();
    fx.server.shutdown();
    assert!(!fx.client.is_running());
    assert!(!fx.server.is_running());
}

#[test]
fn test_factory_after_shutdown() {
    let fx = fixture();
    fx.client.shutdown();
    let service = fx.service.clone();
    let result = fx.client.create_unary_call(
        move |ctx, req: i64| service.unary(TIMES_100, ctx, req),
        1,
        |_: i64, _| {},
        |_| {},
    );
    assert!(matches!(result, Err(Error::ShutDown)));
    assert!(matches!(
        fx.client.create_alarm(Duration::from_millis(1), || {}),
        Err(Error::ShutDown)
    ));
}

#[test]
fn test_registry_collects_dropped_handles() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let calls: Vec<_> = (0..10).map(|i| fx.unary(TIMES_100, i, tx.clone())).collect();
    for _ in 0..10 {
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Ev::Response(_, Code::Ok)));
    }
    assert_eq!(fx.client.registry_len(), 10);

    drop(calls);
    let _live = fx.unary(TIMES_100, 1, tx);
    assert_eq!(fx.client.registry_len(), 1);
}

#[test]
fn test_server_shutdown_ends_open_stream() {
    let fx = fixture();
    let (tx, rx) = mpsc::channel();
    let _call = fx.bidi(ECHO, tx.clone());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ev::Read(0));

    fx.server.shutdown();
    let terminal = rx.recv_timeout(WAIT).unwrap();
    assert!(
        matches!(terminal, Ev::Done(_) | Ev::Error(_)),
        "unexpected {terminal:?}"
    );
    assert_quiet(&rx, QUIET);
}
