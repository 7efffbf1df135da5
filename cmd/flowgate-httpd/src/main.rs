//! # flowgate HTTP/1.1 Server
//!
//! One OS thread per connection. The connection thread reads and buffers a
//! full request, then hands it to the engine; the workflow below walks all
//! four step kinds before the listener renders the response.
//!
//! ## Workflow
//!
//! | Step     | Kind    | Runs on                | Does                              |
//! |----------|---------|------------------------|-----------------------------------|
//! | route    | IO      | connection thread      | 404 / health check short-circuit  |
//! | render   | COMPUTE | compute worker         | echo or upper-case the body       |
//! | audit    | BLOCK   | blocking pool          | optional `x-delay-ms` sleep       |
//! | stamp    | ASYNC   | notifier thread        | adds `x-elapsed-us` on completion |
//!
//! ## Routes
//!
//! - `GET  /health` - `ok`
//! - `POST /echo`   - body echoed back
//! - `POST /upper`  - body upper-cased
//!
//! ## Usage
//!
//!     cargo run -p flowgate-httpd --release -- [--port 8080] [--workers 4] [--timeout-ms 1000]
//!
//! Every `FLOWGATE_*` variable read by `Settings::from_env` applies too;
//! `RUST_LOG=flowgate=debug` shows per-request outcomes.
//!
//! ## Try it
//!
//!     curl -d 'hello' http://127.0.0.1:8080/upper
//!     curl -d 'slow' -H 'x-delay-ms: 2000' http://127.0.0.1:8080/echo   # 504
//!     wrk -t4 -c100 -d10s -s post.lua http://127.0.0.1:8080/echo

use flowgate::{
    BufferedRequest, Completion, DefaultListener, Engine, Exchange, HttpResponse, Settings, Step,
    StepError, StepResult, Workflow,
};
use flowgate_core::response::reason_phrase;
use flowgate_runtime::pin_current_thread;

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

// ── Configuration ──

const RECV_BUF_SIZE: usize = 4096;
const MAX_HEADER_BYTES: usize = 16 * 1024;

static RUNNING: AtomicBool = AtomicBool::new(true);
static TOTAL_REQUESTS: AtomicU64 = AtomicU64::new(0);
static TOTAL_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

// ── Per-request state ──

/// Parsed request head, carried through the workflow as exchange state
#[derive(Debug, Default)]
struct RequestHead {
    method: String,
    path: String,
    delay: Option<Duration>,
    keep_alive: bool,
}

impl RequestHead {
    fn parse(head: &[u8]) -> Option<(Self, usize)> {
        let text = std::str::from_utf8(head).ok()?;
        let mut lines = text.split("\r\n");

        let mut parts = lines.next()?.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();
        let version = parts.next()?;

        let mut req = RequestHead {
            method,
            path,
            delay: None,
            keep_alive: version == "HTTP/1.1",
        };
        let mut content_length = 0;

        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line.split_once(':')?;
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok()?;
            } else if name.eq_ignore_ascii_case("connection") {
                req.keep_alive = !value.eq_ignore_ascii_case("close");
            } else if name.eq_ignore_ascii_case("x-delay-ms") {
                req.delay = value.parse().ok().map(Duration::from_millis);
            }
        }
        Some((req, content_length))
    }
}

// ── Workflow ──

fn route(ex: &mut Exchange<RequestHead>) -> StepResult {
    let (method, path) = (ex.state().method.clone(), ex.state().path.clone());
    match (method.as_str(), path.as_str()) {
        ("GET", "/health") => {
            ex.set_content_type("text/plain");
            ex.write_str("ok\n")?;
            ex.complete();
        }
        ("POST", "/echo") | ("POST", "/upper") => {
            ex.set_content_type("application/octet-stream");
        }
        _ => {
            ex.set_status(404);
            ex.set_content_type("text/plain");
            ex.write_str("not found\n")?;
            ex.complete();
        }
    }
    Ok(())
}

fn render(ex: &mut Exchange<RequestHead>) -> StepResult {
    if ex.state().path == "/upper" {
        let upper = ex.request().to_ascii_uppercase();
        ex.write(&upper)?;
    } else {
        ex.copy_request_to_response()?;
    }
    Ok(())
}

fn audit(ex: &mut Exchange<RequestHead>) -> StepResult {
    if let Some(delay) = ex.state().delay {
        thread::sleep(delay);
    }
    debug!(path = %ex.state().path, bytes = ex.response().len(), "audited");
    Ok(())
}

/// Pending stamp requests, completed off the exchange's thread
type StampJob = (Completion<RequestHead>, Instant);

fn spawn_notifier() -> io::Result<mpsc::Sender<StampJob>> {
    let (tx, rx) = mpsc::channel::<StampJob>();
    thread::Builder::new()
        .name("flowgate-notifier".into())
        .spawn(move || {
            for (completion, started) in rx {
                let elapsed = started.elapsed().as_micros();
                completion.succeed_with(move |ex| {
                    ex.add_header("x-elapsed-us", elapsed.to_string());
                    Ok(())
                });
            }
        })?;
    Ok(tx)
}

fn build_workflow(notifier: mpsc::Sender<StampJob>) -> Workflow<RequestHead> {
    Workflow::init(Step::io("route", route))
        .next(Step::compute("render", render))
        .next(Step::block("audit", audit))
        .next(Step::async_step("stamp", move |ex, completion| {
            notifier
                .send((completion, ex.started()))
                .map_err(|_| StepError::failed("notifier gone"))
        }))
        .build()
}

// ── HTTP response ──

fn write_response(stream: &mut TcpStream, resp: &HttpResponse, keep_alive: bool) -> io::Result<()> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nServer: flowgate-httpd\r\n",
        resp.status,
        reason_phrase(resp.status),
        resp.body.len()
    );
    if let Some(ct) = &resp.content_type {
        out.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    for (name, value) in &resp.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(if keep_alive {
        "Connection: keep-alive\r\n\r\n"
    } else {
        "Connection: close\r\n\r\n"
    });

    stream.write_all(out.as_bytes())?;
    stream.write_all(&resp.body)
}

fn bad_request(stream: &mut TcpStream) {
    let _ = write_response(stream, &HttpResponse::text(400, "bad request\n"), false);
}

// ── Per-connection handler ──

/// Find the end of the request head (`\r\n\r\n`)
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Keep-alive loop: read a request, run it through the engine, wait for
/// the response and write it back.
fn handle_connection(mut stream: TcpStream, engine: Arc<Engine<RequestHead>>) {
    let max_body = engine.settings().request_size.saturating_mul(4);
    let mut buf: Vec<u8> = Vec::with_capacity(RECV_BUF_SIZE);
    let mut chunk = [0u8; RECV_BUF_SIZE];

    ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);

    'conn: while RUNNING.load(Ordering::Relaxed) {
        // Read until the head is complete
        let end = loop {
            if let Some(end) = head_end(&buf) {
                break end;
            }
            if buf.len() >= MAX_HEADER_BYTES {
                bad_request(&mut stream);
                break 'conn;
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break 'conn,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let Some((head, content_length)) = RequestHead::parse(&buf[..end]) else {
            bad_request(&mut stream);
            break;
        };
        if content_length > max_body {
            warn!(content_length, "body far over request_size, closing");
            break;
        }

        // Buffer the body; oversize bodies still reach the engine for a 413
        while buf.len() < end + content_length {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break 'conn,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        let body = buf[end..end + content_length].to_vec();
        buf.drain(..end + content_length);

        TOTAL_REQUESTS.fetch_add(1, Ordering::Relaxed);
        let keep_alive = head.keep_alive;

        let (tx, rx) = mpsc::sync_channel(1);
        engine.handle(
            BufferedRequest::new(body, move |resp| {
                let _ = tx.send(resp);
            }),
            head,
        );

        let Ok(resp) = rx.recv() else {
            error!("exchange dropped without a response");
            break;
        };
        if write_response(&mut stream, &resp, keep_alive).is_err() || !keep_alive {
            break;
        }
    }

    ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
}

// ── Accept loop ──

fn accept_loop(listener: TcpListener, engine: Arc<Engine<RequestHead>>) {
    info!("accept loop running");

    while RUNNING.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _peer)) => {
                TOTAL_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let _ = stream.set_nodelay(true);

                let engine = Arc::clone(&engine);
                let io_cores = engine.settings().io_cores.clone();
                let spawned = thread::Builder::new()
                    .name("flowgate-conn".into())
                    .spawn(move || {
                        if let Some(cores) = io_cores {
                            if let Err(e) = pin_current_thread(&cores) {
                                warn!(error = %e, "failed to pin connection thread");
                            }
                        }
                        handle_connection(stream, engine);
                    });
                if let Err(e) = spawned {
                    error!(error = %e, "failed to spawn connection thread");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "accept error");
            }
        }
    }
}

// ── Stats printer ──

fn stats_loop(engine: Arc<Engine<RequestHead>>) {
    let start = Instant::now();
    let mut last_reqs: u64 = 0;

    loop {
        thread::sleep(Duration::from_secs(5));
        if !RUNNING.load(Ordering::Relaxed) {
            break;
        }

        let total_reqs = TOTAL_REQUESTS.load(Ordering::Relaxed);
        let stats = engine.stats();
        info!(
            elapsed_s = start.elapsed().as_secs(),
            active = ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
            total_conns = TOTAL_CONNECTIONS.load(Ordering::Relaxed),
            reqs = total_reqs,
            rps = (total_reqs - last_reqs) / 5,
            submitted = stats.submitted,
            rejected = stats.rejected,
            expired = stats.expired,
            executed = stats.executed,
            "stats"
        );
        last_reqs = total_reqs;
    }
}

// ── Main ──

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let args: Vec<String> = std::env::args().collect();

    // Phase 1: env (Settings::from_env reads FLOWGATE_*)
    let mut settings = Settings::from_env();
    let mut port: u16 = flowgate_core::env_get("FLOWGATE_PORT", 8080);

    // Phase 2: CLI flags override env vars
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if let Some(p) = args.get(i).and_then(|s| s.parse().ok()) { port = p; }
            }
            "--workers" | "-w" => {
                i += 1;
                if let Some(w) = args.get(i).and_then(|s| s.parse().ok()) {
                    settings = settings.with_controller(|c| c.num_workers(w));
                }
            }
            "--timeout-ms" | "-t" => {
                i += 1;
                if let Some(ms) = args.get(i).and_then(|s| s.parse().ok()) {
                    settings = settings.timeout(Duration::from_millis(ms));
                }
            }
            s => {
                if let Ok(p) = s.parse::<u16>() { port = p; }
            }
        }
        i += 1;
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    // ── 1. Engine ──
    let notifier = match spawn_notifier() {
        Ok(tx) => tx,
        Err(e) => {
            error!(error = %e, "failed to start notifier");
            std::process::exit(1);
        }
    };
    let workflow = build_workflow(notifier);
    info!(steps = ?workflow, "workflow");

    let engine = match Engine::new(settings, workflow, DefaultListener) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "invalid settings");
            std::process::exit(1);
        }
    };

    // ── 2. Listener socket ──
    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => {
            error!(port, error = %e, "bind failed");
            std::process::exit(1);
        }
    };
    if let Err(e) = listener.set_nonblocking(true) {
        error!(error = %e, "set_nonblocking failed");
        std::process::exit(1);
    }

    let s = engine.settings();
    info!(
        port,
        workers = s.controller.num_workers,
        queues = s.controller.num_queues,
        queue_size = s.controller.max_queue_size,
        timeout_ms = s.timeout.as_millis() as u64,
        "flowgate-httpd listening"
    );

    // ── 3. Stats + accept ──
    {
        let engine = Arc::clone(&engine);
        let _ = thread::Builder::new()
            .name("flowgate-stats".into())
            .spawn(move || stats_loop(engine));
    }
    accept_loop(listener, Arc::clone(&engine));

    // ── 4. Shutdown ──
    info!("shutting down");
    engine.shutdown();
    let stats = engine.stats();
    info!(
        reqs = TOTAL_REQUESTS.load(Ordering::Relaxed),
        submitted = stats.submitted,
        rejected = stats.rejected,
        expired = stats.expired,
        executed = stats.executed,
        "done"
    );
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head() {
        let raw = b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\nX-Delay-Ms: 20\r\n\r\n";
        let end = head_end(raw).unwrap();
        assert_eq!(end, raw.len());

        let (head, len) = RequestHead::parse(&raw[..end]).unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/echo");
        assert_eq!(len, 5);
        assert_eq!(head.delay, Some(Duration::from_millis(20)));
        assert!(head.keep_alive);
    }

    #[test]
    fn test_parse_connection_close_and_http10() {
        let (head, len) = RequestHead::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!head.keep_alive);
        assert_eq!(len, 0);

        let (head, _) = RequestHead::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!head.keep_alive);

        assert!(RequestHead::parse(b"garbage\r\n\r\n").is_none());
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nno-colon\r\n\r\n").is_none());
    }

    fn run(engine: &Engine<RequestHead>, method: &str, path: &str, body: &[u8]) -> HttpResponse {
        let (tx, rx) = mpsc::channel();
        let head = RequestHead {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        };
        engine.handle(BufferedRequest::new(body, move |r| tx.send(r).unwrap()), head);
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_workflow_routes() {
        let settings = Settings::new()
            .timeout(Duration::from_secs(5))
            .with_controller(|c| c.num_workers(2).blocking_threads(1));
        let engine = Engine::new(settings, build_workflow(spawn_notifier().unwrap()), DefaultListener)
            .unwrap();

        let resp = run(&engine, "POST", "/upper", b"hello");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"HELLO");
        assert!(resp.header("x-elapsed-us").is_some());

        let resp = run(&engine, "POST", "/echo", b"as-is");
        assert_eq!(resp.body, b"as-is");

        let resp = run(&engine, "GET", "/health", b"");
        assert_eq!(resp.body, b"ok\n");
        // Completed in the first step, so the stamp never ran
        assert!(resp.header("x-elapsed-us").is_none());

        assert_eq!(run(&engine, "GET", "/missing", b"").status, 404);
        engine.shutdown();
    }
}
