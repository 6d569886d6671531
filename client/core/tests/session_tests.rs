//! End-to-end session tests against a canned HTTP relay
//!
//! These tests bring up a bare `TcpListener` speaking just enough HTTP/1.1
//! to exercise the full client stack: request assembly, status handling,
//! frame decoding, coalescing, cancellation, and terminal outcomes. Bodies
//! are EOF-delimited (`Connection: close`), matching the relay's NDJSON
//! stream-until-close behavior.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tether_core::{
    ClientConfig, ConnectionStatus, HealthProber, ConversationMessage, OutcomeKind, RelayClient,
    SessionState, SessionUpdate, StreamSession,
};

// ============================================================================
// Canned HTTP Server
// ============================================================================

/// One parsed inbound request
struct ReceivedRequest {
    head: String,
    body: String,
}

impl ReceivedRequest {
    fn body_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body should be JSON")
    }
}

/// Read one HTTP/1.1 request (headers + content-length body) off the socket
async fn read_request(stream: &mut TcpStream) -> ReceivedRequest {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut buf).await.expect("read request");
        assert!(n > 0, "client closed before sending a full request");
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        let n = stream.read(&mut buf).await.expect("read body");
        assert!(n > 0, "client closed mid-body");
        raw.extend_from_slice(&buf[..n]);
    }

    ReceivedRequest {
        head,
        body: String::from_utf8_lossy(&raw[header_end..header_end + content_length]).to_string(),
    }
}

/// What the canned server does after reading the request
enum Script {
    /// Write head + body lines with a flush per line, then close
    Stream {
        status: &'static str,
        lines: Vec<String>,
    },
    /// Write head + lines, then hold the connection open
    StreamThenStall {
        status: &'static str,
        lines: Vec<String>,
    },
    /// Plain response with content-length
    Plain {
        status: &'static str,
        body: String,
    },
}

/// Spawn a single-connection server; returns its base URL and a receiver
/// that yields the request the server saw.
async fn spawn_relay(script: Script) -> (String, tokio::sync::oneshot::Receiver<ReceivedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (req_tx, req_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut stream).await;
        let _ = req_tx.send(request);

        match script {
            Script::Stream { status, lines } => {
                write_stream_head(&mut stream, status).await;
                for line in lines {
                    stream.write_all(line.as_bytes()).await.expect("write line");
                    stream.write_all(b"\n").await.expect("write newline");
                    stream.flush().await.expect("flush");
                }
                // Drop closes the connection: EOF ends the stream
            }
            Script::StreamThenStall { status, lines } => {
                write_stream_head(&mut stream, status).await;
                for line in lines {
                    stream.write_all(line.as_bytes()).await.expect("write line");
                    stream.write_all(b"\n").await.expect("write newline");
                    stream.flush().await.expect("flush");
                }
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Script::Plain { status, body } => {
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                stream.write_all(head.as_bytes()).await.expect("write head");
                stream.write_all(body.as_bytes()).await.expect("write body");
                stream.flush().await.expect("flush");
            }
        }
    });

    (format!("http://{addr}"), req_rx)
}

async fn write_stream_head(stream: &mut TcpStream, status: &str) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(head.as_bytes()).await.expect("write head");
    stream.flush().await.expect("flush head");
}

fn token_line(text: &str) -> String {
    serde_json::json!({ "response": text }).to_string()
}

fn config_for(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::with_endpoint(base_url);
    config.provider = Some("ollama".to_string());
    config.system_prompt = "be helpful".to_string();
    config
}

// ============================================================================
// Streaming Sessions
// ============================================================================

#[tokio::test]
async fn streaming_happy_path_finalizes_with_full_text() {
    let (url, req_rx) = spawn_relay(Script::Stream {
        status: "200 OK",
        lines: vec![token_line("Hello"), token_line(", world")],
    })
    .await;

    let log = vec![
        ConversationMessage::user("hi"),
        ConversationMessage::assistant("hello"),
        ConversationMessage::user("greet me"), // already appended by the UI
    ];
    let session = StreamSession::new(config_for(&url));
    let handle = session.send("greet me", &log).unwrap();
    let outcome = handle.wait().await;

    assert_eq!(outcome.kind, OutcomeKind::Finalized);
    assert_eq!(outcome.text, "Hello, world");
    assert_eq!(outcome.error, None);

    // The request the relay saw: system instruction first, duplicate tail
    // dropped, provider hint attached
    let request = req_rx.await.unwrap();
    assert!(request.head.starts_with("POST /chat_stream"));
    let body = request.body_json();
    assert_eq!(body["message"], "greet me");
    assert_eq!(body["provider"], "ollama");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "be helpful");
    assert_eq!(messages[2]["content"], "hello");
}

#[tokio::test]
async fn sse_done_sentinel_finalizes() {
    let (url, _req) = spawn_relay(Script::StreamThenStall {
        status: "200 OK",
        lines: vec![
            "data: {\"response\":\"ok\"}".to_string(),
            "data: [DONE]".to_string(),
        ],
    })
    .await;

    // The server stalls after [DONE]; the sentinel alone must finalize
    let session = StreamSession::new(config_for(&url));
    let handle = session.send("hi", &[]).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("[DONE] should finalize without waiting for EOF");

    assert_eq!(outcome.kind, OutcomeKind::Finalized);
    assert_eq!(outcome.text, "ok");
}

#[tokio::test]
async fn usage_is_forwarded_unthrottled() {
    let (url, _req) = spawn_relay(Script::Stream {
        status: "200 OK",
        lines: vec![
            token_line("hi"),
            "data: [USAGE]{\"prompt\":10,\"completion\":5,\"total\":15}".to_string(),
        ],
    })
    .await;

    let session = StreamSession::new(config_for(&url));
    let mut handle = session.send("hi", &[]).unwrap();

    let mut usage = None;
    let mut outcome = None;
    while let Some(update) = handle.recv().await {
        match update {
            SessionUpdate::Usage(u) => usage = Some(u),
            SessionUpdate::Finished(o) => outcome = Some(o),
            SessionUpdate::Partial { .. } => {}
        }
    }

    let usage = usage.expect("usage update should be delivered");
    assert_eq!(usage.prompt, Some(10));
    assert_eq!(usage.completion, Some(5));
    assert_eq!(usage.total, Some(15));
    assert_eq!(outcome.unwrap().text, "hi");
}

#[tokio::test]
async fn non_2xx_fails_with_status_and_body() {
    let (url, _req) = spawn_relay(Script::Plain {
        status: "503 Service Unavailable",
        body: "model overloaded".to_string(),
    })
    .await;

    let session = StreamSession::new(config_for(&url));
    let handle = session.send("hi", &[]).unwrap();
    let outcome = handle.wait().await;

    assert_eq!(outcome.kind, OutcomeKind::Failed);
    assert_eq!(outcome.text, "");
    let error = outcome.error.clone().unwrap();
    assert!(error.contains("503"), "error should carry status: {error}");
    assert!(
        error.contains("model overloaded"),
        "error should carry body: {error}"
    );
    // Nothing accumulated, so the error is the display text
    assert_eq!(outcome.display_text(), error);
}

#[tokio::test]
async fn mid_stream_error_preserves_partial_text() {
    let (url, _req) = spawn_relay(Script::Stream {
        status: "200 OK",
        lines: vec![
            token_line("partial answer"),
            serde_json::json!({ "error": "ollama stream failed" }).to_string(),
        ],
    })
    .await;

    let session = StreamSession::new(config_for(&url));
    let handle = session.send("hi", &[]).unwrap();
    let outcome = handle.wait().await;

    assert_eq!(outcome.kind, OutcomeKind::Failed);
    assert_eq!(outcome.text, "partial answer");
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("ollama stream failed"));
    // Partial output wins over the error description
    assert_eq!(outcome.display_text(), "partial answer");
}

#[tokio::test]
async fn cancellation_keeps_exactly_the_received_tokens() {
    let (url, _req) = spawn_relay(Script::StreamThenStall {
        status: "200 OK",
        lines: vec![token_line("a"), token_line("b")],
    })
    .await;

    let session = StreamSession::new(config_for(&url));
    let handle = session.send("hi", &[]).unwrap();
    let cancel = handle.cancel_handle();

    // Let both tokens land, then stop early while the server stalls
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancellation should terminate the session promptly");

    assert_eq!(outcome.kind, OutcomeKind::Cancelled);
    assert_eq!(outcome.text, "ab");
    assert_eq!(outcome.error, None);
}

#[tokio::test]
async fn cancellation_races_with_natural_completion_once() {
    let (url, _req) = spawn_relay(Script::Stream {
        status: "200 OK",
        lines: vec![token_line("fast")],
    })
    .await;

    let session = StreamSession::new(config_for(&url));
    let mut handle = session.send("hi", &[]).unwrap();
    handle.cancel();

    // Whichever transition wins, there is exactly one terminal update and
    // the state agrees with it
    let mut finished = 0;
    let mut last_state = SessionState::Sending;
    while let Some(update) = handle.recv().await {
        if let SessionUpdate::Finished(outcome) = update {
            finished += 1;
            assert!(matches!(
                outcome.kind,
                OutcomeKind::Cancelled | OutcomeKind::Finalized
            ));
            last_state = handle.state();
        }
    }
    assert_eq!(finished, 1);
    assert!(last_state.is_terminal());
}

#[tokio::test]
async fn coalescing_throttles_a_rapid_burst() {
    let lines: Vec<String> = (0..100).map(|_| token_line("x")).collect();
    let (url, _req) = spawn_relay(Script::Stream {
        status: "200 OK",
        lines,
    })
    .await;

    let session = StreamSession::new(config_for(&url));
    let mut handle = session.send("hi", &[]).unwrap();

    let mut partials: Vec<String> = Vec::new();
    let mut outcome = None;
    while let Some(update) = handle.recv().await {
        match update {
            SessionUpdate::Partial { text } => partials.push(text),
            SessionUpdate::Finished(o) => outcome = Some(o),
            SessionUpdate::Usage(_) => {}
        }
    }

    let outcome = outcome.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Finalized);
    assert_eq!(outcome.text.len(), 100);

    // The policy must merge a 100-token burst into fewer updates
    assert!(
        partials.len() < 100,
        "expected throttling, got {} partials",
        partials.len()
    );

    // Updates never regress: each partial extends the previous one
    for pair in partials.windows(2) {
        assert!(pair[1].len() >= pair[0].len());
        assert!(pair[1].starts_with(&pair[0]));
    }
    if let Some(last) = partials.last() {
        assert!(outcome.text.starts_with(last.as_str()));
    }
}

#[tokio::test]
async fn raw_text_lines_pass_through() {
    let (url, _req) = spawn_relay(Script::Stream {
        status: "200 OK",
        lines: vec!["hello".to_string()],
    })
    .await;

    let session = StreamSession::new(config_for(&url));
    let outcome = session.send("hi", &[]).unwrap().wait().await;

    assert_eq!(outcome.kind, OutcomeKind::Finalized);
    assert_eq!(outcome.text, "hello");
}

// ============================================================================
// Buffered Mode and Health
// ============================================================================

#[tokio::test]
async fn buffered_chat_returns_reply() {
    let (url, req_rx) = spawn_relay(Script::Plain {
        status: "200 OK",
        body: serde_json::json!({ "reply": "hi there" }).to_string(),
    })
    .await;

    let client = RelayClient::new(&config_for(&url)).unwrap();
    let request = client.request_for(tether_core::assemble(&[], "hi", "be helpful"));
    let reply = client.send_buffered(&request).await.unwrap();

    assert_eq!(reply, "hi there");
    let seen = req_rx.await.unwrap();
    assert!(seen.head.starts_with("POST /chat "));
}

#[tokio::test]
async fn health_probe_classifies_reachable_relay() {
    let (url, req_rx) = spawn_relay(Script::Plain {
        status: "200 OK",
        body: serde_json::json!({ "status": "ok", "model": "m" }).to_string(),
    })
    .await;

    let prober = HealthProber::new();
    let status = prober.probe(Some(&url)).await;

    assert_eq!(
        status,
        ConnectionStatus::Connected {
            model: "m".to_string()
        }
    );
    let seen = req_rx.await.unwrap();
    assert!(seen.head.starts_with("GET /healthz"));
}
