//! Integration tests driving [`blobstore_client::Endpoint`] against a
//! hand-rolled TCP fixture server standing in for the blob store: retry
//! counts, backoff timing, stats, and `Connection: close` pool eviction,
//! end-to-end.
//!
//! The fixture is deliberately not a real HTTP server: it speaks just
//! enough HTTP/1.1 framing (request line, `Content-Length`-bounded body,
//! one scripted response per request) to drive the engine's connect/sign/
//! send/receive/retry loop without pulling in another HTTP implementation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use blobstore_client::knobs::Knobs;
use blobstore_client::stats::STATS;
use blobstore_client::{Endpoint, Error};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

struct ScriptedResponse {
    code: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
    close: bool,
}

impl ScriptedResponse {
    fn ok(body: &[u8]) -> Self {
        Self {
            code: 200,
            headers: Vec::new(),
            body: body.to_vec(),
            close: false,
        }
    }

    fn status(code: u16) -> Self {
        Self {
            code,
            headers: Vec::new(),
            body: Vec::new(),
            close: false,
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

/// Spawns a TCP fixture that serves `responses` in order, one per request,
/// across however many connections the client opens (a retried request may
/// land on a fresh connection if the prior one was closed, or reuse a
/// pooled one). Returns the bound address; the server task runs until the
/// script is exhausted.
async fn spawn_fixture(responses: Vec<ScriptedResponse>) -> std::net::SocketAddr {
    spawn_fixture_recording(responses).await.0
}

/// Like [`spawn_fixture`], but also returns the request lines (e.g. `"GET
/// /bucket/?max-keys=1000&marker=x HTTP/1.1"`) seen by the fixture, in
/// arrival order, so a test can assert on the resource a subsequent page
/// request actually carried.
async fn spawn_fixture_recording(
    responses: Vec<ScriptedResponse>,
) -> (std::net::SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let queue = Arc::new(Mutex::new(responses.into_iter().collect::<VecDeque<_>>()));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let task_requests = requests.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let queue = queue.clone();
            let requests = task_requests.clone();
            tokio::spawn(async move {
                serve_connection(stream, queue, requests).await;
            });
            if queue_is_drained(&queue).await {
                return;
            }
        }
    });

    (addr, requests)
}

async fn queue_is_drained(queue: &Arc<Mutex<VecDeque<ScriptedResponse>>>) -> bool {
    queue.lock().await.is_empty()
}

async fn serve_connection(
    mut stream: TcpStream,
    queue: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    loop {
        let Some(request_line) = read_one_request(&mut stream).await else {
            return;
        };
        requests.lock().await.push(request_line);
        let next = queue.lock().await.pop_front();
        let Some(response) = next else { return };

        let mut out = format!("HTTP/1.1 {} Status\r\n", response.code);
        out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
        for (name, value) in &response.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if response.close {
            out.push_str("Connection: close\r\n");
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&response.body);
        if stream.write_all(&bytes).await.is_err() {
            return;
        }
        if response.close {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

/// Reads one HTTP/1.1 request off `stream`: the request line, then headers
/// up to the blank line, then exactly `Content-Length` more body bytes.
/// Returns the request line, or `None` on EOF.
async fn read_one_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_double_crlf(&buf) {
            break pos;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let request_line = header_text.lines().next().unwrap_or("").to_string();
    let content_length: usize = header_text
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().unwrap_or(0))
        })
        .unwrap_or(0);

    let body_start = header_end + 4;
    let mut have = buf.len() - body_start;
    while have < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        have += n;
    }
    Some(request_line)
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn test_knobs(addr: std::net::SocketAddr) -> (Endpoint, std::net::SocketAddr) {
    let knobs = Knobs {
        connect_tries: 3,
        connect_timeout: 5,
        max_connection_life: 120,
        request_tries: 3,
        request_timeout: 5,
        requests_per_second: 1000,
        concurrent_requests: 16,
        multipart_max_part_size: 100_000_000,
        multipart_min_part_size: 1,
        concurrent_uploads: 16,
        concurrent_reads_per_file: 16,
        concurrent_writes_per_file: 16,
        read_block_size: 1_000_000,
        read_ahead_blocks: 0,
        read_cache_blocks_per_file: 0,
        max_send_bytes_per_second: 0,
        max_recv_bytes_per_second: 0,
    };
    let endpoint = Endpoint::new(
        addr.ip().to_string(),
        addr.port().to_string(),
        "KEY".to_string(),
        "SECRET".to_string(),
        knobs,
    );
    (endpoint, addr)
}

#[tokio::test]
async fn object_exists_false_on_404_and_counts_as_success() {
    let addr = spawn_fixture(vec![ScriptedResponse::status(404)]).await;
    let (endpoint, _) = test_knobs(addr);

    let before = STATS.snapshot();
    let exists = endpoint.object_exists("bucket", "missing").await.unwrap();
    let after = STATS.snapshot();

    assert!(!exists);
    assert_eq!(after.requests_successful - before.requests_successful, 1);
    assert_eq!(after.requests_failed, before.requests_failed);
}

#[tokio::test(start_paused = true)]
async fn retries_through_503_then_succeeds_with_expected_backoff() {
    let addr = spawn_fixture(vec![
        ScriptedResponse::status(503),
        ScriptedResponse::status(503),
        ScriptedResponse::ok(b"done"),
    ])
    .await;
    let (endpoint, _) = test_knobs(addr);

    let before = STATS.snapshot();
    let start = tokio::time::Instant::now();
    let response = endpoint
        .do_request(
            "GET",
            "/bucket/object",
            blobstore_client::headers::HeaderList::new(),
            None,
            &[200],
            false,
        )
        .await
        .unwrap();
    let elapsed = start.elapsed();
    let after = STATS.snapshot();

    assert_eq!(response.code, 200);
    assert_eq!(response.content, Bytes::from_static(b"done"));
    assert_eq!(after.requests_failed - before.requests_failed, 2);
    assert_eq!(after.requests_successful - before.requests_successful, 1);
    // Backoff is ~2s then ~4s; with a paused clock this should land close
    // to 6s rather than the near-zero it would take unthrottled.
    assert!(elapsed >= Duration::from_secs(6));
}

#[tokio::test]
async fn connection_close_header_prevents_pool_reuse() {
    let addr = spawn_fixture(vec![
        ScriptedResponse::ok(b"first").closing(),
        ScriptedResponse::ok(b"second"),
    ])
    .await;
    let (endpoint, _) = test_knobs(addr);

    endpoint.object_size("bucket", "a").await.ok();
    assert_eq!(endpoint.pooled_connections().await, 0);

    endpoint.object_size("bucket", "b").await.ok();
    assert_eq!(endpoint.pooled_connections().await, 1);
}

#[tokio::test]
async fn checksum_mismatch_is_rejected() {
    let addr = spawn_fixture(vec![
        ScriptedResponse::ok(b"").with_header("Content-MD5", "not-the-right-digest"),
    ])
    .await;
    let (endpoint, _) = test_knobs(addr);

    let err = endpoint
        .write_entire_file_from_buffer("bucket", "object", Bytes::from_static(b"payload"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumFailed));
}

#[tokio::test(start_paused = true)]
async fn retry_after_header_extends_the_sleep() {
    let addr = spawn_fixture(vec![
        ScriptedResponse::status(503).with_header("Retry-After", "3"),
        ScriptedResponse::ok(b"ok"),
    ])
    .await;
    let (endpoint, _) = test_knobs(addr);

    let start = tokio::time::Instant::now();
    let response = endpoint
        .do_request(
            "GET",
            "/bucket/object",
            blobstore_client::headers::HeaderList::new(),
            None,
            &[200],
            false,
        )
        .await
        .unwrap();
    assert_eq!(response.code, 200);
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn checksum_missing_header_is_rejected() {
    // The server's success response omits Content-MD5 entirely, rather than
    // sending a mismatching one. An absent digest must still be treated as
    // a mismatch, not a free pass.
    let addr = spawn_fixture(vec![ScriptedResponse::ok(b"")]).await;
    let (endpoint, _) = test_knobs(addr);

    let err = endpoint
        .write_entire_file_from_buffer("bucket", "object", Bytes::from_static(b"payload"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumFailed));
}

#[tokio::test]
async fn list_bucket_stream_derives_marker_from_last_object_name() {
    let page1 = br#"{"results":[{"key":"a.txt","size":1},{"key":"b.txt","size":2}],"truncated":true}"#;
    let page2 = br#"{"results":[{"key":"c.txt","size":3}],"truncated":false}"#;
    let (addr, requests) = spawn_fixture_recording(vec![
        ScriptedResponse::ok(page1),
        ScriptedResponse::ok(page2),
    ])
    .await;
    let (endpoint, _) = test_knobs(addr);

    let result = endpoint.list_bucket("bucket", None, None).await.unwrap();

    assert_eq!(
        result.objects.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
        vec!["a.txt", "b.txt", "c.txt"]
    );

    let seen = requests.lock().await.clone();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains("marker="), "first request: {}", seen[0]);
    assert!(!seen[0].contains("marker=b.txt"), "first request: {}", seen[0]);
    assert!(seen[1].contains("marker=b.txt"), "second request: {}", seen[1]);
}

#[tokio::test]
async fn list_bucket_stream_stops_on_truncated_page_with_no_objects() {
    // A truncated page with no objects has nothing to derive a next marker
    // from, so the stream must end rather than re-requesting the same page
    // forever.
    let page1 = br#"{"results":[],"truncated":true}"#;
    let (addr, requests) = spawn_fixture_recording(vec![ScriptedResponse::ok(page1)]).await;
    let (endpoint, _) = test_knobs(addr);

    let result = endpoint.list_bucket("bucket", None, None).await.unwrap();

    assert!(result.objects.is_empty());
    assert_eq!(requests.lock().await.len(), 1);
}
