//! The request execution engine and the `Endpoint` it operates on — the
//! heart of this crate.
//!
//! A single method, [`Endpoint::do_request`], drives every HTTP exchange
//! through connect → sign → send → receive → retry, coordinating the
//! connection pool, the two concurrency gates, and the three rate shapers
//! along the way. Everything in the operation facade is a thin wrapper
//! around this one call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;

use crate::auth;
use crate::connector::Connection;
use crate::error::{Error, is_retryable_status};
use crate::headers::HeaderList;
use crate::knobs::Knobs;
use crate::pool::ConnectionPool;
use crate::ratelimit::RateLimiter;
use crate::stats::STATS;

/// The response the engine hands back to the operation facade.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub code: u16,
    pub headers: http::HeaderMap,
    pub content: Bytes,
    pub content_len: i64,
}

impl EngineResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

struct EndpointInner {
    host: String,
    service: String,
    key: String,
    secret: String,
    knobs: Knobs,
    pool: ConnectionPool,
    concurrent_requests: Semaphore,
    concurrent_uploads: Semaphore,
    request_rate: RateLimiter,
    send_rate: RateLimiter,
    recv_rate: RateLimiter,
    /// Last trace-event emission time per call site (`"VERB resource"`),
    /// rate-limiting retry/failure traces to one per 5 seconds per site.
    trace_gate: Mutex<HashMap<String, Instant>>,
}

/// A configured, credentialed handle to one blob-store service.
///
/// Cheap to clone: internally an `Arc`. Equality is by identity (two
/// `Endpoint`s constructed from the same URL are distinct endpoints), never
/// by URL.
#[derive(Clone)]
pub struct Endpoint(Arc<EndpointInner>);

impl Endpoint {
    pub fn new(host: String, service: String, key: String, secret: String, knobs: Knobs) -> Self {
        let request_rate = RateLimiter::new(knobs.requests_per_second as f64);
        let send_rate = RateLimiter::new(knobs.max_send_bytes_per_second as f64);
        let recv_rate = RateLimiter::new(knobs.max_recv_bytes_per_second as f64);
        let concurrent_requests = Semaphore::new(knobs.concurrent_requests.max(1) as usize);
        let concurrent_uploads = Semaphore::new(knobs.concurrent_uploads.max(1) as usize);

        Endpoint(Arc::new(EndpointInner {
            host,
            service,
            key,
            secret,
            knobs,
            pool: ConnectionPool::new(),
            concurrent_requests,
            concurrent_uploads,
            request_rate,
            send_rate,
            recv_rate,
            trace_gate: Mutex::new(HashMap::new()),
        }))
    }

    pub fn host(&self) -> &str {
        &self.0.host
    }

    pub fn service(&self) -> &str {
        &self.0.service
    }

    pub fn key(&self) -> &str {
        &self.0.key
    }

    pub fn secret(&self) -> &str {
        &self.0.secret
    }

    pub fn knobs(&self) -> &Knobs {
        &self.0.knobs
    }

    /// Number of connections currently cached in the pool.
    pub async fn pooled_connections(&self) -> usize {
        self.0.pool.len().await
    }

    /// The single code path every facade operation funnels through:
    /// connect/sign/send/receive, retried with exponential backoff up to
    /// `min(request_tries, connect_tries)` attempts.
    ///
    /// `acquire_upload_gate` should be `true` only for the two operations
    /// that carry an upload body (`write_entire_file_from_buffer`, `upload_part`)
    /// — not simply whenever a body is present (a multipart
    /// `finish_multi_part_upload` also carries a small XML body but is not an
    /// "upload" for the purposes of the `concurrent_uploads` gate).
    pub async fn do_request(
        &self,
        verb: &str,
        resource: &str,
        mut headers: HeaderList,
        body: Option<Bytes>,
        success_codes: &[u16],
        acquire_upload_gate: bool,
    ) -> Result<EngineResponse, Error> {
        let body_len = body.as_ref().map(Bytes::len).unwrap_or(0);
        if body_len > 0 {
            headers.set("Content-Length", body_len.to_string());
        }
        if headers.get("Host").is_none() {
            headers.set("Host", self.0.host.clone());
        }

        let _request_permit = self
            .0
            .concurrent_requests
            .acquire()
            .await
            .expect("concurrent_requests semaphore is never closed");
        let _upload_permit = if acquire_upload_gate {
            Some(
                self.0
                    .concurrent_uploads
                    .acquire()
                    .await
                    .expect("concurrent_uploads semaphore is never closed"),
            )
        } else {
            None
        };

        let max_tries = self
            .0
            .knobs
            .request_tries
            .min(self.0.knobs.connect_tries)
            .max(1) as u32;
        let connect_timeout = Duration::from_secs(self.0.knobs.connect_timeout.max(0) as u64);
        let request_timeout = Duration::from_secs(self.0.knobs.request_timeout.max(0) as u64);

        let mut this_try: u32 = 1;
        let mut next_retry_delay: f64 = 2.0;

        loop {
            // (1) Begin connect without awaiting yet, so it overlaps with
            // signing the headers below.
            let connecting_endpoint = self.clone();
            let connect_handle =
                tokio::spawn(async move { connecting_endpoint.obtain_connection().await });

            // (2) Sign on every attempt: `Date` must be current.
            auth::sign(&self.0.key, &self.0.secret, verb, resource, &mut headers)?;

            // (3) Clone the body for this attempt. `Bytes` is already
            // reference-counted, so cloning it is a cheap rewindable-body
            // reference bump rather than a copy — no manual buffer chain
            // needed.
            let attempt_body = body.clone();

            // (4) Finish connect under connect_timeout.
            let connect_result: Result<(Connection, Instant), Error> =
                match timeout(connect_timeout, connect_handle).await {
                    Ok(Ok(inner)) => inner,
                    Ok(Err(join_err)) => Err(Error::ConnectionFailed(join_err.to_string())),
                    Err(_elapsed) => Err(Error::TimedOut),
                };

            let (mut conn, expires_at) = match connect_result {
                Ok(pair) => pair,
                Err(err) => {
                    STATS.record_failure();
                    let retryable = err.is_retryable();
                    let will_retry = retryable && this_try < max_tries;
                    let delay = will_retry.then(|| self.next_delay(&mut next_retry_delay, None));
                    self.trace_failed_attempt(
                        verb,
                        resource,
                        this_try,
                        retryable,
                        delay,
                        Some(&err),
                        None,
                    )
                    .await;
                    if let Some(delay) = delay {
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                        this_try += 1;
                        continue;
                    }
                    return Err(err);
                }
            };

            // (5) Acquire one request-rate token immediately before dispatch.
            self.0.request_rate.acquire(1.0).await;

            // (6) Dispatch the HTTP exchange under request_timeout.
            let http_request = match build_http_request(verb, resource, &headers, attempt_body) {
                Ok(r) => r,
                Err(e) => return Err(e),
            };

            let dispatch_result = conn
                .send(
                    http_request,
                    body_len,
                    request_timeout,
                    &self.0.send_rate,
                    &self.0.recv_rate,
                )
                .await;

            match dispatch_result {
                Ok(response) => {
                    STATS.record_bytes_sent(body_len as u64);
                    let (parts, content) = response.into_parts();
                    let content_len = parts
                        .headers
                        .get(http::header::CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<i64>().ok())
                        .unwrap_or(content.len() as i64);
                    let code = parts.status.as_u16();

                    let keep_alive = parts
                        .headers
                        .get(http::header::CONNECTION)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| !v.eq_ignore_ascii_case("close"))
                        .unwrap_or(true);
                    if keep_alive {
                        self.0.pool.release(conn, expires_at).await;
                    }

                    let engine_response = EngineResponse {
                        code,
                        headers: parts.headers,
                        content,
                        content_len,
                    };

                    if success_codes.contains(&code) {
                        STATS.record_success();
                        return Ok(engine_response);
                    }

                    STATS.record_failure();
                    let retryable = is_retryable_status(code);
                    let will_retry = retryable && this_try < max_tries;
                    let delay = will_retry
                        .then(|| self.next_delay(&mut next_retry_delay, Some(&engine_response)));
                    self.trace_failed_attempt(
                        verb,
                        resource,
                        this_try,
                        retryable,
                        delay,
                        None,
                        Some(&engine_response),
                    )
                    .await;

                    if let Some(delay) = delay {
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                        this_try += 1;
                        continue;
                    }

                    if code == 406 {
                        return Err(Error::HttpNotAccepted);
                    }
                    return Err(Error::HttpRequestFailed(code));
                }
                Err(err) => {
                    STATS.record_failure();
                    let retryable = err.is_retryable();
                    let will_retry = retryable && this_try < max_tries;
                    let delay = will_retry.then(|| self.next_delay(&mut next_retry_delay, None));
                    self.trace_failed_attempt(
                        verb,
                        resource,
                        this_try,
                        retryable,
                        delay,
                        Some(&err),
                        None,
                    )
                    .await;
                    if let Some(delay) = delay {
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                        this_try += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Computes this attempt's delay and advances `next_retry_delay`,
    /// obeying a `Retry-After` hint when the last response carried one.
    fn next_delay(&self, next_retry_delay: &mut f64, response: Option<&EngineResponse>) -> f64 {
        let mut delay = *next_retry_delay;
        *next_retry_delay = (*next_retry_delay * 2.0).min(60.0);

        if let Some(resp) = response {
            if let Some(raw) = resp.header("Retry-After") {
                match raw.trim().parse::<f64>() {
                    Ok(v) => delay = delay.max(v),
                    Err(_) => delay = delay.max(300.0),
                }
            }
        }
        delay
    }

    async fn obtain_connection(&self) -> Result<(Connection, Instant), Error> {
        if let Some((conn, expires_at)) = self.0.pool.acquire().await {
            tracing::trace!(host = %self.0.host, service = %self.0.service, "reused pooled connection");
            return Ok((conn, expires_at));
        }

        let port = resolve_port(&self.0.service)?;
        tracing::trace!(host = %self.0.host, port, "opening new connection");
        let connect_timeout = Duration::from_secs(self.0.knobs.connect_timeout.max(0) as u64);
        let conn = Connection::connect(&self.0.host, port, connect_timeout).await?;
        let expires_at =
            Instant::now() + Duration::from_secs(self.0.knobs.max_connection_life.max(0) as u64);
        Ok((conn, expires_at))
    }

    async fn trace_failed_attempt(
        &self,
        verb: &str,
        resource: &str,
        attempt: u32,
        retryable: bool,
        delay: Option<f64>,
        error: Option<&Error>,
        response: Option<&EngineResponse>,
    ) {
        let key = format!("{verb} {resource}");
        let now = Instant::now();
        let should_emit = {
            let mut gate = self.0.trace_gate.lock().await;
            match gate.get(&key) {
                Some(last) if now.duration_since(*last) < Duration::from_secs(5) => false,
                _ => {
                    gate.insert(key, now);
                    true
                }
            }
        };
        if !should_emit {
            return;
        }

        let remote = format!("{}:{}", self.0.host, self.0.service);
        if let Some(err) = error {
            if retryable {
                tracing::warn!(remote = %remote, verb, resource, attempt, delay, error = %err, "blob-store request attempt failed, retrying");
            } else {
                tracing::error!(remote = %remote, verb, resource, attempt, error = %err, "blob-store request attempt failed");
            }
        } else if let Some(resp) = response {
            let retry_after = resp.header("Retry-After");
            if retryable {
                tracing::warn!(remote = %remote, verb, resource, attempt, delay, code = resp.code, retry_after, "blob-store request attempt failed, retrying");
            } else {
                tracing::error!(remote = %remote, verb, resource, attempt, code = resp.code, retry_after, "blob-store request attempt failed");
            }
        }
    }
}

/// Resolves `service` to a TCP port: a decimal port number, `"http"`, or
/// empty (⇒ `http`/80). Named non-`http` services (e.g. `https`) are not
/// resolved, since TLS negotiation is out of scope for this connector.
fn resolve_port(service: &str) -> Result<u16, Error> {
    if service.is_empty() || service.eq_ignore_ascii_case("http") {
        return Ok(80);
    }
    service
        .parse::<u16>()
        .map_err(|_| Error::ConnectionFailed(format!("unresolvable service name '{service}'")))
}

fn build_http_request(
    verb: &str,
    resource: &str,
    headers: &HeaderList,
    body: Option<Bytes>,
) -> Result<http::Request<Full<Bytes>>, Error> {
    let method = http::Method::from_bytes(verb.as_bytes())
        .map_err(|e| Error::HttpBadResponse(format!("bad verb '{verb}': {e}")))?;
    let uri = if resource.starts_with('/') {
        resource.to_string()
    } else {
        format!("/{resource}")
    };

    let mut builder = http::Request::builder().method(method).uri(uri);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| Error::HttpBadResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_port_defaults_to_80() {
        assert_eq!(resolve_port("").unwrap(), 80);
        assert_eq!(resolve_port("http").unwrap(), 80);
    }

    #[test]
    fn resolve_port_parses_numeric_service() {
        assert_eq!(resolve_port("9000").unwrap(), 9000);
    }

    #[test]
    fn resolve_port_rejects_unknown_service_name() {
        assert!(resolve_port("https").is_err());
    }

    #[test]
    fn backoff_doubles_and_caps_at_60() {
        let knobs = Knobs::default();
        let endpoint = Endpoint::new("h".into(), "http".into(), "k".into(), "s".into(), knobs);
        let mut next = 2.0;
        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(endpoint.next_delay(&mut next, None));
        }
        assert_eq!(delays[0], 2.0);
        assert_eq!(delays[1], 4.0);
        assert_eq!(delays[2], 8.0);
        assert_eq!(delays[3], 16.0);
        assert_eq!(delays[4], 32.0);
        assert_eq!(delays[5], 60.0);
        assert_eq!(delays[6], 60.0);
        assert_eq!(delays[7], 60.0);
    }

    #[test]
    fn retry_after_header_overrides_backoff_when_larger() {
        let knobs = Knobs::default();
        let endpoint = Endpoint::new("h".into(), "http".into(), "k".into(), "s".into(), knobs);
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "120".parse().unwrap());
        let response = EngineResponse {
            code: 503,
            headers,
            content: Bytes::new(),
            content_len: 0,
        };
        let mut next = 2.0;
        let delay = endpoint.next_delay(&mut next, Some(&response));
        assert_eq!(delay, 120.0);
    }

    #[test]
    fn unparseable_retry_after_falls_back_to_300() {
        let knobs = Knobs::default();
        let endpoint = Endpoint::new("h".into(), "http".into(), "k".into(), "s".into(), knobs);
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "soon".parse().unwrap());
        let response = EngineResponse {
            code: 503,
            headers,
            content: Bytes::new(),
            content_len: 0,
        };
        let mut next = 2.0;
        let delay = endpoint.next_delay(&mut next, Some(&response));
        assert_eq!(delay, 300.0);
    }
}
