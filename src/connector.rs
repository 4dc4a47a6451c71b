//! The TCP connector and HTTP exchange: request-line/header serialization
//! and response framing are handled entirely by `hyper`'s HTTP/1.1 client;
//! this module is the thin layer around it the engine actually drives.
//!
//! TLS negotiation is out of scope — this connector only ever dials plain
//! TCP, the same way a connection abstraction with a separate TLS-capable
//! implementation would keep that concern elsewhere.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::Error;
use crate::ratelimit::RateLimiter;

/// One live HTTP/1.1 connection to an endpoint's `(host, port)`.
pub struct Connection {
    sender: SendRequest<Full<Bytes>>,
    _driver: JoinHandle<()>,
}

impl Connection {
    /// Dials a plain TCP connection and performs the HTTP/1.1 handshake,
    /// bounded by `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self, Error> {
        let addr = format!("{host}:{port}");
        let tcp = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::TimedOut)?
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let _ = tcp.set_nodelay(true);

        let io = TokioIo::new(tcp);
        let (sender, conn) = timeout(connect_timeout, http1::handshake(io))
            .await
            .map_err(|_| Error::TimedOut)?
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let driver = tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, "blob-store connection driver exited");
            }
        });

        Ok(Self {
            sender,
            _driver: driver,
        })
    }

    /// Sends one HTTP request and reads the full response body, bounded by
    /// `request_timeout`. `send_rate`/`recv_rate` coarsely shape the
    /// outbound/inbound byte streams: a single `acquire` for the whole body
    /// rather than per-chunk, since chunked framing is handled entirely by
    /// `hyper` here.
    pub async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
        body_len: usize,
        request_timeout: Duration,
        send_rate: &RateLimiter,
        recv_rate: &RateLimiter,
    ) -> Result<http::Response<Bytes>, Error> {
        send_rate.acquire(body_len as f64).await;

        let exchange = async {
            self.sender
                .ready()
                .await
                .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
            let response = self
                .sender
                .send_request(request)
                .await
                .map_err(|e| Error::HttpBadResponse(e.to_string()))?;
            let (parts, body) = response.into_parts();
            let collected = body
                .collect()
                .await
                .map_err(|e| Error::HttpBadResponse(e.to_string()))?;
            Ok::<_, Error>((parts, collected.to_bytes()))
        };

        let (parts, bytes) = timeout(request_timeout, exchange)
            .await
            .map_err(|_| Error::TimedOut)??;

        recv_rate.acquire(bytes.len() as f64).await;
        Ok(http::Response::from_parts(parts, bytes))
    }
}
