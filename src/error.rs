//! Error taxonomy for the blob-store client.
//!
//! Every variant here corresponds to one failure kind the request execution
//! engine or the operation facade can produce. The engine's retry loop
//! consults [`Error::is_retryable`] to decide whether to back off and try
//! again or surface the failure to the caller.

use thiserror::Error;

/// All failure modes the client can report.
#[derive(Debug, Error)]
pub enum Error {
    /// A `blobstore://` URL failed to parse or carried an invalid knob.
    #[error("invalid blobstore URL: {0}")]
    InvalidUrl(String),

    /// TCP connect refused, reset, or otherwise failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Either connect or request exceeded its configured budget.
    #[error("timed out")]
    TimedOut,

    /// Response framing was malformed, or a required field was missing.
    #[error("malformed HTTP response: {0}")]
    HttpBadResponse(String),

    /// Final outcome when the server returned 406 after retries were exhausted.
    #[error("request not accepted (HTTP 406, credentials rejected)")]
    HttpNotAccepted,

    /// Final outcome for any other unsuccessful response after retries were exhausted.
    #[error("request failed with HTTP status {0}")]
    HttpRequestFailed(u16),

    /// A reader mapped a 404 to this.
    #[error("object not found")]
    FileNotFound,

    /// A write was attempted with a zero-length body.
    #[error("file not writable (empty body)")]
    FileNotWritable,

    /// A single part exceeded `multipart_max_part_size`.
    #[error("file too large for a single part")]
    FileTooLarge,

    /// The server-returned `Content-MD5` disagreed with the digest we sent.
    #[error("checksum verification failed")]
    ChecksumFailed,

    /// Response framing was internally inconsistent (e.g. `contentLen != content.len()`).
    #[error("I/O inconsistency: {0}")]
    IoError(String),

    /// Opaque lower-level I/O failure (DNS, socket setup) not otherwise classified.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the engine should retry the request after this error, per
    /// the outcome-classification rules of the request execution engine.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_) | Error::TimedOut | Error::HttpBadResponse(_)
        )
    }
}

/// HTTP status codes the engine treats as retryable regardless of the
/// operation's own `successCodes` set.
pub fn is_retryable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503)
}
