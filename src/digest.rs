//! Content digest primitives: MD5 and base64, used for upload integrity
//! verification, implemented as thin wrappers over `md-5`/`base64` rather
//! than hand-rolled hashing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};

/// Base64-encoded MD5 digest of `data`, with any trailing newline stripped.
pub fn md5_base64(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    let digest = hasher.finalize();
    STANDARD.encode(digest).trim_end_matches('\n').to_string()
}
