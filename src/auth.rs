//! Request authentication: canonical-string construction and HMAC-SHA1
//! signing.
//!
//! Deliberately preserves a quirk that existing signatures depend on: the
//! `x-amz*`/`x-icloud*` header lines are emitted in container order,
//! unsorted, undeduplicated, and without lowercasing the header name.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::Error;
use crate::headers::HeaderList;

type HmacSha1 = Hmac<Sha1>;

/// Maximum secret length this implementation supports. A secret longer
/// than the 64-byte HMAC block size would require hashing the key down
/// first rather than zero-padding it; rather than implement that silently
/// divergent behavior, secrets over this length are rejected explicitly at
/// URL-parse time ([`crate::url::parse`]) and asserted here as an
/// invariant.
pub const MAX_SECRET_LEN: usize = 64;

/// Formats the current time in the fixed form the canonical string and
/// `Date` header both use: `"Www Mmm dd hh:mm:ss yyyy GMT"`.
pub fn http_date_now() -> String {
    Utc::now().format("%a %b %d %H:%M:%S %Y GMT").to_string()
}

/// Builds the canonical string and signs it with HMAC-SHA1, then installs
/// `Date` and `Authorization` on `headers`.
///
/// Signing happens on every attempt of a request because `Date` must be
/// current; callers should call this immediately before dispatch.
pub fn sign(
    key: &str,
    secret: &str,
    verb: &str,
    resource: &str,
    headers: &mut HeaderList,
) -> Result<(), Error> {
    debug_assert!(
        secret.len() <= MAX_SECRET_LEN,
        "secrets over {MAX_SECRET_LEN} bytes must be rejected at URL-parse time"
    );

    let date = http_date_now();
    headers.set("Date", date.clone());

    let canonical = canonical_string(verb, resource, headers, &date);
    let signature = hmac_sha1_base64(secret.as_bytes(), canonical.as_bytes())?;
    headers.set("Authorization", format!("{key}:{signature}"));
    Ok(())
}

/// Constructs the canonical string without signing it. Exposed separately
/// so tests can assert determinism directly.
pub fn canonical_string(verb: &str, resource: &str, headers: &HeaderList, date: &str) -> String {
    let mut s = String::new();
    s.push_str(verb);
    s.push('\n');
    s.push_str(headers.get("Content-MD5").unwrap_or(""));
    s.push('\n');
    s.push_str(headers.get("Content-Type").unwrap_or(""));
    s.push('\n');
    s.push_str(date);
    s.push('\n');

    for (name, value) in headers.iter() {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("x-amz") || lower.starts_with("x-icloud") {
            s.push_str(name);
            s.push(':');
            s.push_str(value);
            s.push('\n');
        }
    }

    let resource_for_signature = if verb.eq_ignore_ascii_case("GET") {
        match resource.rfind('?') {
            Some(idx) => &resource[..idx],
            None => resource,
        }
    } else {
        resource
    };
    s.push_str(resource_for_signature);
    s
}

fn hmac_sha1_base64(secret: &[u8], message: &[u8]) -> Result<String, Error> {
    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| Error::InvalidUrl(format!("bad HMAC key: {e}")))?;
    mac.update(message);
    let tag = mac.finalize().into_bytes();
    Ok(STANDARD.encode(tag).trim_end_matches('\n').to_string())
}
