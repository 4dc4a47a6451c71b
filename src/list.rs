//! Bucket-listing data types and the JSON page parser.
//!
//! This blob store's list responses are JSON with S3-style keys
//! (`results`/`CommonPrefixes`/`truncated`) even though real S3 returns
//! XML; that JSON shape is preserved here to match the service actually
//! being talked to, rather than assuming standard S3 framing.

use serde::Deserialize;

use crate::error::Error;

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: i64,
}

/// One page (or, after aggregation, the whole) of a bucket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
}

impl ListResult {
    /// Appends another page's contents, preserving arrival order.
    pub fn extend(&mut self, other: ListResult) {
        self.objects.extend(other.objects);
        self.common_prefixes.extend(other.common_prefixes);
    }
}

#[derive(Debug, Deserialize)]
struct RawObject {
    key: String,
    size: i64,
}

#[derive(Debug, Deserialize)]
struct RawCommonPrefix {
    #[serde(rename = "Prefix")]
    prefix: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawPage {
    #[serde(default)]
    results: Vec<RawObject>,
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Vec<RawCommonPrefix>,
    #[serde(default)]
    truncated: bool,
}

/// One decoded listing page: its [`ListResult`] plus the server's
/// pagination state. The page shape carries no `marker` field of its own —
/// the next marker is the last returned object's name, standard S3-style
/// pagination (see [`crate::facade`]'s `list_bucket_stream`).
pub(crate) struct ParsedPage {
    pub result: ListResult,
    pub truncated: bool,
}

/// Parses one listing page. Any parse failure maps to
/// [`Error::HttpBadResponse`] and should terminate the stream rather than
/// skip the page and continue.
pub(crate) fn parse_page(body: &[u8]) -> Result<ParsedPage, Error> {
    let raw: RawPage = serde_json::from_slice(body)
        .map_err(|e| Error::HttpBadResponse(format!("malformed list response: {e}")))?;

    let result = ListResult {
        objects: raw
            .results
            .into_iter()
            .map(|o| ObjectInfo {
                name: o.key,
                size: o.size,
            })
            .collect(),
        common_prefixes: raw
            .common_prefixes
            .into_iter()
            .map(|p| p.prefix)
            .collect(),
    };

    Ok(ParsedPage {
        result,
        truncated: raw.truncated,
    })
}
