//! Minimal XML helpers for the two multipart-upload exchanges that speak
//! XML rather than JSON: extracting `<UploadId>` from the
//! `begin_multi_part_upload` response, and building the
//! `<CompleteMultipartUpload>` body for `finish_multi_part_upload`.
//!
//! This is deliberately not a general XML parser — the bucket-listing
//! responses speak JSON (see `list.rs`) and these two multipart shapes are
//! fixed and simple enough that literal tag extraction is both sufficient
//! and exactly what's needed.

use crate::error::Error;

/// Extracts the text between the first `<UploadId>` and its matching
/// closing tag. Absence is a malformed-response error.
pub fn extract_upload_id(body: &str) -> Result<String, Error> {
    extract_tag(body, "UploadId")
        .ok_or_else(|| Error::HttpBadResponse("response did not contain <UploadId>".to_string()))
}

fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

/// Builds the `<CompleteMultipartUpload>` body, with `<Part>` entries in
/// exactly the caller-supplied order.
pub fn complete_multipart_upload_body(parts: &[(u32, String)]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        body.push_str("<Part><PartNumber>");
        body.push_str(&number.to_string());
        body.push_str("</PartNumber><ETag>");
        body.push_str(etag);
        body.push_str("</ETag></Part>");
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_upload_id_between_tags() {
        let body = "<InitiateMultipartUploadResult><UploadId>abc-123</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(extract_upload_id(body).unwrap(), "abc-123");
    }

    #[test]
    fn missing_upload_id_is_bad_response() {
        let err = extract_upload_id("<Foo></Foo>").unwrap_err();
        assert!(matches!(err, Error::HttpBadResponse(_)));
    }

    #[test]
    fn complete_body_preserves_caller_order() {
        let parts = vec![
            (2, "etag-b".to_string()),
            (1, "etag-a".to_string()),
        ];
        let body = complete_multipart_upload_body(&parts);
        assert_eq!(
            body,
            "<CompleteMultipartUpload><Part><PartNumber>2</PartNumber><ETag>etag-b</ETag></Part><Part><PartNumber>1</PartNumber><ETag>etag-a</ETag></Part></CompleteMultipartUpload>"
        );
    }
}
