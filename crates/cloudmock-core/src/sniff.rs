//! Content-type inference for literal bodies.

use crate::request::{CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, CONTENT_TYPE_XML};

const OCTET_STREAM: &str = "application/octet-stream";

/// Magic prefixes, checked in order after leading whitespace is skipped for
/// the text formats.
const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"%PDF-", "application/pdf"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"PK\x03\x04", "application/zip"),
];

/// Infers a content type from the first character of a string body.
///
/// `<` means XML, `{` means JSON, anything else is plain text.
pub fn infer_content_type(body: &str) -> &'static str {
    match body.chars().next() {
        Some('<') => CONTENT_TYPE_XML,
        Some('{') => CONTENT_TYPE_JSON,
        _ => CONTENT_TYPE_TEXT,
    }
}

/// Sniffs a content type from raw bytes.
pub fn sniff_content_type(body: &[u8]) -> &'static str {
    if body.is_empty() {
        return CONTENT_TYPE_TEXT;
    }

    for (magic, content_type) in MAGIC {
        if body.starts_with(magic) {
            return *content_type;
        }
    }

    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let trimmed = &body[start..];

    if starts_with_ignore_case(trimmed, b"<!doctype html") || starts_with_ignore_case(trimmed, b"<html") {
        return "text/html; charset=utf-8";
    }
    if trimmed.starts_with(b"<?xml") || trimmed.starts_with(b"<") {
        return CONTENT_TYPE_XML;
    }
    if (trimmed.starts_with(b"{") || trimmed.starts_with(b"["))
        && serde_json::from_slice::<serde_json::Value>(trimmed).is_ok()
    {
        return CONTENT_TYPE_JSON;
    }

    if std::str::from_utf8(body).is_ok() && !body.contains(&0) {
        CONTENT_TYPE_TEXT
    } else {
        OCTET_STREAM
    }
}

fn starts_with_ignore_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_from_first_character() {
        assert_eq!(infer_content_type("<Foo/>"), "text/xml");
        assert_eq!(infer_content_type("{\"a\":1}"), "application/json");
        assert_eq!(infer_content_type("hello"), "text/plain");
        assert_eq!(infer_content_type(""), "text/plain");
    }

    #[test]
    fn sniff_binary_formats() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(sniff_content_type(b"GIF89a...."), "image/gif");
        assert_eq!(sniff_content_type(b"\xff\xd8\xff\xe0"), "image/jpeg");
        assert_eq!(sniff_content_type(b"%PDF-1.7"), "application/pdf");
        assert_eq!(sniff_content_type(b"\x1f\x8b\x08\x00"), "application/x-gzip");
        assert_eq!(sniff_content_type(b"PK\x03\x04"), "application/zip");
    }

    #[test]
    fn sniff_text_formats() {
        assert_eq!(sniff_content_type(b"  <!DOCTYPE html><html>"), "text/html; charset=utf-8");
        assert_eq!(sniff_content_type(b"<?xml version=\"1.0\"?><a/>"), "text/xml");
        assert_eq!(sniff_content_type(b"[1, 2]"), "application/json");
        assert_eq!(sniff_content_type(b"{broken"), "text/plain");
        assert_eq!(sniff_content_type(b"plain words"), "text/plain");
        assert_eq!(sniff_content_type(&[0, 159, 146, 150]), "application/octet-stream");
    }
}
