//! Canonical request construction for AWS Signature Version 4.
//!
//! The canonical request is the exact byte sequence that gets hashed before
//! signing:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! The same encoding helpers are used to build the request URL, so the path
//! and query the server receives are byte-for-byte what was signed.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters left unencoded in URI path segments and query values.
///
/// Everything except the RFC 3986 unreserved characters
/// (A-Z, a-z, 0-9, `-`, `_`, `.`, `~`) is percent-encoded.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Build the full canonical request string from its components.
///
/// # Examples
///
/// ```
/// use mpupload_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "PUT",
///     "/bucket/part.bin",
///     "uploadId=abc&partNumber=1",
///     &[("host", "s3.example.com")],
///     &["host"],
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
/// );
/// assert!(canonical.starts_with("PUT\n/bucket/part.bin\npartNumber=1&uploadId=abc\n"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(&str, &str)],
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    let canonical_uri = build_canonical_uri(uri);
    let canonical_query = build_canonical_query_string(query_string);
    let canonical_headers = build_canonical_headers(headers, signed_headers);
    let signed_headers_str = build_signed_headers_string(signed_headers);

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical URI by encoding each path segment individually.
///
/// Slashes are preserved and an empty path becomes `/`. Segments are decoded
/// before encoding, so an already-encoded path is not double-encoded.
///
/// # Examples
///
/// ```
/// use mpupload_auth::canonical::build_canonical_uri;
///
/// assert_eq!(build_canonical_uri("/bucket/my file.wav"), "/bucket/my%20file.wav");
/// assert_eq!(build_canonical_uri(""), "/");
/// ```
#[must_use]
pub fn build_canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }

    path.split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            uri_encode(&decoded)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the canonical query string by sorting parameters.
///
/// Parameters are sorted by name, then by value. Values are taken as they will
/// appear on the wire; callers encode them with [`encode_query_value`] first.
/// A parameter without `=` (for example `uploads`) is canonicalized as
/// `uploads=`.
///
/// # Examples
///
/// ```
/// use mpupload_auth::canonical::build_canonical_query_string;
///
/// assert_eq!(build_canonical_query_string("uploads"), "uploads=");
/// assert_eq!(
///     build_canonical_query_string("uploadId=xyz&partNumber=7"),
///     "partNumber=7&uploadId=xyz"
/// );
/// ```
#[must_use]
pub fn build_canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();

    params.sort_unstable();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical headers block for the signed headers.
///
/// Names are lowercased, values trimmed with inner whitespace runs collapsed,
/// and the result is sorted by name. Repeated headers are joined with commas.
/// The block has no trailing newline.
#[must_use]
pub fn build_canonical_headers(headers: &[(&str, &str)], signed_headers: &[&str]) -> String {
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let trimmed_value = collapse_whitespace(value.trim());
        header_map
            .entry(name.to_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&trimmed_value);
            })
            .or_insert(trimmed_value);
    }

    let mut sorted_signed: Vec<&str> = signed_headers.to_vec();
    sorted_signed.sort_unstable();

    sorted_signed
        .iter()
        .filter_map(|name| header_map.get(*name).map(|value| format!("{name}:{value}")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the semicolon-separated, sorted list of signed header names.
///
/// # Examples
///
/// ```
/// use mpupload_auth::canonical::build_signed_headers_string;
///
/// assert_eq!(
///     build_signed_headers_string(&["x-amz-date", "host", "x-amz-content-sha256"]),
///     "host;x-amz-content-sha256;x-amz-date"
/// );
/// ```
#[must_use]
pub fn build_signed_headers_string(signed_headers: &[&str]) -> String {
    let mut sorted: Vec<&str> = signed_headers.to_vec();
    sorted.sort_unstable();
    sorted.join(";")
}

/// Encode an object path (`bucket/key/...`) for use in a request URL.
///
/// The result always starts with `/` and is already in canonical form.
///
/// # Examples
///
/// ```
/// use mpupload_auth::canonical::encode_object_path;
///
/// assert_eq!(
///     encode_object_path("7z79eg0uur", "uploads/run 1/a+b.wav"),
///     "/7z79eg0uur/uploads/run%201/a%2Bb.wav"
/// );
/// ```
#[must_use]
pub fn encode_object_path(bucket: &str, key: &str) -> String {
    let mut path = String::with_capacity(bucket.len() + key.len() + 2);
    path.push('/');
    path.push_str(&uri_encode(bucket));
    for segment in key.trim_start_matches('/').split('/') {
        path.push('/');
        path.push_str(&uri_encode(segment));
    }
    path
}

/// Encode a single query parameter value.
#[must_use]
pub fn encode_query_value(value: &str) -> String {
    uri_encode(value)
}

fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
