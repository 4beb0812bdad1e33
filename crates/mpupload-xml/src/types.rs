//! Multipart upload documents.

/// One `<Part>` entry of the completion document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// ETag returned by the part upload, with or without surrounding quotes.
    pub etag: String,
}

/// Body of `POST /{bucket}/{key}?uploadId=ID`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedMultipartUpload {
    /// Parts in ascending part number order.
    pub parts: Vec<CompletedPart>,
}

/// Response to `POST /{bucket}/{key}?uploads=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitiateMultipartUploadResult {
    /// Bucket echoed by the server.
    pub bucket: Option<String>,
    /// Key echoed by the server.
    pub key: Option<String>,
    /// Server-assigned upload id.
    pub upload_id: Option<String>,
}

/// Response to a successful completion call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteMultipartUploadResult {
    /// URL of the assembled object.
    pub location: Option<String>,
    /// Bucket of the assembled object.
    pub bucket: Option<String>,
    /// Key of the assembled object.
    pub key: Option<String>,
    /// ETag of the assembled object.
    pub etag: Option<String>,
}

/// Flat `<Error>` body returned by S3-compatible endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3ErrorResponse {
    /// Error code such as `NoSuchUpload`.
    pub code: Option<String>,
    /// Human readable message.
    pub message: Option<String>,
    /// Request id assigned by the server.
    pub request_id: Option<String>,
}

/// Wrap an ETag in double quotes unless it already is.
///
/// # Examples
///
/// ```
/// use mpupload_xml::quote_etag;
///
/// assert_eq!(quote_etag("abc"), "\"abc\"");
/// assert_eq!(quote_etag("\"abc\""), "\"abc\"");
/// ```
#[must_use]
pub fn quote_etag(etag: &str) -> String {
    if etag.len() >= 2 && etag.starts_with('"') && etag.ends_with('"') {
        etag.to_owned()
    } else {
        format!("\"{}\"", etag.trim_matches('"'))
    }
}
