//! Signed S3 multipart calls.
//!
//! [`S3Client`] issues the four multipart requests against a path-style
//! endpoint. Each call is signed with a fresh timestamp, so the same call can
//! be repeated safely after a transport failure.
//!
//! | Call | Request |
//! |------|---------|
//! | initiate | `POST /{bucket}/{key}?uploads=` |
//! | upload part | `PUT /{bucket}/{key}?partNumber={n}&uploadId={id}` |
//! | complete | `POST /{bucket}/{key}?uploadId={id}` |
//! | abort | `DELETE /{bucket}/{key}?uploadId={id}` |

use bytes::Bytes;
use chrono::Utc;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use mpupload_auth::canonical::{encode_object_path, encode_query_value};
use mpupload_auth::{
    Credentials, EMPTY_PAYLOAD_SHA256, RequestDescriptor, format_amz_date, hash_payload, sign,
};
use mpupload_xml::{
    CompleteMultipartUploadResult, CompletedMultipartUpload, CompletedPart,
    InitiateMultipartUploadResult, S3ErrorResponse, from_xml, from_xml_expecting,
    root_element_name, to_xml,
};
use reqwest::Url;
use tracing::debug;

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::session::{MultipartSession, PartRecord};
use crate::transport::{S3Request, S3Response, S3Transport};

const X_AMZ_CONTENT_SHA256: HeaderName = HeaderName::from_static("x-amz-content-sha256");
const X_AMZ_DATE: HeaderName = HeaderName::from_static("x-amz-date");

/// Signs and sends multipart calls over an [`S3Transport`].
#[derive(Debug)]
pub struct S3Client<T> {
    transport: T,
    credentials: Credentials,
    region: String,
    content_type: String,
    /// Endpoint base without trailing slash, e.g. `https://s3.example.com:9000/prefix`.
    base_url: String,
    /// Path prefix of the endpoint, prepended to every signed path.
    base_path: String,
    /// `Host` header value: host plus non-default port.
    host: String,
}

impl<T: S3Transport> S3Client<T> {
    /// Create a client for the endpoint, region and content type in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Configuration`] if the configuration is invalid.
    pub fn new(
        transport: T,
        credentials: Credentials,
        config: &UploadConfig,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;
        let host = host_header(&endpoint)?;
        let base_path = endpoint.path().trim_end_matches('/').to_owned();
        let base_url = format!(
            "{}://{host}{base_path}",
            endpoint.scheme()
        );

        Ok(Self {
            transport,
            credentials,
            region: config.region.clone(),
            content_type: config.content_type.clone(),
            base_url,
            base_path,
            host,
        })
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start a multipart upload and return its session.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the server rejects the call or the response
    /// has no `UploadId`, and a transport error if no response arrives.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<MultipartSession, UploadError> {
        let content_type = HeaderValue::from_str(&self.content_type).map_err(|e| {
            UploadError::Configuration(format!("invalid content type '{}': {e}", self.content_type))
        })?;

        let response = self
            .send_signed(
                Method::POST,
                bucket,
                key,
                "uploads=",
                Some(content_type),
                Bytes::new(),
            )
            .await?;

        let result: InitiateMultipartUploadResult =
            from_xml_expecting("InitiateMultipartUploadResult", &response.body)
                .map_err(|e| with_body(e.into(), &response))?;

        let upload_id = result.upload_id.ok_or_else(|| {
            with_body(
                UploadError::protocol("initiate response has no UploadId"),
                &response,
            )
        })?;

        MultipartSession::new(bucket, key, upload_id)
    }

    /// Upload one part and return its record.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the server rejects the part or omits the
    /// `ETag` header, and a transport error if no response arrives.
    pub async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Bytes,
    ) -> Result<PartRecord, UploadError> {
        let length = body.len() as u64;
        let query = format!(
            "partNumber={part_number}&uploadId={}",
            encode_query_value(session.upload_id())
        );

        let response = self
            .send_signed(Method::PUT, session.bucket(), session.key(), &query, None, body)
            .await?;

        let etag = response
            .header("etag")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                with_body(
                    UploadError::protocol(format!("part {part_number} response has no ETag header")),
                    &response,
                )
            })?;

        Ok(PartRecord {
            part_number,
            length,
            etag: mpupload_xml::quote_etag(etag),
        })
    }

    /// Assemble the object from `parts`, which must be sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless the response is a
    /// `CompleteMultipartUploadResult` document, including when a `200 OK`
    /// carries an `<Error>` body.
    pub async fn complete_multipart_upload(
        &self,
        session: &MultipartSession,
        parts: &[PartRecord],
    ) -> Result<CompleteMultipartUploadResult, UploadError> {
        let document = CompletedMultipartUpload {
            parts: parts
                .iter()
                .map(|p| CompletedPart {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
        };
        let body = to_xml("CompleteMultipartUpload", &document)
            .map_err(|e| UploadError::InvalidInput(format!("cannot encode completion document: {e}")))?;
        let query = format!("uploadId={}", encode_query_value(session.upload_id()));

        let response = self
            .send_signed(
                Method::POST,
                session.bucket(),
                session.key(),
                &query,
                Some(HeaderValue::from_static("application/xml")),
                Bytes::from(body),
            )
            .await?;

        let root = root_element_name(&response.body).map_err(|e| with_body(e.into(), &response))?;
        if root == "Error" {
            return Err(error_response(&response));
        }

        from_xml_expecting("CompleteMultipartUploadResult", &response.body)
            .map_err(|e| with_body(e.into(), &response))
    }

    /// Abort the upload, discarding every stored part.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the server rejects the call and a transport
    /// error if no response arrives.
    pub async fn abort_multipart_upload(&self, session: &MultipartSession) -> Result<(), UploadError> {
        let query = format!("uploadId={}", encode_query_value(session.upload_id()));
        self.send_signed(
            Method::DELETE,
            session.bucket(),
            session.key(),
            &query,
            None,
            Bytes::new(),
        )
        .await?;
        Ok(())
    }

    /// Sign and send one call; any status of 400 or above becomes a protocol error.
    async fn send_signed(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        query: &str,
        content_type: Option<HeaderValue>,
        body: Bytes,
    ) -> Result<S3Response, UploadError> {
        let object_path = encode_object_path(bucket, key);
        let path = format!("{}{object_path}", self.base_path);
        let payload_hash = if body.is_empty() {
            EMPTY_PAYLOAD_SHA256.to_owned()
        } else {
            hash_payload(&body)
        };
        let timestamp = Utc::now();

        let descriptor = RequestDescriptor {
            method: method.as_str(),
            uri: &path,
            query,
            host: &self.host,
            payload_hash: &payload_hash,
            timestamp,
        };
        let authorization = sign(&descriptor, &self.credentials, &self.region)?;

        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&self.host)?);
        headers.insert(X_AMZ_CONTENT_SHA256, header_value(&payload_hash)?);
        headers.insert(X_AMZ_DATE, header_value(&format_amz_date(&timestamp))?);
        headers.insert(AUTHORIZATION, header_value(&authorization)?);
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, content_type);
        }

        let url = format!("{}{object_path}?{query}", self.base_url);
        debug!(%method, %url, body_len = body.len(), "Sending signed request");

        let response = self
            .transport
            .send(S3Request {
                method,
                url,
                headers,
                body,
            })
            .await?;

        if response.status.as_u16() >= 400 {
            return Err(error_response(&response));
        }
        Ok(response)
    }
}

/// `host[:port]` as it appears in the `Host` header for `url`.
fn host_header(url: &Url) -> Result<String, UploadError> {
    let host = url
        .host_str()
        .ok_or_else(|| UploadError::Configuration(format!("endpoint '{url}' has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

fn header_value(value: &str) -> Result<HeaderValue, UploadError> {
    HeaderValue::from_str(value)
        .map_err(|e| UploadError::Configuration(format!("invalid header value '{value}': {e}")))
}

/// Build a protocol error from an error status or an `<Error>` body.
fn error_response(response: &S3Response) -> UploadError {
    let body = response.body_text();
    let parsed: Option<S3ErrorResponse> = from_xml(&response.body).ok();
    let code = parsed.as_ref().and_then(|e| e.code.clone());
    let detail = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .or_else(|| code.clone())
        .unwrap_or_else(|| "no error document".to_owned());

    UploadError::Protocol {
        message: format!("HTTP {}: {detail}", response.status.as_u16()),
        status: Some(response.status.as_u16()),
        code,
        body: (!body.is_empty()).then_some(body),
    }
}

/// Attach the status and raw body of `response` to a protocol error.
fn with_body(err: UploadError, response: &S3Response) -> UploadError {
    match err {
        UploadError::Protocol { message, code, .. } => UploadError::Protocol {
            message,
            status: Some(response.status.as_u16()),
            code,
            body: Some(response.body_text()),
        },
        other => other,
    }
}
