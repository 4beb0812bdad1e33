//! HTTP transport seam.
//!
//! [`S3Transport`] sends one fully signed request and returns the raw
//! response. It performs no retries and no status interpretation; a response
//! of any status is `Ok`. Only failures to obtain a response at all
//! (connect errors, timeouts, broken connections) are reported, always as
//! [`UploadError::Transport`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::trace;

use crate::error::UploadError;

/// A signed request ready to be sent.
#[derive(Debug, Clone)]
pub struct S3Request {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including the encoded path and query.
    pub url: String,
    /// Headers to send verbatim, `Host` and `Authorization` included.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

/// A received response.
#[derive(Debug, Clone)]
pub struct S3Response {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl S3Response {
    /// The value of a header, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one HTTP request.
#[async_trait]
pub trait S3Transport: Send + Sync {
    /// Send `request` and return whatever response the server produced.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Transport`] if no response was received.
    async fn send(&self, request: S3Request) -> Result<S3Response, UploadError>;
}

/// [`S3Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose every call is bounded by the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Configuration`] if the HTTP client cannot be built.
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| UploadError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl S3Transport for HttpTransport {
    async fn send(&self, request: S3Request) -> Result<S3Response, UploadError> {
        let S3Request {
            method,
            url,
            headers,
            body,
        } = request;

        trace!(%method, %url, body_len = body.len(), "Sending request");

        let response = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&url, &e))?;

        trace!(%status, %url, body_len = body.len(), "Received response");

        Ok(S3Response {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(url: &str, err: &reqwest::Error) -> UploadError {
    let cause = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    UploadError::Transport(format!("{cause} for {url}: {err}"))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn test_should_read_header_values() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"abc\""));
        let response = S3Response {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"ok"),
        };
        assert_eq!(response.header("ETag"), Some("\"abc\""));
        assert_eq!(response.header("x-missing"), None);
        assert_eq!(response.body_text(), "ok");
    }

    #[test]
    fn test_should_build_http_transport() {
        let transport = HttpTransport::new(Duration::from_secs(1), Duration::from_secs(2));
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn test_should_report_refused_connection_as_transport_error() {
        let transport =
            HttpTransport::new(Duration::from_secs(2), Duration::from_secs(5)).expect("client");
        let request = S3Request {
            method: Method::GET,
            url: "http://127.0.0.1:1/bucket/key".to_owned(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        let err = transport.send(request).await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
