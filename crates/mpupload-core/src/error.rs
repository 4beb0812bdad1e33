//! Upload error types.
//!
//! Every failure is classified into exactly one [`ErrorKind`]. Only
//! [`ErrorKind::Transport`] failures are retried; everything else surfaces
//! immediately. Once an upload has been initiated, a terminal failure is wrapped
//! in an [`UploadFailure`] that also records what happened to the abort call.
//!
//! # Usage
//!
//! ```
//! use mpupload_core::error::{ErrorKind, UploadError};
//!
//! let err = UploadError::Transport("connection reset by peer".to_owned());
//! assert_eq!(err.kind(), ErrorKind::Transport);
//! assert!(err.is_retryable());
//!
//! let err = UploadError::protocol("initiate response has no UploadId");
//! assert!(!err.is_retryable());
//! ```

use std::fmt;

use mpupload_auth::AuthError;
use mpupload_xml::XmlError;

use crate::orchestrator::UploadState;

/// Classification of an [`UploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad credentials, region, endpoint or bucket. Raised before any network call.
    Configuration,
    /// The source file or chunking parameters cannot be uploaded.
    InvalidInput,
    /// The server answered, but not with what the protocol requires.
    Protocol,
    /// A single call failed to connect, timed out, or lost its connection.
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::InvalidInput => "invalid input",
            Self::Protocol => "protocol",
            Self::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Error returned by every upload operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The input cannot be uploaded as given.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An unexpected or failed server response.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was wrong with the response.
        message: String,
        /// HTTP status, when the failure came from a response status.
        status: Option<u16>,
        /// S3 error code parsed from an `<Error>` body.
        code: Option<String>,
        /// Raw response body, when one was received.
        body: Option<String>,
    },

    /// Connection or timeout failure of a single call.
    #[error("transport error: {0}")]
    Transport(String),
}

impl UploadError {
    /// A protocol error without response details.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            status: None,
            code: None,
            body: None,
        }
    }

    /// The classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Whether a fresh attempt of the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// The raw server error body, if this error carries one.
    #[must_use]
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Self::Protocol { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    /// The S3 error code, if the server returned an `<Error>` document.
    #[must_use]
    pub fn s3_code(&self) -> Option<&str> {
        match self {
            Self::Protocol { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<AuthError> for UploadError {
    fn from(err: AuthError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<XmlError> for UploadError {
    fn from(err: XmlError) -> Self {
        Self::protocol(format!("malformed response body: {err}"))
    }
}

/// What happened to the abort call after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortOutcome {
    /// No upload id existed yet, so there was nothing to abort.
    NotAttempted,
    /// The server accepted the abort.
    Aborted,
    /// The abort call itself failed.
    Failed(String),
}

impl fmt::Display for AbortOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAttempted => f.write_str("abort not attempted"),
            Self::Aborted => f.write_str("upload aborted"),
            Self::Failed(reason) => write!(f, "abort failed: {reason}"),
        }
    }
}

/// Terminal result of a failed upload.
///
/// `error` is always the failure that ended the upload. A failing abort is
/// reported in `abort` and never replaces it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upload failed while {state}: {error} ({abort})")]
pub struct UploadFailure {
    /// The failure that ended the upload.
    #[source]
    pub error: UploadError,
    /// The state the upload was in when `error` occurred.
    pub state: UploadState,
    /// The upload id, if initiate had succeeded.
    pub upload_id: Option<String>,
    /// Result of the best-effort abort.
    pub abort: AbortOutcome,
}

impl UploadFailure {
    /// Classification of the underlying error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_only_retry_transport_errors() {
        assert!(UploadError::Transport("timeout".into()).is_retryable());
        assert!(!UploadError::Configuration("region".into()).is_retryable());
        assert!(!UploadError::InvalidInput("empty".into()).is_retryable());
        assert!(!UploadError::protocol("no etag").is_retryable());
    }

    #[test]
    fn test_should_map_auth_error_to_configuration() {
        let err: UploadError = AuthError::EmptyRegion.into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_should_map_xml_error_to_protocol() {
        let err: UploadError = XmlError::MissingElement("root element".into()).into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("root element"));
    }

    #[test]
    fn test_should_expose_raw_body_of_protocol_error() {
        let err = UploadError::Protocol {
            message: "HTTP 403".into(),
            status: Some(403),
            code: Some("SignatureDoesNotMatch".into()),
            body: Some("<Error><Code>SignatureDoesNotMatch</Code></Error>".into()),
        };
        assert_eq!(err.s3_code(), Some("SignatureDoesNotMatch"));
        assert!(err.raw_body().is_some_and(|b| b.contains("SignatureDoesNotMatch")));
        assert!(UploadError::Transport("x".into()).raw_body().is_none());
    }

    #[test]
    fn test_should_format_failure_with_abort_outcome() {
        let failure = UploadFailure {
            error: UploadError::Transport("connection refused".into()),
            state: UploadState::UploadingParts,
            upload_id: Some("abc".into()),
            abort: AbortOutcome::Failed("HTTP 500".into()),
        };
        let message = failure.to_string();
        assert!(message.contains("uploading parts"));
        assert!(message.contains("connection refused"));
        assert!(message.contains("abort failed: HTTP 500"));
        assert_eq!(failure.kind(), ErrorKind::Transport);
    }
}
