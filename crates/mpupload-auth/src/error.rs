//! Error types for SigV4 signing.

/// Errors that can occur while signing a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A credential field is empty.
    #[error("empty credential: {0}")]
    EmptyCredential(&'static str),

    /// The region is empty and cannot form a credential scope.
    #[error("empty region in credential scope")]
    EmptyRegion,

    /// The `Authorization` value could not be parsed.
    #[error("invalid Authorization header format")]
    InvalidAuthHeader,

    /// The signing algorithm is not `AWS4-HMAC-SHA256`.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The `Credential` component is not `AKID/date/region/service/aws4_request`.
    #[error("invalid credential format")]
    InvalidCredential,
}
