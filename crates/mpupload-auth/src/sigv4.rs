//! AWS Signature Version 4 signing.
//!
//! Signing a request takes five steps:
//!
//! 1. Build the canonical request over the fixed header set
//!    (`host`, `x-amz-content-sha256`, `x-amz-date`).
//! 2. Hash it with SHA-256.
//! 3. Build the string to sign from the timestamp, credential scope and hash.
//! 4. Derive the signing key with the HMAC-SHA256 chain.
//! 5. HMAC the string to sign and format the `Authorization` value.
//!
//! The main entry point is [`sign`].

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::build_canonical_request;
use crate::credentials::Credentials;
use crate::error::AuthError;

/// The only algorithm produced by this implementation.
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Service name bound into every credential scope.
const SERVICE: &str = "s3";

/// Terminal literal of the credential scope.
const SCOPE_TERMINATOR: &str = "aws4_request";

/// Header names covered by every signature, in canonical order.
const SIGNED_HEADER_NAMES: [&str; 3] = ["host", "x-amz-content-sha256", "x-amz-date"];

/// The `SignedHeaders` component of every `Authorization` value.
pub const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Hex SHA-256 of the empty string, used when a request has no body.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

type HmacSha256 = Hmac<Sha256>;

/// Attributes of one outgoing request that participate in the signature.
///
/// `uri` and `query` must be exactly what is sent on the wire (already
/// percent-encoded). Build a new descriptor for every attempt; the timestamp
/// is part of the signature.
#[derive(Debug, Clone, Copy)]
pub struct RequestDescriptor<'a> {
    /// HTTP method, e.g. `PUT`.
    pub method: &'a str,
    /// Request path, e.g. `/bucket/key`.
    pub uri: &'a str,
    /// Raw query string without the leading `?`.
    pub query: &'a str,
    /// Value of the `Host` header (`host[:port]`).
    pub host: &'a str,
    /// Value of the `x-amz-content-sha256` header.
    pub payload_hash: &'a str,
    /// Request time; also sent as `x-amz-date`.
    pub timestamp: DateTime<Utc>,
}

/// Date, region and service that scope a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    /// `YYYYMMDD` date of the request timestamp.
    pub date: String,
    /// Region code, used verbatim.
    pub region: String,
    /// Always `s3`.
    pub service: &'static str,
}

impl SigningContext {
    /// Derive the context for a request made at `timestamp` against `region`.
    #[must_use]
    pub fn new(timestamp: &DateTime<Utc>, region: &str) -> Self {
        Self {
            date: timestamp.format("%Y%m%d").to_string(),
            region: region.to_owned(),
            service: SERVICE,
        }
    }

    /// The `date/region/service/aws4_request` credential scope.
    #[must_use]
    pub fn credential_scope(&self) -> String {
        format!("{}/{}/{}/{SCOPE_TERMINATOR}", self.date, self.region, self.service)
    }
}

/// Format a timestamp as the ISO 8601 basic value of `x-amz-date`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use mpupload_auth::format_amz_date;
///
/// let ts = Utc.with_ymd_and_hms(2013, 5, 24, 0, 0, 0).unwrap();
/// assert_eq!(format_amz_date(&ts), "20130524T000000Z");
/// ```
#[must_use]
pub fn format_amz_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Sign a request and return the `Authorization` header value.
///
/// Identical inputs always produce identical output.
///
/// # Errors
///
/// Returns [`AuthError::EmptyRegion`] if `region` is empty.
pub fn sign(
    request: &RequestDescriptor<'_>,
    credentials: &Credentials,
    region: &str,
) -> Result<String, AuthError> {
    if region.is_empty() {
        return Err(AuthError::EmptyRegion);
    }

    let amz_date = format_amz_date(&request.timestamp);
    let headers = [
        ("host", request.host),
        ("x-amz-content-sha256", request.payload_hash),
        ("x-amz-date", amz_date.as_str()),
    ];

    let canonical_request = build_canonical_request(
        request.method,
        request.uri,
        request.query,
        &headers,
        &SIGNED_HEADER_NAMES,
        request.payload_hash,
    );

    debug!(canonical_request, "Built canonical request");

    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

    let context = SigningContext::new(&request.timestamp, region);
    let credential_scope = context.credential_scope();
    let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_hash);

    debug!(string_to_sign, "Built string to sign");

    let signing_key = derive_signing_key(
        credentials.secret_access_key(),
        &context.date,
        &context.region,
        context.service,
    );
    let signature = compute_signature(&signing_key, &string_to_sign);

    Ok(format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        credentials.access_key_id()
    ))
}

/// Build the SigV4 string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256\n
/// <ISO8601 timestamp>\n
/// <credential_scope>\n
/// <hex(SHA256(canonical_request))>
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, SCOPE_TERMINATOR.as_bytes())
}

/// HMAC `data` with `signing_key` and return the lowercase hex digest.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

/// The fields of a SigV4 `Authorization` value, split apart so that a
/// receiver can check the credential scope before comparing signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuth {
    /// The access key id.
    pub access_key_id: String,
    /// `YYYYMMDD` date of the credential scope.
    pub date: String,
    /// Region of the credential scope.
    pub region: String,
    /// Service of the credential scope.
    pub service: String,
    /// Signed header names.
    pub signed_headers: Vec<String>,
    /// Hex signature.
    pub signature: String,
}

impl ParsedAuth {
    /// The `date/region/service/aws4_request` scope this value claims.
    #[must_use]
    pub fn credential_scope(&self) -> String {
        format!("{}/{}/{}/{SCOPE_TERMINATOR}", self.date, self.region, self.service)
    }
}

/// Split an `Authorization` value into its fields.
///
/// Components may be separated by `,` with or without a following space and
/// may appear in any order.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for anything but
/// `AWS4-HMAC-SHA256`, [`AuthError::InvalidAuthHeader`] when `Credential`,
/// `SignedHeaders` or `Signature` is absent or empty, and
/// [`AuthError::InvalidCredential`] when the credential is not
/// `AKID/YYYYMMDD/region/service/aws4_request`.
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuth, AuthError> {
    let (algorithm, components) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidAuthHeader)?;
    if algorithm != ALGORITHM {
        return Err(AuthError::UnsupportedAlgorithm(algorithm.to_owned()));
    }

    let component = |name: &str| {
        components
            .split(',')
            .filter_map(|c| c.trim().split_once('='))
            .find_map(|(key, value)| (key == name && !value.is_empty()).then_some(value))
            .ok_or(AuthError::InvalidAuthHeader)
    };
    let credential = component("Credential")?;
    let signed_headers = component("SignedHeaders")?;
    let signature = component("Signature")?;

    let scope: Vec<&str> = credential.split('/').collect();
    let [access_key_id, date, region, service, terminator] = scope.as_slice() else {
        return Err(AuthError::InvalidCredential);
    };
    let date_is_valid = date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit());
    if access_key_id.is_empty()
        || !date_is_valid
        || region.is_empty()
        || *terminator != SCOPE_TERMINATOR
    {
        return Err(AuthError::InvalidCredential);
    }

    Ok(ParsedAuth {
        access_key_id: (*access_key_id).to_owned(),
        date: (*date).to_owned(),
        region: (*region).to_owned(),
        service: (*service).to_owned(),
        signed_headers: signed_headers.split(';').map(str::to_owned).collect(),
        signature: signature.to_owned(),
    })
}

/// Hex SHA-256 of a payload, for the `x-amz-content-sha256` header.
///
/// # Examples
///
/// ```
/// use mpupload_auth::{EMPTY_PAYLOAD_SHA256, hash_payload};
///
/// assert_eq!(hash_payload(b""), EMPTY_PAYLOAD_SHA256);
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
