//! Upload configuration.
//!
//! Provides [`UploadConfig`] for tuning the uploader, [`UploadTarget`] naming
//! what to upload and where, and [`credentials_from_env`]. These are the only
//! places in the library that read the process environment; every other
//! component receives its inputs explicitly.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mpupload_auth::Credentials;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;
use typed_builder::TypedBuilder;

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::error::UploadError;
use crate::orchestrator::RetryPolicy;

/// Uploader configuration.
///
/// All fields have defaults. Configuration can be loaded from environment
/// variables via [`UploadConfig::from_env`].
///
/// # Examples
///
/// ```
/// use mpupload_core::config::UploadConfig;
///
/// let config = UploadConfig::default();
/// assert_eq!(config.chunk_size, 10 * 1024 * 1024);
/// assert_eq!(config.concurrency, 3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    /// Base URL of the S3-compatible endpoint. Requests are path-style.
    #[builder(default = String::from("http://localhost:4566"))]
    pub endpoint: String,

    /// Region bound into every signature, used verbatim.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,

    /// `Content-Type` of the assembled object.
    #[builder(default = String::from("application/octet-stream"))]
    pub content_type: String,

    /// Part size in bytes. Only the last part may be shorter.
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Maximum number of part uploads in flight.
    #[builder(default = 3)]
    pub concurrency: usize,

    /// Attempts per call, including the first one.
    #[builder(default = 3)]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on every further retry.
    #[builder(default = 1000)]
    pub retry_base_delay_ms: u64,

    /// Upper bound of a single retry delay.
    #[builder(default = 30_000)]
    pub retry_max_delay_ms: u64,

    /// Connect timeout of a single HTTP call.
    #[builder(default = 60)]
    pub connect_timeout_secs: u64,

    /// Total timeout of a single HTTP call, body transfer included.
    #[builder(default = 300)]
    pub request_timeout_secs: u64,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("http://localhost:4566"),
            region: String::from("us-east-1"),
            content_type: String::from("application/octet-stream"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 3,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            connect_timeout_secs: 60,
            request_timeout_secs: 300,
            log_level: String::from("info"),
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `S3_ENDPOINT_URL` or `RUNPOD_S3_ENDPOINT` | `http://localhost:4566` |
    /// | `AWS_REGION` or `RUNPOD_REGION` | `us-east-1` |
    /// | `UPLOAD_CONTENT_TYPE` | `application/octet-stream` |
    /// | `UPLOAD_CHUNK_SIZE` | `10485760` |
    /// | `UPLOAD_CONCURRENCY` | `3` |
    /// | `UPLOAD_MAX_ATTEMPTS` | `3` |
    /// | `UPLOAD_RETRY_BASE_DELAY_MS` | `1000` |
    /// | `UPLOAD_RETRY_MAX_DELAY_MS` | `30000` |
    /// | `UPLOAD_CONNECT_TIMEOUT_SECS` | `60` |
    /// | `UPLOAD_REQUEST_TIMEOUT_SECS` | `300` |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// Numeric values that fail to parse are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Examples
    ///
    /// ```
    /// use mpupload_core::config::UploadConfig;
    ///
    /// let config = UploadConfig::from_lookup(|name| match name {
    ///     "AWS_REGION" => Some("EU-RO-1".to_owned()),
    ///     "UPLOAD_CONCURRENCY" => Some("8".to_owned()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.region, "EU-RO-1");
    /// assert_eq!(config.concurrency, 8);
    /// ```
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = optional_var(&lookup, &["S3_ENDPOINT_URL", "RUNPOD_S3_ENDPOINT"]) {
            config.endpoint = v;
        }
        if let Some(v) = optional_var(&lookup, &["AWS_REGION", "RUNPOD_REGION"]) {
            config.region = v;
        }
        if let Some(v) = lookup("UPLOAD_CONTENT_TYPE") {
            config.content_type = v;
        }
        if let Some(n) = parse_var(&lookup, "UPLOAD_CHUNK_SIZE") {
            config.chunk_size = n;
        }
        if let Some(n) = parse_var(&lookup, "UPLOAD_CONCURRENCY") {
            config.concurrency = n;
        }
        if let Some(n) = parse_var(&lookup, "UPLOAD_MAX_ATTEMPTS") {
            config.max_attempts = n;
        }
        if let Some(n) = parse_var(&lookup, "UPLOAD_RETRY_BASE_DELAY_MS") {
            config.retry_base_delay_ms = n;
        }
        if let Some(n) = parse_var(&lookup, "UPLOAD_RETRY_MAX_DELAY_MS") {
            config.retry_max_delay_ms = n;
        }
        if let Some(n) = parse_var(&lookup, "UPLOAD_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = n;
        }
        if let Some(n) = parse_var(&lookup, "UPLOAD_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = n;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// Check the configuration before any network call is made.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Configuration`] for a malformed endpoint, a region
    /// mixing upper and lower case or containing characters outside
    /// `[A-Za-z0-9-]`, or a zero chunk size, concurrency, attempt count or timeout.
    pub fn validate(&self) -> Result<(), UploadError> {
        self.endpoint_url()?;
        validate_region(&self.region)?;

        if self.chunk_size == 0 {
            return Err(UploadError::Configuration(
                "chunk size must be at least 1 byte".to_owned(),
            ));
        }
        if self.concurrency == 0 {
            return Err(UploadError::Configuration(
                "concurrency must be at least 1".to_owned(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(UploadError::Configuration(
                "max attempts must be at least 1".to_owned(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(UploadError::Configuration(
                "timeouts must be at least 1 second".to_owned(),
            ));
        }
        if self.content_type.trim().is_empty() {
            return Err(UploadError::Configuration(
                "content type must not be empty".to_owned(),
            ));
        }

        Ok(())
    }

    /// Parse the endpoint into a URL with an `http` or `https` scheme and a host.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Configuration`] if the endpoint is malformed.
    pub fn endpoint_url(&self) -> Result<Url, UploadError> {
        let url = Url::parse(&self.endpoint).map_err(|e| {
            UploadError::Configuration(format!("invalid endpoint '{}': {e}", self.endpoint))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(UploadError::Configuration(format!(
                "endpoint '{}' must use http or https",
                self.endpoint
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(UploadError::Configuration(format!(
                "endpoint '{}' has no host",
                self.endpoint
            )));
        }
        if url.query().is_some() {
            return Err(UploadError::Configuration(format!(
                "endpoint '{}' must not carry a query string",
                self.endpoint
            )));
        }

        Ok(url)
    }

    /// Connect timeout of a single HTTP call.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Total timeout of a single HTTP call.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy for part uploads.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

/// What to upload and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    /// Bare bucket (volume) id, without `s3://` or any path.
    pub bucket: String,
    /// Destination object key.
    pub key: String,
    /// Local source file.
    pub file: PathBuf,
}

impl UploadTarget {
    /// Create a target.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            file: file.into(),
        }
    }

    /// Read `S3_BUCKET` (or `RUNPOD_BUCKET_NAME`), `S3_KEY` and `UPLOAD_FILE`
    /// from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Configuration`] if a variable is unset.
    pub fn from_env() -> Result<Self, UploadError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the target through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Configuration`] if a variable is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, UploadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            bucket: required_var(&lookup, &["S3_BUCKET", "RUNPOD_BUCKET_NAME"])?,
            key: required_var(&lookup, &["S3_KEY"])?,
            file: PathBuf::from(required_var(&lookup, &["UPLOAD_FILE"])?),
        })
    }

    /// Reject empty or prefixed buckets and empty keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use mpupload_core::config::UploadTarget;
    ///
    /// assert!(UploadTarget::new("7z79eg0uur", "a.wav", "a.wav").validate().is_ok());
    /// assert!(UploadTarget::new("s3://7z79eg0uur", "a.wav", "a.wav").validate().is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<(), UploadError> {
        let bucket = self.bucket.trim();
        if bucket.is_empty() {
            return Err(UploadError::Configuration("bucket must not be empty".to_owned()));
        }
        if bucket.contains("://") || bucket.contains('/') {
            return Err(UploadError::Configuration(format!(
                "bucket must be a bare id without scheme or path, got '{}'",
                self.bucket
            )));
        }
        if self.key.trim_start_matches('/').is_empty() {
            return Err(UploadError::Configuration("object key must not be empty".to_owned()));
        }
        Ok(())
    }
}

/// Build [`Credentials`] from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`,
/// falling back to `RUNPOD_AWS_ACCESS_KEY_ID` / `RUNPOD_AWS_SECRET_ACCESS_KEY`
/// and then `ACCESS_KEY` / `SECRET_KEY`.
///
/// # Errors
///
/// Returns [`UploadError::Configuration`] if either value is missing or empty.
pub fn credentials_from_env() -> Result<Credentials, UploadError> {
    credentials_from_lookup(|name| std::env::var(name).ok())
}

/// Build [`Credentials`] through an arbitrary variable lookup.
///
/// # Errors
///
/// Returns [`UploadError::Configuration`] if either value is missing or empty.
pub fn credentials_from_lookup<F>(lookup: F) -> Result<Credentials, UploadError>
where
    F: Fn(&str) -> Option<String>,
{
    let access_key = required_var(
        &lookup,
        &["AWS_ACCESS_KEY_ID", "RUNPOD_AWS_ACCESS_KEY_ID", "ACCESS_KEY"],
    )?;
    let secret_key = required_var(
        &lookup,
        &["AWS_SECRET_ACCESS_KEY", "RUNPOD_AWS_SECRET_ACCESS_KEY", "SECRET_KEY"],
    )?;
    Ok(Credentials::new(access_key, secret_key)?)
}

/// Check that a region is usable in a credential scope.
///
/// The region is signed verbatim, so `EU-RO-1` and `eu-ro-1` are different
/// scopes. Mixed case is rejected because no provider issues such codes.
fn validate_region(region: &str) -> Result<(), UploadError> {
    if region.is_empty() {
        return Err(UploadError::Configuration("region must not be empty".to_owned()));
    }
    if let Some(c) = region
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(UploadError::Configuration(format!(
            "region '{region}' contains invalid character '{c}'"
        )));
    }
    let has_upper = region.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = region.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower {
        return Err(UploadError::Configuration(format!(
            "region '{region}' mixes upper and lower case"
        )));
    }
    Ok(())
}

/// First non-empty value among `names`.
fn optional_var<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
}

fn required_var<F>(lookup: &F, names: &[&str]) -> Result<String, UploadError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_var(lookup, names)
        .ok_or_else(|| UploadError::Configuration(format!("{} is not set", names.join(" or "))))
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable value");
            None
        }
    }
}
