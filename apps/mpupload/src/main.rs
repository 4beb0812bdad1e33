//! mpupload - upload one large file to S3-compatible storage.
//!
//! Reads everything from the environment, uploads the file as a SigV4-signed
//! multipart upload, and exits non-zero if the upload did not complete. On
//! failure the incomplete upload is aborted so that it does not keep holding
//! storage.
//!
//! # Usage
//!
//! ```text
//! AWS_ACCESS_KEY_ID=... AWS_SECRET_ACCESS_KEY=... \
//! S3_ENDPOINT_URL=https://s3.eu-ro-1.example.com AWS_REGION=EU-RO-1 \
//! S3_BUCKET=media S3_KEY=uploads/session.wav UPLOAD_FILE=session.wav UPLOAD_CONTENT_TYPE=audio/wav \
//! mpupload
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `AWS_ACCESS_KEY_ID` / `RUNPOD_AWS_ACCESS_KEY_ID` / `ACCESS_KEY` | *(required)* | Access key id |
//! | `AWS_SECRET_ACCESS_KEY` / `RUNPOD_AWS_SECRET_ACCESS_KEY` / `SECRET_KEY` | *(required)* | Secret access key |
//! | `S3_BUCKET` / `RUNPOD_BUCKET_NAME` | *(required)* | Bare bucket id |
//! | `S3_KEY` | *(required)* | Destination object key |
//! | `UPLOAD_FILE` | *(required)* | Source file |
//! | `S3_ENDPOINT_URL` / `RUNPOD_S3_ENDPOINT` | `http://localhost:4566` | Endpoint base URL |
//! | `AWS_REGION` / `RUNPOD_REGION` | `us-east-1` | Region, signed verbatim |
//! | `UPLOAD_CONTENT_TYPE` | `application/octet-stream` | Object content type |
//! | `UPLOAD_CHUNK_SIZE` | `10485760` | Part size in bytes |
//! | `UPLOAD_CONCURRENCY` | `3` | Parts in flight |
//! | `UPLOAD_MAX_ATTEMPTS` | `3` | Attempts per call |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mpupload_core::config::{UploadConfig, UploadTarget, credentials_from_env};
use mpupload_core::{HttpTransport, S3Client, UploadFailure, Uploader};

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

fn report_failure(failure: &UploadFailure) {
    error!(
        kind = %failure.kind(),
        state = %failure.state,
        upload_id = failure.upload_id.as_deref().unwrap_or("-"),
        abort = %failure.abort,
        error = %failure.error,
        "Upload failed"
    );
    if let Some(body) = failure.error.raw_body() {
        error!(body, "Server response body");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = UploadConfig::from_env();
    init_tracing(&config.log_level)?;

    config.validate().context("invalid upload configuration")?;
    let target = UploadTarget::from_env().context("upload target is not configured")?;
    target.validate().context("invalid upload target")?;
    let credentials = credentials_from_env().context("credentials are not configured")?;

    info!(
        config = %serde_json::to_string(&config).unwrap_or_default(),
        bucket = %target.bucket,
        key = %target.key,
        file = %target.file.display(),
        "mpupload starting"
    );

    let transport = HttpTransport::new(config.connect_timeout(), config.request_timeout())?;
    let client = S3Client::new(transport, credentials, &config)?;
    let uploader = Uploader::new(client, &config);

    match uploader
        .upload(&target.bucket, &target.key, &target.file)
        .await
    {
        Ok(outcome) => {
            info!(
                bucket = %outcome.bucket,
                key = %outcome.key,
                parts = outcome.part_count,
                bytes = outcome.total_bytes,
                etag = outcome.etag.as_deref().unwrap_or("-"),
                location = outcome.location.as_deref().unwrap_or("-"),
                "Upload finished"
            );
            Ok(())
        }
        Err(failure) => {
            report_failure(&failure);
            Err(failure).context("multipart upload did not complete")
        }
    }
}
