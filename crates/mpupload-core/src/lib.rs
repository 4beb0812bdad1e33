//! Multipart upload engine for mpupload.
//!
//! This crate turns a local file into an S3 object through the multipart
//! upload protocol. It plans the parts, signs every call with
//! [`mpupload_auth`], tracks acknowledged parts, and completes or aborts the
//! upload.
//!
//! # Architecture
//!
//! ```text
//!   Uploader (state machine, retries, concurrency)
//!        |
//!        v
//!   S3Client (signed initiate / part / complete / abort)
//!        |
//!        v
//!   S3Transport (reqwest in production, in-memory in tests)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//!
//! use mpupload_core::config::{UploadConfig, credentials_from_env};
//! use mpupload_core::{HttpTransport, S3Client, Uploader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UploadConfig::from_env();
//! let transport = HttpTransport::new(config.connect_timeout(), config.request_timeout())?;
//! let client = S3Client::new(transport, credentials_from_env()?, &config)?;
//! let uploader = Uploader::new(client, &config);
//!
//! let outcome = uploader
//!     .upload("7z79eg0uur", "uploads/videoplayback.wav", Path::new("videoplayback.wav"))
//!     .await?;
//! println!("uploaded {} bytes in {} parts", outcome.total_bytes, outcome.part_count);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`chunker`] - Splitting a file size into part ranges
//! - [`client`] - The four signed multipart calls
//! - [`config`] - Environment-driven configuration and validation
//! - [`error`] - Error classification and terminal failures
//! - [`orchestrator`] - The upload state machine
//! - [`progress`] - Throughput and ETA accounting
//! - [`session`] - Part bookkeeping of an in-progress upload
//! - [`transport`] - The HTTP seam

pub mod chunker;
pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::S3Client;
pub use config::{UploadConfig, UploadTarget};
pub use error::{AbortOutcome, ErrorKind, UploadError, UploadFailure};
pub use orchestrator::{RetryPolicy, UploadOutcome, UploadState, Uploader};
pub use transport::{HttpTransport, S3Transport};
