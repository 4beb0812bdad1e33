//! S3 XML encoding and decoding for mpupload.
//!
//! The multipart protocol exchanges a handful of small XML documents: the
//! initiate result carrying the upload id, the completion document listing
//! every part, the completion result, and the flat `<Error>` body returned on
//! failure. This crate owns those documents and nothing else.
//!
//! # Key components
//!
//! - [`S3Serialize`] trait and [`to_xml`] for writing request bodies
//! - [`S3Deserialize`] trait, [`from_xml`] and [`from_xml_expecting`] for
//!   parsing response bodies
//! - [`types`] with the document structs
//!
//! # S3 XML conventions
//!
//! - Namespace: `http://s3.amazonaws.com/doc/2006-03-01/`
//! - XML declaration: `<?xml version="1.0" encoding="UTF-8"?>`
//! - ETags are always quoted: `<ETag>"9b2cf535f27731c974343645a3985328"</ETag>`

pub mod deserialize;
pub mod error;
pub mod serialize;
pub mod types;

pub use deserialize::{S3Deserialize, from_xml, from_xml_expecting, root_element_name};
pub use error::XmlError;
pub use serialize::{S3_NAMESPACE, S3Serialize, to_xml};
pub use types::{
    CompleteMultipartUploadResult, CompletedMultipartUpload, CompletedPart,
    InitiateMultipartUploadResult, S3ErrorResponse, quote_etag,
};
