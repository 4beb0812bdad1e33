//! S3 XML serialization: converting Rust types to S3-compatible XML.
//!
//! This module provides the [`S3Serialize`] trait and its implementations for
//! the documents mpupload writes. The completion document is the only one sent
//! over the wire; the result documents are written by in-process test servers.

use std::io::{self, Write};

use quick_xml::Writer;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesText, Event};

use crate::error::XmlError;
use crate::types::{
    CompleteMultipartUploadResult, CompletedMultipartUpload, CompletedPart,
    InitiateMultipartUploadResult, quote_etag,
};

/// The S3 XML namespace.
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Trait for serializing S3 types to XML.
///
/// Implementors write their content as child elements inside the current XML
/// context. The root element name and namespace are handled by [`to_xml`].
///
/// Uses `io::Result` because `quick_xml::Writer` closures require `io::Result<()>`.
pub trait S3Serialize {
    /// Serialize this value as XML child elements into the given writer.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if writing to the underlying writer fails.
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()>;
}

/// Serialize a value as S3-compatible XML with declaration and namespace.
///
/// # Examples
///
/// ```
/// use mpupload_xml::{CompletedMultipartUpload, CompletedPart, to_xml};
///
/// let doc = CompletedMultipartUpload {
///     parts: vec![CompletedPart { part_number: 1, etag: "abc".into() }],
/// };
/// let xml = String::from_utf8(to_xml("CompleteMultipartUpload", &doc).unwrap()).unwrap();
/// assert!(xml.contains("<Part><PartNumber>1</PartNumber><ETag>\"abc\"</ETag></Part>"));
/// ```
///
/// # Errors
///
/// Returns `XmlError` if serialization fails.
pub fn to_xml<T: S3Serialize>(root_element: &str, value: &T) -> Result<Vec<u8>, XmlError> {
    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer
        .create_element(root_element)
        .with_attribute(("xmlns", S3_NAMESPACE))
        .write_inner_content(|w| value.serialize_xml(w))?;

    Ok(buf)
}

/// Write a simple `<tag>text</tag>` element.
fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

/// Write `<tag>text</tag>` only if the value is `Some`.
fn write_optional_text<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: Option<&str>,
) -> io::Result<()> {
    if let Some(v) = value {
        write_text_element(writer, tag, v)?;
    }
    Ok(())
}

/// Write `<ETag>"value"</ETag>` with the quotes kept literal.
fn write_etag<W: Write>(writer: &mut Writer<W>, etag: &str) -> io::Result<()> {
    let quoted = quote_etag(etag);
    writer
        .create_element("ETag")
        .write_text_content(BytesText::from_escaped(partial_escape(quoted.as_str())))?;
    Ok(())
}

impl S3Serialize for CompletedPart {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "PartNumber", &self.part_number.to_string())?;
        write_etag(writer, &self.etag)
    }
}

impl S3Serialize for CompletedMultipartUpload {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        for part in &self.parts {
            writer
                .create_element("Part")
                .write_inner_content(|w| part.serialize_xml(w))?;
        }
        Ok(())
    }
}

impl S3Serialize for InitiateMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_optional_text(writer, "Bucket", self.bucket.as_deref())?;
        write_optional_text(writer, "Key", self.key.as_deref())?;
        write_optional_text(writer, "UploadId", self.upload_id.as_deref())
    }
}

impl S3Serialize for CompleteMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_optional_text(writer, "Location", self.location.as_deref())?;
        write_optional_text(writer, "Bucket", self.bucket.as_deref())?;
        write_optional_text(writer, "Key", self.key.as_deref())?;
        if let Some(etag) = &self.etag {
            write_etag(writer, etag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string<T: S3Serialize>(root: &str, value: &T) -> String {
        String::from_utf8(to_xml(root, value).expect("serialization should succeed"))
            .expect("valid UTF-8")
    }

    #[test]
    fn test_should_serialize_completion_document_in_given_order() {
        let doc = CompletedMultipartUpload {
            parts: vec![
                CompletedPart {
                    part_number: 1,
                    etag: "\"a54357aff0632cce46d942af68356b38\"".to_owned(),
                },
                CompletedPart {
                    part_number: 2,
                    etag: "0c78aef83f66abc1fa1e8477f296d394".to_owned(),
                },
            ],
        };

        let xml = to_string("CompleteMultipartUpload", &doc);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(&format!(
            "<CompleteMultipartUpload xmlns=\"{S3_NAMESPACE}\">"
        )));
        assert!(xml.contains(
            "<Part><PartNumber>1</PartNumber><ETag>\"a54357aff0632cce46d942af68356b38\"</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>\"0c78aef83f66abc1fa1e8477f296d394\"</ETag></Part>"
        ));
        assert!(xml.ends_with("</CompleteMultipartUpload>"));
    }

    #[test]
    fn test_should_serialize_empty_completion_document() {
        let xml = to_string("CompleteMultipartUpload", &CompletedMultipartUpload::default());
        assert!(!xml.contains("<Part>"));
    }

    #[test]
    fn test_should_escape_markup_in_etag_but_not_quotes() {
        let doc = CompletedMultipartUpload {
            parts: vec![CompletedPart {
                part_number: 3,
                etag: "a<b&c".to_owned(),
            }],
        };
        let xml = to_string("CompleteMultipartUpload", &doc);
        assert!(xml.contains("<ETag>\"a&lt;b&amp;c\"</ETag>"));
    }

    #[test]
    fn test_should_skip_absent_fields_in_initiate_result() {
        let result = InitiateMultipartUploadResult {
            bucket: Some("bucket".to_owned()),
            key: None,
            upload_id: Some("2~abc".to_owned()),
        };
        let xml = to_string("InitiateMultipartUploadResult", &result);
        assert!(xml.contains("<Bucket>bucket</Bucket>"));
        assert!(!xml.contains("<Key>"));
        assert!(xml.contains("<UploadId>2~abc</UploadId>"));
    }
}
