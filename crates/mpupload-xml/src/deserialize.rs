//! S3 XML deserialization: parsing S3-compatible XML into Rust types.
//!
//! This module provides the [`S3Deserialize`] trait and its implementations for
//! the response documents of the multipart protocol. Unknown elements are
//! skipped so that provider extensions do not break parsing.

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;

use crate::error::XmlError;
use crate::types::{
    CompleteMultipartUploadResult, CompletedMultipartUpload, CompletedPart,
    InitiateMultipartUploadResult, S3ErrorResponse,
};

/// Trait for deserializing S3 types from XML.
///
/// Implementors parse XML elements from the reader and populate the struct
/// fields. The root element has already been consumed by the caller; the
/// implementation reads child elements until the matching end tag.
pub trait S3Deserialize: Sized {
    /// Deserialize an instance from the given XML reader.
    ///
    /// The reader is positioned just after the opening tag of this element.
    ///
    /// # Errors
    ///
    /// Returns `XmlError` if the XML is malformed or required fields are missing.
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError>;
}

/// Deserialize S3-compatible XML into a typed value, whatever its root element.
///
/// # Errors
///
/// Returns `XmlError` if the XML is malformed or deserialization fails.
pub fn from_xml<T: S3Deserialize>(xml: &[u8]) -> Result<T, XmlError> {
    let mut reader = Reader::from_reader(xml);
    let _root = read_root(&mut reader)?;
    T::deserialize_xml(&mut reader)
}

/// Deserialize S3-compatible XML, requiring a specific root element.
///
/// # Examples
///
/// ```
/// use mpupload_xml::{InitiateMultipartUploadResult, XmlError, from_xml_expecting};
///
/// let ok = br#"<InitiateMultipartUploadResult><UploadId>abc</UploadId></InitiateMultipartUploadResult>"#;
/// let parsed: InitiateMultipartUploadResult =
///     from_xml_expecting("InitiateMultipartUploadResult", ok).unwrap();
/// assert_eq!(parsed.upload_id.as_deref(), Some("abc"));
///
/// let err = b"<Error><Code>AccessDenied</Code></Error>";
/// let result: Result<InitiateMultipartUploadResult, _> =
///     from_xml_expecting("InitiateMultipartUploadResult", err);
/// assert!(matches!(result, Err(XmlError::UnexpectedElement(_))));
/// ```
///
/// # Errors
///
/// Returns [`XmlError::UnexpectedElement`] if the root element differs from
/// `root_element`, and other `XmlError` variants for malformed XML.
pub fn from_xml_expecting<T: S3Deserialize>(
    root_element: &str,
    xml: &[u8],
) -> Result<T, XmlError> {
    let mut reader = Reader::from_reader(xml);
    let root = read_root(&mut reader)?;
    if root != root_element {
        return Err(XmlError::UnexpectedElement(format!(
            "expected root <{root_element}>, found <{root}>"
        )));
    }
    T::deserialize_xml(&mut reader)
}

/// Return the name of the root element without parsing the rest of the document.
///
/// # Errors
///
/// Returns [`XmlError::MissingElement`] for a document without elements.
pub fn root_element_name(xml: &[u8]) -> Result<String, XmlError> {
    let mut reader = Reader::from_reader(xml);
    read_root(&mut reader)
}

/// Advance past the XML declaration and return the root element name.
fn read_root(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let tag_name = std::str::from_utf8(name.as_ref())
                    .map_err(|e| XmlError::ParseError(e.to_string()))?;
                return Ok(local_name(tag_name).to_owned());
            }
            Event::Empty(e) => {
                let name = e.name();
                let tag_name = std::str::from_utf8(name.as_ref())
                    .map_err(|e| XmlError::ParseError(e.to_string()))?;
                return Err(XmlError::MissingElement(format!(
                    "children of <{}>",
                    local_name(tag_name)
                )));
            }
            Event::Eof => {
                return Err(XmlError::MissingElement("root element".to_string()));
            }
            // Skip declaration, comments, processing instructions, whitespace.
            _ => {}
        }
    }
}

/// Strip a namespace prefix such as `s3:` from an element name.
fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Read the text content of the current element and consume its end tag.
///
/// Entity and character references arrive as separate events and are
/// resolved in place. Surrounding whitespace is trimmed once at the end so
/// that spaces next to a reference survive.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                let decoded = e
                    .decode()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&decoded);
            }
            Event::CData(e) => {
                let raw = std::str::from_utf8(&e)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(raw);
            }
            Event::GeneralRef(e) => {
                if let Some(ch) = e
                    .resolve_char_ref()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?
                {
                    text.push(ch);
                } else {
                    let entity = e
                        .decode()
                        .map_err(|err| XmlError::ParseError(err.to_string()))?;
                    let resolved = resolve_predefined_entity(&entity).ok_or_else(|| {
                        XmlError::ParseError(format!("unknown entity: &{entity};"))
                    })?;
                    text.push_str(resolved);
                }
            }
            Event::Start(e) => {
                let name = e.name();
                let tag_name = String::from_utf8_lossy(name.as_ref()).into_owned();
                return Err(XmlError::UnexpectedElement(format!(
                    "<{tag_name}> inside a text element"
                )));
            }
            Event::End(_) => {
                return Ok(text.trim().to_owned());
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while reading text content".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Skip over an element and all its children.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), XmlError> {
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while skipping element".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Parse a part number from XML text.
fn parse_u32(s: &str) -> Result<u32, XmlError> {
    s.parse::<u32>()
        .map_err(|e| XmlError::ParseError(format!("invalid u32 '{s}': {e}")))
}

/// Walk the children of the current element, handing each start tag to `on_child`.
///
/// `on_child` must consume the child through its end tag. Self-closing
/// children are ignored.
fn for_each_child<F>(
    reader: &mut Reader<&[u8]>,
    context: &str,
    mut on_child: F,
) -> Result<(), XmlError>
where
    F: FnMut(&mut Reader<&[u8]>, &str) -> Result<(), XmlError>,
{
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let tag_name = std::str::from_utf8(name.as_ref())
                    .map_err(|e| XmlError::ParseError(e.to_string()))?
                    .to_owned();
                on_child(reader, local_name(&tag_name))?;
            }
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(format!(
                    "unexpected EOF in {context}"
                )));
            }
            _ => {}
        }
    }
}

impl S3Deserialize for InitiateMultipartUploadResult {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = Self::default();

        for_each_child(reader, "InitiateMultipartUploadResult", |reader, tag| {
            match tag {
                "Bucket" => result.bucket = Some(read_text_content(reader)?),
                "Key" => result.key = Some(read_text_content(reader)?),
                "UploadId" => result.upload_id = Some(read_text_content(reader)?),
                _ => skip_element(reader)?,
            }
            Ok(())
        })?;

        Ok(result)
    }
}

impl S3Deserialize for CompleteMultipartUploadResult {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = Self::default();

        for_each_child(reader, "CompleteMultipartUploadResult", |reader, tag| {
            match tag {
                "Location" => result.location = Some(read_text_content(reader)?),
                "Bucket" => result.bucket = Some(read_text_content(reader)?),
                "Key" => result.key = Some(read_text_content(reader)?),
                "ETag" => result.etag = Some(read_text_content(reader)?),
                _ => skip_element(reader)?,
            }
            Ok(())
        })?;

        Ok(result)
    }
}

impl S3Deserialize for S3ErrorResponse {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = Self::default();

        for_each_child(reader, "Error", |reader, tag| {
            match tag {
                "Code" => result.code = Some(read_text_content(reader)?),
                "Message" => result.message = Some(read_text_content(reader)?),
                "RequestId" => result.request_id = Some(read_text_content(reader)?),
                _ => skip_element(reader)?,
            }
            Ok(())
        })?;

        Ok(result)
    }
}

impl S3Deserialize for CompletedPart {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut part_number = None;
        let mut etag = None;

        for_each_child(reader, "Part", |reader, tag| {
            match tag {
                "PartNumber" => part_number = Some(parse_u32(&read_text_content(reader)?)?),
                "ETag" => etag = Some(read_text_content(reader)?),
                _ => skip_element(reader)?,
            }
            Ok(())
        })?;

        Ok(CompletedPart {
            part_number: part_number
                .ok_or_else(|| XmlError::MissingElement("PartNumber".to_string()))?,
            etag: etag.ok_or_else(|| XmlError::MissingElement("ETag".to_string()))?,
        })
    }
}

impl S3Deserialize for CompletedMultipartUpload {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut parts = Vec::new();

        for_each_child(reader, "CompleteMultipartUpload", |reader, tag| {
            if tag == "Part" {
                parts.push(CompletedPart::deserialize_xml(reader)?);
            } else {
                skip_element(reader)?;
            }
            Ok(())
        })?;

        Ok(CompletedMultipartUpload { parts })
    }
}
