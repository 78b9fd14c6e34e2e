use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::headers::{Header, HeaderName, HeaderValue, Headers};
use crate::types::media_type::MediaType;

/// One body part: its own header block plus opaque content
#[derive(Debug, Clone, PartialEq)]
pub struct MimePart {
    pub headers: Headers,
    pub content: Bytes,
}

impl MimePart {
    pub fn new(content_type: MediaType, content: impl Into<Bytes>) -> Self {
        let mut headers = Headers::new();
        headers.push(Header::new(HeaderName::ContentType, HeaderValue::MediaType(content_type)));
        Self {
            headers,
            content: content.into(),
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn content_type(&self) -> Option<&MediaType> {
        self.headers.get_value(&HeaderName::ContentType)?.as_media_type()
    }

    pub fn content_id(&self) -> Option<&str> {
        self.headers.get_value(&HeaderName::ContentId)?.as_text()
    }

    /// Disposition type (`session`, `render`, ...) without parameters
    pub fn content_disposition(&self) -> Option<&str> {
        match self.headers.get_value(&HeaderName::ContentDisposition)? {
            HeaderValue::Parameterized { value, .. } => Some(value),
            other => other.as_text(),
        }
    }

    /// Headers other than the Content-* ones
    pub fn extension_headers(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter().filter(|h| {
            !matches!(
                h.name,
                HeaderName::ContentType
                    | HeaderName::ContentDisposition
                    | HeaderName::ContentId
                    | HeaderName::ContentEncoding
                    | HeaderName::ContentLength
            )
        })
    }
}

/// A decomposed message body.
///
/// With a boundary the body is framed per RFC 2046: every part is preceded by
/// `--boundary CRLF` and followed by `CRLF`, and the body ends with
/// `--boundary--`. Without a boundary the body is a single part whose content
/// is written verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipartBody {
    pub boundary: Option<String>,
    pub parts: Vec<MimePart>,
}

impl MultipartBody {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: Some(boundary.into()),
            parts: Vec::new(),
        }
    }

    /// Wraps a non-multipart body as a single part
    pub fn single(content_type: Option<MediaType>, content: impl Into<Bytes>) -> Self {
        let part = match content_type {
            Some(ct) => MimePart::new(ct, content),
            None => MimePart {
                headers: Headers::new(),
                content: content.into(),
            },
        };
        Self {
            boundary: None,
            parts: vec![part],
        }
    }

    pub fn with_part(mut self, part: MimePart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Content-Type for a message carrying this body
    pub fn media_type(&self, subtype: &str) -> Option<MediaType> {
        self.boundary.as_ref().map(|b| {
            MediaType::new("multipart", subtype).with_param(crate::types::param::Param::quoted("boundary", b.clone()))
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let Some(boundary) = &self.boundary else {
            return self.parts.first().map(|p| p.content.clone()).unwrap_or_default();
        };
        let mut buf = BytesMut::new();
        for part in &self.parts {
            buf.put_slice(b"--");
            buf.put_slice(boundary.as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(part.headers.to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(&part.content);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }
}

impl fmt::Display for MultipartBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
