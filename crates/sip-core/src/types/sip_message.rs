use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::cseq::CSeq;
use crate::types::headers::{Header, HeaderName, HeaderValue, Headers};
use crate::types::media_type::MediaType;
use crate::types::multipart::MultipartBody;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::via::Via;

/// Accessors shared by requests and responses.
///
/// Everything is derived from [`SipMessage::headers`]; implementors only
/// expose their header list and body.
pub trait SipMessage {
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn body(&self) -> &Bytes;

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers().get_value(name)
    }

    fn call_id(&self) -> Option<&str> {
        self.header(&HeaderName::CallId)?.as_text()
    }

    fn cseq(&self) -> Option<&CSeq> {
        self.header(&HeaderName::CSeq)?.as_cseq()
    }

    fn from_address(&self) -> Option<&Address> {
        self.header(&HeaderName::From)?.as_address()
    }

    fn to_address(&self) -> Option<&Address> {
        self.header(&HeaderName::To)?.as_address()
    }

    fn from_tag(&self) -> Option<&str> {
        self.from_address()?.tag()
    }

    fn to_tag(&self) -> Option<&str> {
        self.to_address()?.tag()
    }

    /// All Via values in order, across every Via header line
    fn vias(&self) -> Vec<&Via> {
        self.headers()
            .get_all(&HeaderName::Via)
            .filter_map(|h| h.value.as_vias())
            .flatten()
            .collect()
    }

    fn top_via(&self) -> Option<&Via> {
        self.headers()
            .get_all(&HeaderName::Via)
            .filter_map(|h| h.value.as_vias())
            .flatten()
            .next()
    }

    fn contacts(&self) -> Vec<&Address> {
        address_values(self.headers(), &HeaderName::Contact)
    }

    fn routes(&self) -> Vec<&Address> {
        address_values(self.headers(), &HeaderName::Route)
    }

    fn record_routes(&self) -> Vec<&Address> {
        address_values(self.headers(), &HeaderName::RecordRoute)
    }

    fn content_length(&self) -> Option<u32> {
        self.header(&HeaderName::ContentLength)?.as_integer()
    }

    fn content_type(&self) -> Option<&MediaType> {
        self.header(&HeaderName::ContentType)?.as_media_type()
    }

    fn max_forwards(&self) -> Option<u32> {
        self.header(&HeaderName::MaxForwards)?.as_integer()
    }

    /// Checks that Call-ID, CSeq, From, To and at least one Via are present
    /// and well typed.
    fn validate_mandatory(&self) -> Result<()> {
        if self.call_id().is_none() {
            return Err(Error::MissingHeader("Call-ID".into()));
        }
        if self.cseq().is_none() {
            return Err(Error::MissingHeader("CSeq".into()));
        }
        if self.from_address().is_none() {
            return Err(Error::MissingHeader("From".into()));
        }
        if self.to_address().is_none() {
            return Err(Error::MissingHeader("To".into()));
        }
        if self.top_via().is_none() {
            return Err(Error::MissingHeader("Via".into()));
        }
        Ok(())
    }

    /// Replaces the body and keeps Content-Length in sync
    fn set_body(&mut self, body: Bytes);
}

fn address_values<'a>(headers: &'a Headers, name: &'a HeaderName) -> Vec<&'a Address> {
    headers
        .get_all(name)
        .flat_map(|h| h.value.as_addresses())
        .collect()
}

pub(crate) fn sync_content_length(headers: &mut Headers, len: usize) {
    headers.set(Header::new(
        HeaderName::ContentLength,
        HeaderValue::Integer(len as u32),
    ));
}

pub(crate) fn write_message(start_line: &str, headers: &Headers, body: &[u8]) -> Bytes {
    let head = headers.to_string();
    let mut buf = BytesMut::with_capacity(start_line.len() + head.len() + body.len() + 4);
    buf.put_slice(start_line.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(head.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(body);
    buf.freeze()
}

/// A parsed SIP message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            Message::Request(_) => None,
        }
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Message::Response(r) => Some(r),
            Message::Request(_) => None,
        }
    }

    /// The decomposed body, if the parser produced one
    pub fn multipart(&self) -> Option<&MultipartBody> {
        match self {
            Message::Request(r) => r.multipart.as_ref(),
            Message::Response(r) => r.multipart.as_ref(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(r) => r.to_bytes(),
            Message::Response(r) => r.to_bytes(),
        }
    }
}

impl SipMessage for Message {
    fn headers(&self) -> &Headers {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(r) => &mut r.headers,
            Message::Response(r) => &mut r.headers,
        }
    }

    fn body(&self) -> &Bytes {
        match self {
            Message::Request(r) => &r.body,
            Message::Response(r) => &r.body,
        }
    }

    fn set_body(&mut self, body: Bytes) {
        match self {
            Message::Request(r) => r.set_body(body),
            Message::Response(r) => r.set_body(body),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => write!(f, "{r}"),
            Message::Response(r) => write!(f, "{r}"),
        }
    }
}
