use bytes::Bytes;

use crate::types::address::Address;
use crate::types::headers::{Header, HeaderName, HeaderValue};
use crate::types::sip_message::SipMessage;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::status::StatusCode;

/// Builds a [`Response`], usually starting from the request it answers
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response::new(status),
        }
    }

    /// Copies Via, From, To, Call-ID and CSeq from `request` (RFC 3261
    /// §8.2.6.2), plus Record-Route for dialog-creating requests (§12.1.1).
    pub fn from_request(request: &Request, status: StatusCode) -> Self {
        let mut response = Response::new(status);
        for header in request.headers.iter() {
            let copy = match header.name {
                HeaderName::Via | HeaderName::From | HeaderName::To | HeaderName::CallId | HeaderName::CSeq => true,
                HeaderName::RecordRoute => request.method.creates_dialog() && status.as_u16() > 100,
                _ => false,
            };
            if copy {
                response.headers.push(header.clone());
            }
        }
        Self { response }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.response.reason = reason.into();
        self
    }

    /// Adds a tag to To unless it already carries one
    pub fn to_tag(mut self, tag: impl Into<String>) -> Self {
        if let Some(header) = self.response.headers.get_mut(&HeaderName::To) {
            if let HeaderValue::Address(to) = &mut header.value {
                if to.tag().is_none() {
                    to.set_tag(tag);
                }
            }
        }
        self
    }

    pub fn contact(mut self, contact: Address) -> Self {
        self.response
            .headers
            .set(Header::new(HeaderName::Contact, HeaderValue::AddressList(vec![contact])));
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.response.headers.push(header);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.set_body(body.into());
        self
    }

    pub fn build(mut self) -> Response {
        let len = self.response.body.len();
        self.response.headers.set(Header::new(
            HeaderName::ContentLength,
            HeaderValue::Integer(len as u32),
        ));
        self.response
    }
}
