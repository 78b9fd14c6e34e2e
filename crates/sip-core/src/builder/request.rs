use bytes::Bytes;

use crate::types::address::Address;
use crate::types::cseq::CSeq;
use crate::types::headers::{Header, HeaderName, HeaderValue};
use crate::types::media_type::MediaType;
use crate::types::method::Method;
use crate::types::multipart::MultipartBody;
use crate::types::sip_message::SipMessage;
use crate::types::sip_request::Request;
use crate::types::uri::Uri;
use crate::types::via::Via;

/// Builds a [`Request`] header by header.
///
/// ```rust
/// use sipline_sip_core::prelude::*;
///
/// let request = RequestBuilder::new(Method::Options, Uri::sip("biloxi.com").with_user("bob"))
///     .via(Via::new("UDP", "pc33.atlanta.com", Some(5060), "z9hG4bK74bf9"))
///     .from(Address::new(Uri::sip("atlanta.com").with_user("alice")).with_tag("9fxced76sl"))
///     .to(Address::new(Uri::sip("biloxi.com").with_user("bob")))
///     .call_id("3848276298220188511@atlanta.com")
///     .cseq(1)
///     .build();
///
/// assert!(request.validate_mandatory().is_ok());
/// assert_eq!(request.content_length(), Some(0));
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            request: Request::new(method, uri),
        }
    }

    /// Appends a Via; call in top-to-bottom order
    pub fn via(mut self, via: Via) -> Self {
        self.request
            .headers
            .push(Header::new(HeaderName::Via, HeaderValue::Via(vec![via])));
        self
    }

    pub fn from(mut self, from: Address) -> Self {
        self.request
            .headers
            .set(Header::new(HeaderName::From, HeaderValue::Address(from)));
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.request
            .headers
            .set(Header::new(HeaderName::To, HeaderValue::Address(to)));
        self
    }

    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.request
            .headers
            .set(Header::new(HeaderName::CallId, HeaderValue::Text(call_id.into())));
        self
    }

    /// CSeq with the request's own method
    pub fn cseq(mut self, seq: u32) -> Self {
        let cseq = CSeq::new(seq, self.request.method.clone());
        self.request
            .headers
            .set(Header::new(HeaderName::CSeq, HeaderValue::CSeq(cseq)));
        self
    }

    pub fn max_forwards(mut self, hops: u32) -> Self {
        self.request
            .headers
            .set(Header::new(HeaderName::MaxForwards, HeaderValue::Integer(hops)));
        self
    }

    pub fn contact(mut self, contact: Address) -> Self {
        self.request
            .headers
            .push(Header::new(HeaderName::Contact, HeaderValue::AddressList(vec![contact])));
        self
    }

    /// Appends one Route entry
    pub fn route(mut self, route: Address) -> Self {
        self.request
            .headers
            .push(Header::new(HeaderName::Route, HeaderValue::AddressList(vec![route])));
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.request.headers.push(header);
        self
    }

    pub fn content_type(mut self, media_type: MediaType) -> Self {
        self.request
            .headers
            .set(Header::new(HeaderName::ContentType, HeaderValue::MediaType(media_type)));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.set_body(body.into());
        self
    }

    /// Sets a `multipart/<subtype>` body and the matching Content-Type
    pub fn multipart(mut self, subtype: &str, body: MultipartBody) -> Self {
        if let Some(media_type) = body.media_type(subtype) {
            self = self.content_type(media_type);
        }
        self.request.set_body(body.to_bytes());
        self.request.multipart = Some(body);
        self
    }

    /// Finishes the request; Content-Length always reflects the body
    pub fn build(mut self) -> Request {
        let len = self.request.body.len();
        self.request.headers.set(Header::new(
            HeaderName::ContentLength,
            HeaderValue::Integer(len as u32),
        ));
        self.request
    }
}
