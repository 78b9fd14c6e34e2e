use std::fmt;

use bytes::Bytes;

use crate::types::headers::{Header, Headers};
use crate::types::method::Method;
use crate::types::multipart::MultipartBody;
use crate::types::sip_message::{sync_content_length, write_message, SipMessage};
use crate::types::uri::Uri;

/// A SIP request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Bytes,
    /// Decomposed body when the parser was asked to decode `multipart/*`
    pub multipart: Option<MultipartBody>,
}

impl Request {
    /// Creates a request with no headers and an empty body
    ///
    /// ```rust
    /// use sipline_sip_core::prelude::*;
    ///
    /// let request = Request::new(Method::Register, "sip:registrar.example.com".parse().unwrap());
    /// assert_eq!(request.method, Method::Register);
    /// assert!(request.headers.is_empty());
    /// ```
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: Headers::new(),
            body: Bytes::new(),
            multipart: None,
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    /// Sets the body and the matching Content-Length
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body.into());
        self
    }

    pub fn request_line(&self) -> String {
        format!("{} {} SIP/2.0", self.method, self.uri)
    }

    pub fn to_bytes(&self) -> Bytes {
        write_message(&self.request_line(), &self.headers, &self.body)
    }
}

impl SipMessage for Request {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body(&self) -> &Bytes {
        &self.body
    }

    fn set_body(&mut self, body: Bytes) {
        sync_content_length(&mut self.headers, body.len());
        self.body = body;
        self.multipart = None;
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
