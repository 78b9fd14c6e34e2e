use std::fmt;

use bytes::Bytes;

use crate::types::headers::{Header, Headers};
use crate::types::multipart::MultipartBody;
use crate::types::sip_message::{sync_content_length, write_message, SipMessage};
use crate::types::status::StatusCode;

/// A SIP response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
    pub multipart: Option<MultipartBody>,
}

impl Response {
    /// Creates a response using the default reason phrase for `status`
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
            multipart: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body.into());
        self
    }

    pub fn status_line(&self) -> String {
        format!("SIP/2.0 {} {}", self.status.as_u16(), self.reason)
    }

    pub fn to_bytes(&self) -> Bytes {
        write_message(&self.status_line(), &self.headers, &self.body)
    }
}

impl SipMessage for Response {
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

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
