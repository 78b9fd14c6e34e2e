//! Whole-message parsing: start line, header block, body framing and
//! multipart decomposition.
//!
//! [`MessageParser::parse`] handles a complete datagram. Stream transports
//! feed bytes into an [`IncrementalParser`], which frames messages by
//! Content-Length and yields them one at a time.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Error, ParseError, Result};
use crate::parser::multipart::decode_multipart;
use crate::parser::registry::HeaderRegistry;
use crate::parser::whitespace::unfold_lws;
use crate::types::headers::{Header, HeaderName, HeaderValue, Headers};
use crate::types::method::Method;
use crate::types::sip_message::{Message, SipMessage};
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

/// Largest message accepted by default (64 KiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_536;

/// Default limit on header lines per message
pub const DEFAULT_MAX_HEADER_COUNT: usize = 100;

const SIP_VERSION: &str = "SIP/2.0";

/// What to do with a header whose value failed to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Drop the header and continue
    Skip,
    /// Keep the header with its raw value and continue
    KeepRaw,
    /// Fail the whole message
    Abort,
}

/// Parser limits and policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Upper bound on start line + headers + declared body
    pub max_message_size: usize,
    /// Upper bound on header lines (after unfolding)
    pub max_header_count: usize,
    /// Without Content-Length, treat the remaining bytes as the body
    pub compute_content_length: bool,
    /// Decompose `multipart/*` bodies while parsing
    pub decode_multipart: bool,
    /// Policy used when no [`ParseExceptionListener`] is installed
    pub default_recovery: Recovery,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_header_count: DEFAULT_MAX_HEADER_COUNT,
            compute_content_length: true,
            decode_multipart: true,
            default_recovery: Recovery::KeepRaw,
        }
    }
}

impl ParserConfig {
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_header_count(mut self, count: usize) -> Self {
        self.max_header_count = count;
        self
    }

    pub fn with_compute_content_length(mut self, enabled: bool) -> Self {
        self.compute_content_length = enabled;
        self
    }

    pub fn with_decode_multipart(mut self, enabled: bool) -> Self {
        self.decode_multipart = enabled;
        self
    }

    pub fn with_default_recovery(mut self, recovery: Recovery) -> Self {
        self.default_recovery = recovery;
        self
    }
}

/// Details handed to a [`ParseExceptionListener`]
#[derive(Debug)]
pub struct HeaderErrorContext<'a> {
    /// Header name as it appeared on the wire
    pub name: &'a str,
    /// Raw (still folded) header value
    pub value: &'a str,
    pub error: &'a Error,
}

/// Decides how the parser recovers from a malformed header
pub trait ParseExceptionListener: Send + Sync {
    fn on_header_error(&self, ctx: &HeaderErrorContext<'_>) -> Recovery;
}

impl<F> ParseExceptionListener for F
where
    F: Fn(&HeaderErrorContext<'_>) -> Recovery + Send + Sync,
{
    fn on_header_error(&self, ctx: &HeaderErrorContext<'_>) -> Recovery {
        self(ctx)
    }
}

/// Converts raw bytes into [`Message`]s.
///
/// Cheap to clone; clones share the header registry and listener.
#[derive(Clone)]
pub struct MessageParser {
    registry: Arc<HeaderRegistry>,
    config: ParserConfig,
    listener: Option<Arc<dyn ParseExceptionListener>>,
}

impl fmt::Debug for MessageParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageParser")
            .field("config", &self.config)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

/// Where the header block ends and the body begins
struct HeadSplit {
    head_end: usize,
    body_start: usize,
}

fn split_head(data: &[u8]) -> Option<HeadSplit> {
    let crlf = find(data, b"\r\n\r\n").map(|p| HeadSplit {
        head_end: p,
        body_start: p + 4,
    });
    let lf = find(data, b"\n\n").map(|p| HeadSplit {
        head_end: p,
        body_start: p + 2,
    });
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.head_end <= b.head_end { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn leading_line_breaks(data: &[u8]) -> usize {
    data.iter().take_while(|b| **b == b'\r' || **b == b'\n').count()
}

impl MessageParser {
    /// A parser with the built-in header registry
    pub fn new(config: ParserConfig) -> Self {
        Self::with_registry(Arc::new(HeaderRegistry::new()), config)
    }

    /// A parser sharing an existing registry (e.g. one with extension parsers)
    pub fn with_registry(registry: Arc<HeaderRegistry>, config: ParserConfig) -> Self {
        Self {
            registry,
            config,
            listener: None,
        }
    }

    /// Installs the per-header error listener
    pub fn with_listener(mut self, listener: impl ParseExceptionListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn registry(&self) -> &Arc<HeaderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parses one complete datagram.
    ///
    /// Bytes beyond the declared Content-Length are ignored; a declared
    /// length larger than what was received is an error.
    pub fn parse(&self, data: &[u8]) -> Result<Message> {
        if data.len() > self.config.max_message_size {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                limit: self.config.max_message_size,
            });
        }
        self.parse_framed(data, false).map(|(message, _)| message)
    }

    /// Parses the first message in `data` and returns it with the number of
    /// bytes consumed. Returns [`Error::Incomplete`] when more bytes are
    /// needed.
    pub fn parse_prefix(&self, data: &[u8]) -> Result<(Message, usize)> {
        self.parse_framed(data, true)
    }

    fn parse_framed(&self, data: &[u8], stream: bool) -> Result<(Message, usize)> {
        let skipped = leading_line_breaks(data);
        let data = &data[skipped..];
        let limit = self.config.max_message_size;

        let split = match split_head(data) {
            Some(split) => split,
            None if stream => {
                if data.len() > limit {
                    return Err(Error::MessageTooLarge {
                        size: data.len(),
                        limit,
                    });
                }
                return Err(Error::Incomplete);
            }
            None if data.is_empty() => return Err(Error::InvalidStartLine(String::new())),
            None => HeadSplit {
                head_end: data.len(),
                body_start: data.len(),
            },
        };
        if split.body_start > limit {
            return Err(Error::MessageTooLarge {
                size: split.body_start,
                limit,
            });
        }

        let head = std::str::from_utf8(&data[..split.head_end]).map_err(|e| Error::InvalidUtf8 {
            offset: skipped + e.valid_up_to(),
        })?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let start_line = lines.next().unwrap_or_default();
        let headers = self.parse_headers(lines)?;

        let available = data.len() - split.body_start;
        let body_len = match declared_content_length(&headers)? {
            Some(declared) => {
                let total = split.body_start + declared;
                if total > limit {
                    return Err(Error::MessageTooLarge { size: total, limit });
                }
                if declared > available {
                    if stream {
                        return Err(Error::Incomplete);
                    }
                    return Err(Error::ContentLengthMismatch { declared, available });
                }
                declared
            }
            None if self.config.compute_content_length => available,
            None => 0,
        };
        let body = Bytes::copy_from_slice(&data[split.body_start..split.body_start + body_len]);
        let consumed = skipped + split.body_start + body_len;

        let mut message = build_message(start_line, headers, body)?;
        if self.config.decode_multipart {
            self.attach_multipart(&mut message);
        }
        trace!(consumed, "Parsed SIP message");
        Ok((message, consumed))
    }

    fn parse_headers<'a>(&self, lines: impl Iterator<Item = &'a str>) -> Result<Headers> {
        let mut raw: Vec<Cow<'a, str>> = Vec::new();
        for line in lines {
            if line.starts_with([' ', '\t']) {
                if let Some(current) = raw.last_mut() {
                    let folded = current.to_mut();
                    folded.push_str("\r\n");
                    folded.push_str(line);
                } else {
                    let error = Error::InvalidHeader {
                        name: String::new(),
                        error: ParseError::new(line, 0, "continuation line without header"),
                    };
                    self.recover("", line, error)?;
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }
            raw.push(Cow::Borrowed(line));
            if raw.len() > self.config.max_header_count {
                return Err(Error::TooManyHeaders(self.config.max_header_count));
            }
        }

        let mut headers = Headers::new();
        for line in &raw {
            let Some((name, value)) = line.split_once(':') else {
                let error = Error::InvalidHeader {
                    name: line.to_string(),
                    error: ParseError::new(line.to_string(), 0, "missing ':' in header line"),
                };
                // nothing to keep without a name
                self.recover(line, "", error)?;
                continue;
            };
            let name = name.trim();
            match self.registry.parse_header(name, value) {
                Ok(header) => headers.push(header),
                Err(error) => {
                    if self.recover(name, value, error)? != Recovery::KeepRaw {
                        continue;
                    }
                    match name.parse::<HeaderName>() {
                        Ok(header_name) => headers.push(Header::new(
                            header_name,
                            HeaderValue::Raw(unfold_lws(value)),
                        )),
                        Err(_) => debug!(header = %name, "Dropping header with invalid name"),
                    }
                }
            }
        }
        Ok(headers)
    }

    /// Asks the listener (or the default policy) how to continue; `Abort`
    /// turns into the original error.
    fn recover(&self, name: &str, value: &str, error: Error) -> Result<Recovery> {
        let recovery = match &self.listener {
            Some(listener) => listener.on_header_error(&HeaderErrorContext {
                name,
                value,
                error: &error,
            }),
            None => self.config.default_recovery,
        };
        match recovery {
            Recovery::Abort => Err(error),
            other => {
                warn!(header = %name, error = %error, recovery = ?other, "Recovered from malformed header");
                Ok(other)
            }
        }
    }

    fn attach_multipart(&self, message: &mut Message) {
        let Some(ct) = message.content_type().cloned() else {
            return;
        };
        if !ct.is_multipart() || message.body().is_empty() {
            return;
        }
        let Some(boundary) = ct.boundary() else {
            warn!(content_type = %ct, "multipart body without boundary parameter");
            return;
        };
        match decode_multipart(message.body(), boundary, &self.registry) {
            Ok(parts) => match message {
                Message::Request(r) => r.multipart = Some(parts),
                Message::Response(r) => r.multipart = Some(parts),
            },
            Err(e) => warn!(error = %e, "Failed to decompose multipart body"),
        }
    }
}

/// All Content-Length headers must agree
fn declared_content_length(headers: &Headers) -> Result<Option<usize>> {
    let mut declared: Option<u32> = None;
    for header in headers.get_all(&HeaderName::ContentLength) {
        let Some(value) = header.value.as_integer() else {
            continue;
        };
        match declared {
            Some(existing) if existing != value => {
                return Err(Error::DuplicateHeader("Content-Length".into()));
            }
            _ => declared = Some(value),
        }
    }
    Ok(declared.map(|v| v as usize))
}

fn check_version(version: &str, line: &str) -> Result<()> {
    if version.eq_ignore_ascii_case(SIP_VERSION) {
        Ok(())
    } else {
        Err(Error::InvalidStartLine(line.to_string()))
    }
}

fn build_message(start_line: &str, headers: Headers, body: Bytes) -> Result<Message> {
    let line = start_line.trim();
    let invalid = || Error::InvalidStartLine(line.to_string());

    if line.as_bytes().get(..4).is_some_and(|p| p.eq_ignore_ascii_case(b"SIP/")) {
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().ok_or_else(invalid)?;
        check_version(version, line)?;
        let code = parts.next().ok_or_else(invalid)?;
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let status = code
            .parse::<u16>()
            .map_err(|_| invalid())
            .and_then(|c| StatusCode::new(c).map_err(|_| invalid()))?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        return Ok(Message::Response(Response {
            status,
            reason,
            headers,
            body,
            multipart: None,
        }));
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let [method, uri, version] = parts.as_slice() else {
        return Err(invalid());
    };
    check_version(version, line)?;
    let method = method.parse::<Method>().map_err(|_| invalid())?;
    let uri = uri
        .parse::<Uri>()
        .map_err(|e| Error::InvalidStartLine(format!("{line}: {e}")))?;
    Ok(Message::Request(Request {
        method,
        uri,
        headers,
        body,
        multipart: None,
    }))
}

/// Parses a datagram with the default configuration
pub fn parse_message(data: &[u8]) -> Result<Message> {
    MessageParser::default().parse(data)
}

/// Frames messages out of a byte stream.
///
/// Content-Length is mandatory on streams, so a missing header means an
/// empty body regardless of the wrapped parser's configuration. CRLF
/// keep-alives between messages are discarded.
#[derive(Debug)]
pub struct IncrementalParser {
    parser: MessageParser,
    buffer: BytesMut,
}

impl IncrementalParser {
    pub fn new(parser: MessageParser) -> Self {
        let mut parser = parser;
        parser.config.compute_content_length = false;
        Self {
            parser,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends received bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete message, `None` if more bytes are needed.
    ///
    /// On a fatal error the buffer is cleared; the connection is no longer
    /// in sync and should normally be closed.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let keepalive = leading_line_breaks(&self.buffer);
        if keepalive > 0 {
            self.buffer.advance(keepalive);
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        match self.parser.parse_prefix(&self.buffer) {
            Ok((message, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(message))
            }
            Err(Error::Incomplete) => Ok(None),
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INVITE: &str = "INVITE sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@biloxi.com>\r\n\
From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
CSeq: 314159 INVITE\r\n\
Contact: <sip:alice@pc33.atlanta.com>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\
\r\n\
v=0\n";

    #[test]
    fn test_parse_request() {
        let msg = parse_message(INVITE.as_bytes()).unwrap();
        let req = msg.as_request().unwrap();
        assert_eq!(req.method, Method::Invite);
        assert_eq!(req.uri.to_string(), "sip:bob@biloxi.com");
        assert_eq!(msg.call_id(), Some("a84b4c76e66710@pc33.atlanta.com"));
        assert_eq!(msg.from_tag(), Some("1928301774"));
        assert_eq!(msg.body().as_ref(), b"v=0\n");
        assert!(msg.validate_mandatory().is_ok());
    }

    #[test]
    fn test_parse_response_with_empty_reason() {
        let msg = parse_message(b"SIP/2.0 606 \r\nContent-Length: 0\r\n\r\n").unwrap();
        let resp = msg.as_response().unwrap();
        assert_eq!(resp.status.as_u16(), 606);
        assert_eq!(resp.reason, "");
    }

    #[test]
    fn test_invalid_start_lines() {
        for bad in [
            "INVITE sip:bob@biloxi.com SIP/3.0\r\n\r\n",
            "INVITE\r\n\r\n",
            "SIP/2.0 20 OK\r\n\r\n",
            "SIP/2.0 800 Nope\r\n\r\n",
            "INVITE bob SIP/2.0\r\n\r\n",
            "",
        ] {
            let err = parse_message(bad.as_bytes()).unwrap_err();
            assert!(matches!(err, Error::InvalidStartLine(_)), "{bad:?} gave {err:?}");
        }
    }

    #[test]
    fn test_folded_headers_and_compact_forms() {
        let raw = "OPTIONS sip:carol@chicago.com SIP/2.0\r\n\
v: SIP/2.0/UDP host.example.com\r\n\
 ;branch=z9hG4bKkjshdyff\r\n\
i: abc@host\r\n\
f: <sip:a@b>;tag=x\r\n\
t: <sip:c@d>\r\n\
CSeq: 8\r\n  OPTIONS\r\n\
Subject: I know you're there,\r\n\tpick up the phone\r\n\
l: 0\r\n\r\n";
        let msg = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.top_via().and_then(|v| v.branch()), Some("z9hG4bKkjshdyff"));
        assert_eq!(msg.cseq().map(|c| c.seq), Some(8));
        assert_eq!(
            msg.header(&HeaderName::Subject).and_then(|v| v.as_text()),
            Some("I know you're there, pick up the phone")
        );
        assert_eq!(msg.content_length(), Some(0));
    }

    #[test]
    fn test_listener_decides_recovery() {
        let raw = "OPTIONS sip:a@b SIP/2.0\r\nMax-Forwards: lots\r\nCall-ID: x\r\n\r\n";
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let parser = MessageParser::default().with_listener(move |ctx: &HeaderErrorContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.name, "Max-Forwards");
            Recovery::Skip
        });
        let msg = parser.parse(raw.as_bytes()).unwrap();
        assert!(msg.header(&HeaderName::MaxForwards).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let msg = MessageParser::default().parse(raw.as_bytes()).unwrap();
        assert_eq!(
            msg.header(&HeaderName::MaxForwards),
            Some(&HeaderValue::Raw("lots".into()))
        );

        let parser = MessageParser::new(ParserConfig::default().with_default_recovery(Recovery::Abort));
        assert!(matches!(
            parser.parse(raw.as_bytes()),
            Err(Error::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_content_length_policies() {
        let raw = b"MESSAGE sip:a@b SIP/2.0\r\nCall-ID: x\r\n\r\nhello";
        let msg = MessageParser::default().parse(raw).unwrap();
        assert_eq!(msg.body().as_ref(), b"hello");

        let parser = MessageParser::new(ParserConfig::default().with_compute_content_length(false));
        let msg = parser.parse(raw).unwrap();
        assert!(msg.body().is_empty());

        let short = b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 50\r\n\r\nhello";
        assert_eq!(
            parse_message(short).unwrap_err(),
            Error::ContentLengthMismatch {
                declared: 50,
                available: 5
            }
        );

        let dup = b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 5\r\nl: 6\r\n\r\nhello!";
        assert_eq!(
            parse_message(dup).unwrap_err(),
            Error::DuplicateHeader("Content-Length".into())
        );
    }

    #[test]
    fn test_size_guards() {
        let parser = MessageParser::new(ParserConfig::default().with_max_message_size(128));
        let huge = b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 999999999\r\n\r\n";
        assert!(matches!(
            parser.parse_prefix(huge),
            Err(Error::MessageTooLarge { .. })
        ));

        let mut many = String::from("OPTIONS sip:a@b SIP/2.0\r\n");
        for i in 0..5 {
            many.push_str(&format!("X-H{i}: v\r\n"));
        }
        many.push_str("\r\n");
        let parser = MessageParser::new(ParserConfig::default().with_max_header_count(4));
        assert_eq!(parser.parse(many.as_bytes()).unwrap_err(), Error::TooManyHeaders(4));
    }

    #[test]
    fn test_incremental_framing() {
        let first = "OPTIONS sip:a@b SIP/2.0\r\nCall-ID: 1\r\nContent-Length: 4\r\n\r\nbody";
        let second = "SIP/2.0 200 OK\r\nCall-ID: 2\r\n\r\n";
        let stream = format!("\r\n\r\n{first}{second}");

        let mut framer = IncrementalParser::new(MessageParser::default());
        let (a, b) = stream.as_bytes().split_at(30);
        framer.feed(a);
        assert!(framer.next_message().unwrap().is_none());
        framer.feed(b);

        let one = framer.next_message().unwrap().unwrap();
        assert_eq!(one.call_id(), Some("1"));
        assert_eq!(one.body().as_ref(), b"body");
        let two = framer.next_message().unwrap().unwrap();
        assert_eq!(two.call_id(), Some("2"));
        assert!(two.body().is_empty());
        assert!(framer.next_message().unwrap().is_none());
        assert_eq!(framer.buffered(), 0);
    }
}
