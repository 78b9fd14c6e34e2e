//! # sipline-sip-core
//!
//! SIP (RFC 3261) message model and wire-format parser.
//!
//! - [`parser::lexer`] tokenizes header values (quoted strings, comments,
//!   parameters, folded whitespace).
//! - [`HeaderRegistry`] maps header names, including compact forms, to value
//!   parsers and accepts new parsers at runtime without locking readers.
//! - [`MessageParser`] turns datagrams into [`Message`]s; [`IncrementalParser`]
//!   frames messages out of a byte stream.
//! - [`builder`] builds requests and responses.
//!
//! ```rust
//! use sipline_sip_core::prelude::*;
//!
//! let raw = b"OPTIONS sip:bob@biloxi.com SIP/2.0\r\n\
//! v: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKhjhs8ass877\r\n\
//! f: <sip:alice@atlanta.com>;tag=1928301774\r\n\
//! t: <sip:bob@biloxi.com>\r\n\
//! i: a84b4c76e66710\r\n\
//! CSeq: 63104 OPTIONS\r\n\
//! l: 0\r\n\r\n";
//!
//! let message = MessageParser::default().parse(raw).unwrap();
//! assert_eq!(message.cseq().map(|c| c.seq), Some(63104));
//! assert_eq!(message.top_via().and_then(|v| v.branch()), Some("z9hG4bKhjhs8ass877"));
//! ```

pub mod builder;
pub mod error;
pub mod parser;
pub mod types;

pub use builder::{generate_branch, generate_call_id, generate_tag, RequestBuilder, ResponseBuilder};
pub use error::{Error, ErrorKind, ParseError, Result};
pub use parser::{
    parse_message, HeaderErrorContext, HeaderRegistry, IncrementalParser, MessageParser, ParseExceptionListener,
    ParserConfig, Recovery,
};
pub use types::*;

/// Everything needed to build, parse and inspect messages
pub mod prelude {
    pub use crate::builder::{generate_branch, generate_call_id, generate_tag, RequestBuilder, ResponseBuilder};
    pub use crate::error::{Error, ErrorKind, ParseError};
    pub use crate::parser::{
        HeaderErrorContext, HeaderRegistry, IncrementalParser, MessageParser, ParseExceptionListener, ParserConfig,
        Recovery,
    };
    pub use crate::types::{
        Address, CSeq, ExtensionHeader, Header, HeaderName, HeaderValue, Headers, MediaType, Message, Method,
        MimePart, MultipartBody, Param, Request, Response, Scheme, SipMessage, StatusCode, Uri, Via,
        BRANCH_MAGIC_COOKIE,
    };
}
