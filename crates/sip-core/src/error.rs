use std::fmt;
use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// Callers use it to pick a recovery strategy: syntax errors can often be
/// recovered per header, semantic errors usually turn into a 4xx/5xx response,
/// and resource errors are fatal for the message (and sometimes the connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input at the token or line level
    Syntax,
    /// Well-formed input that violates a protocol rule
    Semantic,
    /// A configured limit was exceeded
    Resource,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "syntax"),
            ErrorKind::Semantic => write!(f, "semantic"),
            ErrorKind::Resource => write!(f, "resource"),
        }
    }
}

/// A token-level failure, carrying the offending text and the byte offset
/// inside it where scanning stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset} in {text:?}")]
pub struct ParseError {
    /// The text being scanned (usually a single header value)
    pub text: String,
    /// Byte offset into `text`
    pub offset: usize,
    /// Human readable reason
    pub message: String,
}

impl ParseError {
    pub fn new(text: impl Into<String>, offset: usize, message: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            offset,
            message: message.into(),
        }
    }
}

/// Errors that can occur in SIP protocol handling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Token-level syntax error
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    /// Header block bytes that are not UTF-8; `offset` is the first bad byte
    #[error("invalid UTF-8 in header block at byte {offset}")]
    InvalidUtf8 { offset: usize },

    /// Malformed request or status line
    #[error("invalid start line: {0}")]
    InvalidStartLine(String),

    /// A header could not be parsed and the configured policy aborted the message
    #[error("invalid {name} header: {error}")]
    InvalidHeader { name: String, error: ParseError },

    /// Invalid SIP URI
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Invalid SIP method
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// Status code outside 100..=699
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// A mandatory header is absent
    #[error("missing mandatory header: {0}")]
    MissingHeader(String),

    /// A header that must appear once appears with conflicting values
    #[error("conflicting {0} headers")]
    DuplicateHeader(String),

    /// Content-Length declares more bytes than the datagram carries
    #[error("Content-Length {declared} exceeds available body of {available} bytes")]
    ContentLengthMismatch { declared: usize, available: usize },

    /// Multipart body could not be decomposed
    #[error("invalid multipart body: {0}")]
    InvalidMultipart(String),

    /// Message (or its declared body) is larger than the configured limit
    #[error("message size {size} exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// More header lines than the configured limit
    #[error("more than {0} header lines")]
    TooManyHeaders(usize),

    /// Stream framing needs more bytes before a message can be produced
    #[error("incomplete message")]
    Incomplete,
}

impl Error {
    /// Classifies the error for recovery decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Syntax(_)
            | Error::InvalidStartLine(_)
            | Error::InvalidUtf8 { .. }
            | Error::InvalidHeader { .. }
            | Error::InvalidUri(_)
            | Error::InvalidMethod(_)
            | Error::InvalidStatusCode(_)
            | Error::InvalidMultipart(_)
            | Error::Incomplete => ErrorKind::Syntax,
            Error::MissingHeader(_)
            | Error::DuplicateHeader(_)
            | Error::ContentLengthMismatch { .. } => ErrorKind::Semantic,
            Error::MessageTooLarge { .. } | Error::TooManyHeaders(_) => ErrorKind::Resource,
        }
    }

    /// `true` when the error only concerns a single header and the rest of
    /// the message may still be usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Syntax(_) | Error::InvalidHeader { .. })
    }
}
