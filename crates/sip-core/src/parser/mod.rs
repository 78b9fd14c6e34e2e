//! Wire-format parsing: lexer, header registry, message framing and
//! multipart decomposition.

pub mod headers;
pub mod lexer;
pub mod message;
pub mod multipart;
pub mod registry;
pub mod uri;
pub mod whitespace;

pub use lexer::{tokenize, Lexer, Token};
pub use message::{
    parse_message, HeaderErrorContext, IncrementalParser, MessageParser, ParseExceptionListener, ParserConfig,
    Recovery,
};
pub use multipart::{decode_body, decode_multipart};
pub use registry::{HeaderParserFn, HeaderRegistry};
