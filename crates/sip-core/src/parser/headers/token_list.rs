// Parser for comma-separated token lists (RFC 3261 Sections 20.5, 20.29, 20.32, 20.37, 20.40)
// Allow / Supported / Require / Proxy-Require / Unsupported / Allow-Events / Content-Encoding
//   = name HCOLON [ token *(COMMA token) ]

use crate::error::ParseError;
use crate::parser::lexer::Lexer;
use crate::types::headers::HeaderValue;

/// Parses an optionally empty token list
pub fn parse_token_list(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    let mut tokens = Vec::new();
    lx.skip_ws();
    if lx.is_eof() {
        return Ok(HeaderValue::TokenList(tokens));
    }
    loop {
        lx.skip_ws();
        tokens.push(lx.word()?.to_string());
        lx.skip_ws();
        if lx.eat(',') {
            continue;
        }
        if lx.is_eof() {
            break;
        }
        return Err(lx.error("expected ',' between tokens"));
    }
    Ok(HeaderValue::TokenList(tokens))
}
