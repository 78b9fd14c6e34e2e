// Parser for the CSeq header (RFC 3261 Section 20.16)
// CSeq  =  "CSeq" HCOLON 1*DIGIT LWS Method

use crate::error::ParseError;
use crate::parser::lexer::Lexer;
use crate::types::cseq::CSeq;
use crate::types::headers::HeaderValue;
use crate::types::method::Method;

pub fn parse_cseq(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    lx.skip_ws();
    let seq = lx.number::<u32>()?;
    if !lx.skip_ws() {
        return Err(lx.error("expected whitespace after sequence number"));
    }
    let offset = lx.position();
    let method = lx
        .word()?
        .parse::<Method>()
        .map_err(|e| ParseError::new(value, offset, e.to_string()))?;
    lx.skip_ws();
    if !lx.is_eof() {
        return Err(lx.error("unexpected character after method"));
    }
    Ok(HeaderValue::CSeq(CSeq::new(seq, method)))
}
