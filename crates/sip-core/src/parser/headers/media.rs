// Parsers for Content-Type and Accept (RFC 3261 Sections 20.1, 20.15)
// Content-Type     =  ( "Content-Type" / "c" ) HCOLON media-type
// media-type       =  m-type SLASH m-subtype *(SEMI m-parameter)
// Accept           =  "Accept" HCOLON [ accept-range *(COMMA accept-range) ]
// accept-range     =  media-range *(SEMI accept-param)

use crate::error::ParseError;
use crate::parser::lexer::Lexer;
use crate::types::headers::HeaderValue;
use crate::types::media_type::MediaType;

fn media_type(lx: &mut Lexer<'_>) -> Result<MediaType, ParseError> {
    lx.skip_ws();
    let mtype = lx.word()?.to_string();
    lx.skip_ws();
    lx.expect('/')?;
    lx.skip_ws();
    let subtype = lx.word()?.to_string();
    let params = lx.params()?;
    Ok(MediaType {
        mtype,
        subtype,
        params,
    })
}

pub fn parse_content_type(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    let mt = media_type(&mut lx)?;
    lx.skip_ws();
    if !lx.is_eof() {
        return Err(lx.error("unexpected character after media type"));
    }
    Ok(HeaderValue::MediaType(mt))
}

/// Accept ranges are kept as their canonical text so that `*/*` and
/// q-values survive untouched.
pub fn parse_accept(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    let mut ranges = Vec::new();
    lx.skip_ws();
    if lx.is_eof() {
        return Ok(HeaderValue::TokenList(ranges));
    }
    loop {
        ranges.push(media_type(&mut lx)?.to_string());
        lx.skip_ws();
        if lx.eat(',') {
            continue;
        }
        if lx.is_eof() {
            break;
        }
        return Err(lx.error("unexpected character in Accept"));
    }
    Ok(HeaderValue::TokenList(ranges))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_with_quoted_boundary() {
        let value = parse_content_type("multipart/mixed ; boundary=\"simple boundary\"").unwrap();
        let mt = value.as_media_type().unwrap();
        assert!(mt.is_multipart());
        assert_eq!(mt.boundary(), Some("simple boundary"));
    }

    #[test]
    fn test_accept() {
        let value = parse_accept("application/sdp;level=1, */*;q=0.5").unwrap();
        assert_eq!(
            value.as_tokens().unwrap(),
            &["application/sdp;level=1".to_string(), "*/*;q=0.5".to_string()]
        );
        assert_eq!(parse_accept("  ").unwrap(), HeaderValue::TokenList(vec![]));
        assert!(parse_content_type("application").is_err());
    }
}
