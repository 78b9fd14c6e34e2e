// Parser for the Via header (RFC 3261 Section 20.42)
// Via               =  ( "Via" / "v" ) HCOLON via-parm *(COMMA via-parm)
// via-parm          =  sent-protocol LWS sent-by *( SEMI via-params )
// sent-protocol     =  protocol-name SLASH protocol-version SLASH transport
// sent-by           =  host [ COLON port ]
//
// SLASH is `SWS "/" SWS`, so `SIP / 2.0 / UDP` is legal; this parser also
// accepts arbitrary runs of whitespace there as seen in the torture tests.
// A trailing comment after a via-parm is tolerated and dropped.

use crate::error::ParseError;
use crate::parser::lexer::Lexer;
use crate::types::headers::HeaderValue;
use crate::types::via::Via;

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

fn slash(lx: &mut Lexer<'_>) -> Result<(), ParseError> {
    lx.skip_ws();
    lx.expect('/')?;
    lx.skip_ws();
    Ok(())
}

fn via_parm(lx: &mut Lexer<'_>) -> Result<Via, ParseError> {
    let protocol = lx.word()?.to_string();
    slash(lx)?;
    let version = lx.word()?.to_string();
    slash(lx)?;
    let transport = lx.word()?.to_ascii_uppercase();
    if !lx.skip_ws() {
        return Err(lx.error("expected whitespace before sent-by"));
    }

    let host = if lx.peek_char() == Some('[') {
        let start = lx.position();
        lx.take_while(|c| c != ']');
        lx.expect(']')?;
        lx.input()[start..lx.position()].to_string()
    } else {
        let host = lx.take_while(is_host_char);
        if host.is_empty() {
            return Err(lx.error("expected sent-by host"));
        }
        host.to_string()
    };

    lx.skip_ws();
    let port = if lx.eat(':') {
        lx.skip_ws();
        Some(lx.number::<u16>()?)
    } else {
        None
    };

    let params = lx.params()?;
    Ok(Via {
        protocol,
        version,
        transport,
        host,
        port,
        params,
    })
}

/// Parses one or more comma-separated Via values
pub fn parse_via(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    let mut vias = Vec::new();
    loop {
        lx.skip_ws();
        vias.push(via_parm(&mut lx)?);
        lx.skip_ws();
        if lx.peek_char() == Some('(') {
            lx.comment()?;
            lx.skip_ws();
        }
        if lx.eat(',') {
            continue;
        }
        if lx.is_eof() {
            break;
        }
        return Err(lx.error("unexpected character after via-parm"));
    }
    Ok(HeaderValue::Via(vias))
}
