// Parsers for address headers (RFC 3261 Sections 20.10, 20.20, 20.30, 20.34, 20.39)
// From / To / Refer-To / Referred-By = ( name-addr / addr-spec ) *( SEMI params )
// Contact        =  ( "Contact" / "m" ) HCOLON ( STAR / (contact-param *(COMMA contact-param)))
// Route          =  "Route" HCOLON route-param *(COMMA route-param)
// Record-Route   =  "Record-Route" HCOLON rec-route *(COMMA rec-route)
// name-addr      =  [ display-name ] LAQUOT addr-spec RAQUOT
// display-name   =  *(token LWS) / quoted-string
//
// In the addr-spec form, everything after the first `;` is a header
// parameter, not a URI parameter.

use crate::error::ParseError;
use crate::parser::lexer::Lexer;
use crate::types::address::Address;
use crate::types::headers::HeaderValue;
use crate::types::uri::Uri;

fn parse_uri(lx: &Lexer<'_>, text: &str, offset: usize) -> Result<Uri, ParseError> {
    text.parse::<Uri>()
        .map_err(|e| ParseError::new(lx.input(), offset, e.to_string()))
}

/// Scans one `name-addr` or `addr-spec` plus its header parameters
pub fn address(lx: &mut Lexer<'_>) -> Result<Address, ParseError> {
    lx.skip_ws();
    let display_name = match lx.peek_char() {
        Some('"') => {
            let name = lx.quoted_string()?;
            lx.skip_ws();
            Some(name)
        }
        Some('<') => None,
        _ => {
            let rest = lx.remaining();
            match rest.find([',', ';', '<']) {
                Some(idx) if rest[idx..].starts_with('<') => {
                    let name = rest[..idx].trim();
                    lx.take_while(|c| c != '<');
                    (!name.is_empty()).then(|| name.split_whitespace().collect::<Vec<_>>().join(" "))
                }
                _ => None,
            }
        }
    };

    let uri = if lx.eat('<') {
        lx.skip_ws();
        let offset = lx.position();
        let text = lx.take_while(|c| c != '>');
        lx.expect('>')?;
        parse_uri(lx, text.trim_end(), offset)?
    } else if display_name.is_some() {
        return Err(lx.error("expected '<' after display name"));
    } else {
        let offset = lx.position();
        let text = lx.take_while(|c| !matches!(c, ';' | ',' | ' ' | '\t' | '\r' | '\n'));
        if text.is_empty() {
            return Err(lx.error("expected address"));
        }
        parse_uri(lx, text, offset)?
    };

    let params = lx.params()?;
    Ok(Address {
        display_name,
        uri,
        params,
    })
}

fn address_list(value: &str) -> Result<Vec<Address>, ParseError> {
    let mut lx = Lexer::new(value);
    let mut list = Vec::new();
    loop {
        list.push(address(&mut lx)?);
        lx.skip_ws();
        if lx.eat(',') {
            continue;
        }
        if lx.is_eof() {
            break;
        }
        return Err(lx.error("unexpected character after address"));
    }
    Ok(list)
}

/// From, To, Refer-To, Referred-By
pub fn parse_single_address(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    let addr = address(&mut lx)?;
    lx.skip_ws();
    if !lx.is_eof() {
        return Err(lx.error("unexpected character after address"));
    }
    Ok(HeaderValue::Address(addr))
}

/// Route, Record-Route
pub fn parse_address_list(value: &str) -> Result<HeaderValue, ParseError> {
    address_list(value).map(HeaderValue::AddressList)
}

/// Contact, including the `*` wildcard used by REGISTER
pub fn parse_contact(value: &str) -> Result<HeaderValue, ParseError> {
    if value.trim() == "*" {
        return Ok(HeaderValue::ContactWildcard);
    }
    address_list(value).map(HeaderValue::AddressList)
}
