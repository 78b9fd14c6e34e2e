//! Built-in header value parsers.
//!
//! Every parser takes the header value (name and colon already removed,
//! continuation lines still folded) and returns a typed [`HeaderValue`].

mod address;
mod cseq;
mod date;
mod media;
mod token_list;
mod via;

pub use address::{address, parse_address_list, parse_contact, parse_single_address};
pub use cseq::parse_cseq;
pub use date::parse_date;
pub use media::{parse_accept, parse_content_type};
pub use token_list::parse_token_list;
pub use via::parse_via;

use crate::error::ParseError;
use crate::parser::lexer::{is_token_char, Lexer};
use crate::parser::whitespace::unfold_lws;
use crate::types::headers::{HeaderName, HeaderValue};

/// Plain function signature shared by the built-in parsers
pub type BuiltinParser = fn(&str) -> Result<HeaderValue, ParseError>;

/// Content-Length, Max-Forwards, Expires, Min-Expires, RSeq
pub fn parse_integer(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    lx.skip_ws();
    let n = lx.number::<u32>()?;
    lx.skip_ws();
    if !lx.is_eof() {
        return Err(lx.error("unexpected character after number"));
    }
    Ok(HeaderValue::Integer(n))
}

/// Subject, User-Agent, Server, Organization and other TEXT-UTF8 headers
pub fn parse_text(value: &str) -> Result<HeaderValue, ParseError> {
    Ok(HeaderValue::Text(unfold_lws(value)))
}

/// Call-ID  =  word [ "@" word ]
pub fn parse_call_id(value: &str) -> Result<HeaderValue, ParseError> {
    let text = value.trim();
    if text.is_empty() {
        return Err(ParseError::new(value, 0, "empty Call-ID"));
    }
    if let Some(pos) = text.find(|c: char| c.is_whitespace() || c.is_control()) {
        return Err(ParseError::new(text, pos, "whitespace in Call-ID"));
    }
    Ok(HeaderValue::Text(text.to_string()))
}

/// `token *(SEMI generic-param)`: Event, Content-Disposition,
/// Subscription-State, Session-Expires
pub fn parse_parameterized(value: &str) -> Result<HeaderValue, ParseError> {
    let mut lx = Lexer::new(value);
    lx.skip_ws();
    let value_text = lx.take_while(|c| is_token_char(c) || c == '/');
    if value_text.is_empty() {
        return Err(lx.error("expected token"));
    }
    let params = lx.params()?;
    lx.skip_ws();
    if !lx.is_eof() {
        return Err(lx.error("unexpected character after parameters"));
    }
    Ok(HeaderValue::Parameterized {
        value: value_text.to_string(),
        params,
    })
}

/// The table the registry starts from
pub fn builtin_parsers() -> Vec<(HeaderName, BuiltinParser)> {
    vec![
        (HeaderName::Via, parse_via as BuiltinParser),
        (HeaderName::From, parse_single_address),
        (HeaderName::To, parse_single_address),
        (HeaderName::ReferTo, parse_single_address),
        (HeaderName::ReferredBy, parse_single_address),
        (HeaderName::Contact, parse_contact),
        (HeaderName::Route, parse_address_list),
        (HeaderName::RecordRoute, parse_address_list),
        (HeaderName::CallId, parse_call_id),
        (HeaderName::CSeq, parse_cseq),
        (HeaderName::ContentLength, parse_integer),
        (HeaderName::MaxForwards, parse_integer),
        (HeaderName::Expires, parse_integer),
        (HeaderName::MinExpires, parse_integer),
        (HeaderName::RSeq, parse_integer),
        (HeaderName::ContentType, parse_content_type),
        (HeaderName::Accept, parse_accept),
        (HeaderName::ContentDisposition, parse_parameterized),
        (HeaderName::Event, parse_parameterized),
        (HeaderName::SubscriptionState, parse_parameterized),
        (HeaderName::SessionExpires, parse_parameterized),
        (HeaderName::Allow, parse_token_list),
        (HeaderName::Supported, parse_token_list),
        (HeaderName::Require, parse_token_list),
        (HeaderName::ProxyRequire, parse_token_list),
        (HeaderName::Unsupported, parse_token_list),
        (HeaderName::AllowEvents, parse_token_list),
        (HeaderName::ContentEncoding, parse_token_list),
        (HeaderName::Subject, parse_text),
        (HeaderName::UserAgent, parse_text),
        (HeaderName::Server, parse_text),
        (HeaderName::Organization, parse_text),
        (HeaderName::ContentId, parse_text),
        (HeaderName::Timestamp, parse_text),
        (HeaderName::Date, parse_date),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::param::Param;

    #[test]
    fn test_integer() {
        assert_eq!(parse_integer(" 70 ").unwrap(), HeaderValue::Integer(70));
        assert!(parse_integer("-1").is_err());
        assert!(parse_integer("12 34").is_err());
    }

    #[test]
    fn test_text_is_unfolded() {
        assert_eq!(
            parse_text("  Lunch\r\n   tomorrow? ").unwrap(),
            HeaderValue::Text("Lunch tomorrow?".into())
        );
    }

    #[test]
    fn test_call_id() {
        assert_eq!(
            parse_call_id("a84b4c76e66710@pc33.atlanta.com").unwrap(),
            HeaderValue::Text("a84b4c76e66710@pc33.atlanta.com".into())
        );
        assert!(parse_call_id("a b").is_err());
        assert!(parse_call_id("  ").is_err());
    }

    #[test]
    fn test_parameterized() {
        let value = parse_parameterized("active;expires=3600").unwrap();
        assert_eq!(
            value,
            HeaderValue::Parameterized {
                value: "active".into(),
                params: vec![Param::new("expires", "3600")],
            }
        );
        assert_eq!(value.to_string(), "active;expires=3600");
        assert!(parse_parameterized(";x").is_err());
    }

    /// A representative value, with parameters and lists where the grammar
    /// allows them, for every header with a built-in parser
    fn sample(name: &HeaderName) -> Option<&'static str> {
        Some(match name {
            HeaderName::Via => {
                "SIP/2.0/UDP pc33.atlanta.com:5060;branch=z9hG4bK776asdhds;received=192.0.2.1, \
                 SIP/2.0/TCP proxy.biloxi.com;branch=z9hG4bK4b43c2ff8.1;rport"
            }
            HeaderName::From => "\"Alice \\\"A\\\" Liddell\" <sip:alice@atlanta.com>;tag=1928301774",
            HeaderName::To => "<sip:bob@biloxi.com;transport=tcp>",
            HeaderName::ReferTo => "<sip:carol@chicago.com;method=INVITE>",
            HeaderName::ReferredBy => "<sip:alice@atlanta.com>;cid=20",
            HeaderName::Contact => {
                "<sip:alice@pc33.atlanta.com>;q=0.7;expires=3600, \"Mobile\" <sip:alice@192.0.2.4:5080;transport=udp>"
            }
            HeaderName::Route => "<sip:p1.example.com;lr>, <sip:p2.example.com;lr>",
            HeaderName::RecordRoute => "<sip:p2.example.com;lr>, <sip:p1.example.com:5061;lr;transport=tcp>",
            HeaderName::CallId => "a84b4c76e66710@pc33.atlanta.com",
            HeaderName::CSeq => "314159 INVITE",
            HeaderName::ContentLength => "142",
            HeaderName::MaxForwards => "70",
            HeaderName::Expires => "3600",
            HeaderName::MinExpires => "60",
            HeaderName::RSeq => "988789",
            HeaderName::ContentType => "multipart/mixed;boundary=unique-boundary-1",
            HeaderName::Accept => "application/sdp, text/plain;charset=utf-8",
            HeaderName::ContentDisposition => "session;handling=optional",
            HeaderName::Event => "presence;id=42",
            HeaderName::SubscriptionState => "active;expires=600",
            HeaderName::SessionExpires => "1800;refresher=uac",
            HeaderName::Allow => "INVITE, ACK, CANCEL, BYE, NOTIFY",
            HeaderName::Supported => "timer, 100rel",
            HeaderName::Require => "100rel",
            HeaderName::ProxyRequire => "sec-agree",
            HeaderName::Unsupported => "foo, bar",
            HeaderName::AllowEvents => "presence, dialog",
            HeaderName::ContentEncoding => "gzip",
            HeaderName::Subject => "Need more boxes",
            HeaderName::UserAgent => "sipline/0.1 (linux)",
            HeaderName::Server => "HomeServer v2",
            HeaderName::Organization => "Boxes by Bob",
            HeaderName::ContentId => "<part1@example.com>",
            HeaderName::Timestamp => "54.2 0.5",
            HeaderName::Date => "Sat, 13 Nov 2010 23:29:00 GMT",
            _ => return None,
        })
    }

    #[test]
    fn test_every_builtin_parser_round_trips() {
        for (name, parser) in builtin_parsers() {
            let text = sample(&name).unwrap_or_else(|| panic!("no sample value for {name}"));
            let parsed = parser(text).unwrap_or_else(|e| panic!("{name}: {e}"));
            assert!(!parsed.is_raw(), "{name} parsed as raw");

            let encoded = parsed.to_string();
            let reparsed = parser(&encoded).unwrap_or_else(|e| panic!("{name} re-parse of {encoded:?}: {e}"));
            assert_eq!(parsed, reparsed, "{name}: {text:?} encoded as {encoded:?}");
            assert_eq!(reparsed.to_string(), encoded, "{name} encoding is not stable");
        }
    }
}
