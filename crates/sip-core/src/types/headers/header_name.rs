use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::lexer::is_token_char;

/// SIP header names known to the stack.
///
/// Header names are case-insensitive; the enum keeps the canonical spelling
/// and `FromStr` accepts any case plus the RFC compact forms
/// (`v f t m l c s k i e o u r b x`). Everything else becomes
/// [`HeaderName::Other`] with the name exactly as received.
///
/// ```rust
/// use sipline_sip_core::HeaderName;
///
/// assert_eq!("f".parse::<HeaderName>().unwrap(), HeaderName::From);
/// assert_eq!("CALL-ID".parse::<HeaderName>().unwrap(), HeaderName::CallId);
/// assert_eq!(HeaderName::AllowEvents.compact_form(), Some("u"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    MaxForwards,
    ContentLength,
    ContentType,
    ContentDisposition,
    ContentEncoding,
    ContentId,
    Route,
    RecordRoute,
    Expires,
    MinExpires,
    Subject,
    Supported,
    Require,
    ProxyRequire,
    Unsupported,
    Allow,
    AllowEvents,
    Accept,
    Event,
    SubscriptionState,
    ReferTo,
    ReferredBy,
    SessionExpires,
    UserAgent,
    Server,
    Organization,
    Date,
    Timestamp,
    RSeq,
    RAck,
    /// Any header without a dedicated variant, spelled as received
    Other(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentDisposition => "Content-Disposition",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::ContentId => "Content-ID",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::Expires => "Expires",
            HeaderName::MinExpires => "Min-Expires",
            HeaderName::Subject => "Subject",
            HeaderName::Supported => "Supported",
            HeaderName::Require => "Require",
            HeaderName::ProxyRequire => "Proxy-Require",
            HeaderName::Unsupported => "Unsupported",
            HeaderName::Allow => "Allow",
            HeaderName::AllowEvents => "Allow-Events",
            HeaderName::Accept => "Accept",
            HeaderName::Event => "Event",
            HeaderName::SubscriptionState => "Subscription-State",
            HeaderName::ReferTo => "Refer-To",
            HeaderName::ReferredBy => "Referred-By",
            HeaderName::SessionExpires => "Session-Expires",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Server => "Server",
            HeaderName::Organization => "Organization",
            HeaderName::Date => "Date",
            HeaderName::Timestamp => "Timestamp",
            HeaderName::RSeq => "RSeq",
            HeaderName::RAck => "RAck",
            HeaderName::Other(name) => name,
        }
    }

    /// Single-letter compact form, if the header has one
    pub fn compact_form(&self) -> Option<&'static str> {
        match self {
            HeaderName::Via => Some("v"),
            HeaderName::From => Some("f"),
            HeaderName::To => Some("t"),
            HeaderName::Contact => Some("m"),
            HeaderName::ContentLength => Some("l"),
            HeaderName::ContentType => Some("c"),
            HeaderName::Subject => Some("s"),
            HeaderName::Supported => Some("k"),
            HeaderName::CallId => Some("i"),
            HeaderName::ContentEncoding => Some("e"),
            HeaderName::Event => Some("o"),
            HeaderName::AllowEvents => Some("u"),
            HeaderName::ReferTo => Some("r"),
            HeaderName::ReferredBy => Some("b"),
            HeaderName::SessionExpires => Some("x"),
            _ => None,
        }
    }

    /// Lowercase canonical name, used as the registry key
    pub fn key(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    /// Headers whose values may be combined into one comma-separated line
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            HeaderName::Via
                | HeaderName::Contact
                | HeaderName::Route
                | HeaderName::RecordRoute
                | HeaderName::Supported
                | HeaderName::Require
                | HeaderName::ProxyRequire
                | HeaderName::Unsupported
                | HeaderName::Allow
                | HeaderName::AllowEvents
                | HeaderName::Accept
                | HeaderName::ContentEncoding
        )
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HeaderName::Other(a), HeaderName::Other(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Eq for HeaderName {}

impl std::hash::Hash for HeaderName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(is_token_char) {
            return Err(Error::InvalidHeader {
                name: trimmed.to_string(),
                error: crate::error::ParseError::new(trimmed, 0, "invalid header name"),
            });
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "max-forwards" => HeaderName::MaxForwards,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "content-disposition" => HeaderName::ContentDisposition,
            "content-encoding" | "e" => HeaderName::ContentEncoding,
            "content-id" => HeaderName::ContentId,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "expires" => HeaderName::Expires,
            "min-expires" => HeaderName::MinExpires,
            "subject" | "s" => HeaderName::Subject,
            "supported" | "k" => HeaderName::Supported,
            "require" => HeaderName::Require,
            "proxy-require" => HeaderName::ProxyRequire,
            "unsupported" => HeaderName::Unsupported,
            "allow" => HeaderName::Allow,
            "allow-events" | "u" => HeaderName::AllowEvents,
            "accept" => HeaderName::Accept,
            "event" | "o" => HeaderName::Event,
            "subscription-state" => HeaderName::SubscriptionState,
            "refer-to" | "r" => HeaderName::ReferTo,
            "referred-by" | "b" => HeaderName::ReferredBy,
            "session-expires" | "x" => HeaderName::SessionExpires,
            "user-agent" => HeaderName::UserAgent,
            "server" => HeaderName::Server,
            "organization" => HeaderName::Organization,
            "date" => HeaderName::Date,
            "timestamp" => HeaderName::Timestamp,
            "rseq" => HeaderName::RSeq,
            "rack" => HeaderName::RAck,
            _ => HeaderName::Other(trimmed.to_string()),
        })
    }
}
