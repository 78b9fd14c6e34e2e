use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::address::Address;
use crate::types::cseq::CSeq;
use crate::types::headers::header_name::HeaderName;
use crate::types::media_type::MediaType;
use crate::types::param::{fmt_params, Param};
use crate::types::via::Via;

/// Capability implemented by header types registered at runtime.
///
/// `Display` produces the wire form of the value (without the header name).
/// Equality between extension values is equality of their wire forms.
pub trait ExtensionHeader: fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Typed value of a header.
///
/// The variants collapse the per-header class hierarchy into a handful of
/// shapes: simple values, parameterized values, addresses and lists.
#[derive(Debug, Clone)]
pub enum HeaderValue {
    /// One or more Via values
    Via(Vec<Via>),
    /// A single address (From, To, Refer-To, Referred-By)
    Address(Address),
    /// Comma-separated addresses (Contact, Route, Record-Route)
    AddressList(Vec<Address>),
    /// `Contact: *`
    ContactWildcard,
    CSeq(CSeq),
    /// Non-negative integer (Content-Length, Max-Forwards, Expires, ...)
    Integer(u32),
    /// Free text or a single word (Call-ID, Subject, User-Agent, ...)
    Text(String),
    MediaType(MediaType),
    /// `token *(;param)` (Event, Content-Disposition, Subscription-State, ...)
    Parameterized { value: String, params: Vec<Param> },
    /// Comma-separated tokens (Allow, Supported, Require, ...)
    TokenList(Vec<String>),
    Date(DateTime<Utc>),
    /// Unparsed value kept verbatim
    Raw(String),
    /// A value produced by a parser registered at runtime
    Extension(Arc<dyn ExtensionHeader>),
}

impl HeaderValue {
    pub fn as_vias(&self) -> Option<&[Via]> {
        match self {
            HeaderValue::Via(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            HeaderValue::Address(a) => Some(a),
            HeaderValue::AddressList(list) if list.len() == 1 => list.first(),
            _ => None,
        }
    }

    pub fn as_addresses(&self) -> &[Address] {
        match self {
            HeaderValue::AddressList(list) => list,
            HeaderValue::Address(a) => std::slice::from_ref(a),
            _ => &[],
        }
    }

    pub fn as_cseq(&self) -> Option<&CSeq> {
        match self {
            HeaderValue::CSeq(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<u32> {
        match self {
            HeaderValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(t) | HeaderValue::Raw(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_media_type(&self) -> Option<&MediaType> {
        match self {
            HeaderValue::MediaType(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tokens(&self) -> Option<&[String]> {
        match self {
            HeaderValue::TokenList(t) => Some(t),
            _ => None,
        }
    }

    /// Downcasts a runtime-registered value
    pub fn as_extension<T: ExtensionHeader>(&self) -> Option<&T> {
        match self {
            HeaderValue::Extension(ext) => ext.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, HeaderValue::Raw(_))
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Via(vias) => join(f, vias),
            HeaderValue::Address(a) => write!(f, "{a}"),
            HeaderValue::AddressList(list) => join(f, list),
            HeaderValue::ContactWildcard => f.write_str("*"),
            HeaderValue::CSeq(c) => write!(f, "{c}"),
            HeaderValue::Integer(n) => write!(f, "{n}"),
            HeaderValue::Text(t) | HeaderValue::Raw(t) => f.write_str(t),
            HeaderValue::MediaType(m) => write!(f, "{m}"),
            HeaderValue::Parameterized { value, params } => {
                f.write_str(value)?;
                fmt_params(f, params)
            }
            HeaderValue::TokenList(tokens) => join(f, tokens),
            HeaderValue::Date(d) => write!(f, "{}", d.format("%a, %d %b %Y %H:%M:%S GMT")),
            HeaderValue::Extension(ext) => write!(f, "{ext}"),
        }
    }
}

impl PartialEq for HeaderValue {
    fn eq(&self, other: &Self) -> bool {
        use HeaderValue::*;
        match (self, other) {
            (Via(a), Via(b)) => a == b,
            (Address(a), Address(b)) => a == b,
            (AddressList(a), AddressList(b)) => a == b,
            (ContactWildcard, ContactWildcard) => true,
            (CSeq(a), CSeq(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (MediaType(a), MediaType(b)) => a == b,
            (Parameterized { value: va, params: pa }, Parameterized { value: vb, params: pb }) => {
                va.eq_ignore_ascii_case(vb) && pa == pb
            }
            (TokenList(a), TokenList(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Raw(a), Raw(b)) => a == b,
            (Extension(a), Extension(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// A header: name plus typed value
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub name: HeaderName,
    pub value: HeaderValue,
}

impl Header {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    /// Header with an unparsed value
    pub fn raw(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.parse().unwrap_or(HeaderName::Other(name));
        Self {
            name,
            value: HeaderValue::Raw(value.into()),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::uri::Uri;

    #[derive(Debug)]
    struct Priority(u8);

    impl fmt::Display for Priority {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "level-{}", self.0)
        }
    }

    impl ExtensionHeader for Priority {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_extension_downcast_and_equality() {
        let a = HeaderValue::Extension(Arc::new(Priority(3)));
        let b = HeaderValue::Extension(Arc::new(Priority(3)));
        assert_eq!(a, b);
        assert_eq!(a.as_extension::<Priority>().map(|p| p.0), Some(3));
        assert_eq!(a.to_string(), "level-3");
    }

    #[test]
    fn test_header_display() {
        let header = Header::new(
            HeaderName::To,
            HeaderValue::Address(Address::new(Uri::sip("biloxi.com").with_user("bob"))),
        );
        assert_eq!(header.to_string(), "To: <sip:bob@biloxi.com>");
        assert_eq!(Header::raw("X-Foo", "bar baz").to_string(), "X-Foo: bar baz");
    }
}
