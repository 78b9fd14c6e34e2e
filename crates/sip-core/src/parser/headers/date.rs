// Parser for the Date header (RFC 3261 Section 20.17)
// Date        =  "Date" HCOLON SIP-date
// SIP-date    =  rfc1123-date, always in GMT

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::types::headers::HeaderValue;

pub fn parse_date(value: &str) -> Result<HeaderValue, ParseError> {
    let text = value.trim();
    DateTime::parse_from_rfc2822(text)
        .map(|d| HeaderValue::Date(d.with_timezone(&Utc)))
        .map_err(|e| ParseError::new(value, 0, format!("invalid SIP-date: {e}")))
}
