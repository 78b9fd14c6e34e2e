//! Multipart body decomposition (RFC 2046 Section 5.1).
//!
//! A delimiter is `--boundary` at the start of a line. The line break that
//! precedes a delimiter belongs to the delimiter, not to the part content.
//! Anything before the first delimiter (the preamble, often a single empty
//! line) and after the closing `--boundary--` (the epilogue) is ignored.
//! Both CRLF and bare LF line breaks are accepted.

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};
use crate::parser::registry::HeaderRegistry;
use crate::parser::whitespace::unfold_lws;
use crate::types::headers::{Header, HeaderName, HeaderValue, Headers};
use crate::types::media_type::MediaType;
use crate::types::multipart::{MimePart, MultipartBody};

/// `--boundary` followed by `--`, or by optional padding and a line end
fn is_delimiter_line(line: &[u8], delimiter: &[u8]) -> bool {
    let Some(rest) = line.strip_prefix(delimiter) else {
        return false;
    };
    rest.starts_with(b"--")
        || rest
            .iter()
            .take_while(|b| **b != b'\n')
            .all(|b| matches!(b, b' ' | b'\t' | b'\r'))
}

/// Byte offsets of every delimiter line start
fn delimiter_positions(body: &[u8], delimiter: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut line_start = 0;
    while line_start < body.len() {
        if is_delimiter_line(&body[line_start..], delimiter) {
            positions.push(line_start);
        }
        match body[line_start..].iter().position(|b| *b == b'\n') {
            Some(nl) => line_start += nl + 1,
            None => break,
        }
    }
    positions
}

/// End of the line starting at `from`, and the offset just past its break
fn line_end(body: &[u8], from: usize) -> (usize, usize) {
    match body[from..].iter().position(|b| *b == b'\n') {
        Some(nl) => {
            let next = from + nl + 1;
            let end = if nl > 0 && body[from + nl - 1] == b'\r' {
                from + nl - 1
            } else {
                from + nl
            };
            (end, next)
        }
        None => (body.len(), body.len()),
    }
}

/// Drops one trailing line break
fn strip_line_break(content: &[u8]) -> &[u8] {
    let content = content.strip_suffix(b"\n").unwrap_or(content);
    content.strip_suffix(b"\r").unwrap_or(content)
}

fn looks_like_header(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => name.trim().parse::<HeaderName>().is_ok(),
        None => false,
    }
}

fn parse_part_headers(block: &str, registry: &HeaderRegistry) -> Headers {
    let mut lines: Vec<String> = Vec::new();
    for line in block.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)) {
        if line.starts_with([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str("\r\n");
                last.push_str(line);
                continue;
            }
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }

    let mut headers = Headers::new();
    for line in &lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        match registry.parse_header(name, value) {
            Ok(header) => headers.push(header),
            Err(_) => {
                if let Ok(header_name) = name.parse::<HeaderName>() {
                    headers.push(Header::new(header_name, HeaderValue::Raw(unfold_lws(value))));
                }
            }
        }
    }
    headers
}

/// Splits one part into its header block and content
fn parse_part(raw: &[u8], registry: &HeaderRegistry) -> MimePart {
    // empty header block: the part starts with the blank line
    if raw.starts_with(b"\r\n") {
        return MimePart {
            headers: Headers::new(),
            content: Bytes::copy_from_slice(&raw[2..]),
        };
    }
    if raw.starts_with(b"\n") {
        return MimePart {
            headers: Headers::new(),
            content: Bytes::copy_from_slice(&raw[1..]),
        };
    }

    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, p + 4));
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|p| (p, p + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((head_end, content_start)) => MimePart {
            headers: parse_part_headers(&String::from_utf8_lossy(&raw[..head_end]), registry),
            content: Bytes::copy_from_slice(&raw[content_start..]),
        },
        None => {
            let text = String::from_utf8_lossy(raw);
            let first_line = text.lines().next().unwrap_or_default();
            if looks_like_header(first_line) {
                MimePart {
                    headers: parse_part_headers(&text, registry),
                    content: Bytes::new(),
                }
            } else {
                MimePart {
                    headers: Headers::new(),
                    content: Bytes::copy_from_slice(raw),
                }
            }
        }
    }
}

/// Decomposes a `multipart/*` body.
///
/// A body without any delimiter line is returned as a single part with no
/// headers, so that re-encoding and parsing again yields the same content.
pub fn decode_multipart(body: &[u8], boundary: &str, registry: &HeaderRegistry) -> Result<MultipartBody> {
    if boundary.is_empty() {
        return Err(Error::InvalidMultipart("empty boundary".into()));
    }
    let delimiter = format!("--{boundary}");
    let positions = delimiter_positions(body, delimiter.as_bytes());

    let mut result = MultipartBody::new(boundary);
    if positions.is_empty() {
        result.parts.push(MimePart {
            headers: Headers::new(),
            content: Bytes::copy_from_slice(strip_line_break(body)),
        });
        return Ok(result);
    }

    for (i, &pos) in positions.iter().enumerate() {
        let after = pos + delimiter.len();
        if body[after..].starts_with(b"--") {
            break;
        }
        let (_, part_start) = line_end(body, after);
        let part_end = match positions.get(i + 1) {
            Some(&next) => next,
            // no closing delimiter: the last part runs to the end of the body
            None => body.len(),
        };
        if part_start > part_end {
            continue;
        }
        let raw = strip_line_break(&body[part_start..part_end]);
        result.parts.push(parse_part(raw, registry));
    }

    trace!(boundary, parts = result.parts.len(), "Decoded multipart body");
    Ok(result)
}

/// Decomposes any body: `multipart/*` into its parts, anything else into a
/// single part carrying the message's Content-Type.
pub fn decode_body(content_type: Option<&MediaType>, body: &Bytes, registry: &HeaderRegistry) -> Result<MultipartBody> {
    match content_type {
        Some(ct) if ct.is_multipart() => {
            let boundary = ct
                .boundary()
                .ok_or_else(|| Error::InvalidMultipart(format!("no boundary in {ct}")))?;
            decode_multipart(body, boundary, registry)
        }
        other => Ok(MultipartBody::single(other.cloned(), body.clone())),
    }
}
