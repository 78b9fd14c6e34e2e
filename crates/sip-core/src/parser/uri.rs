use std::str::FromStr;

use crate::error::{Error, Result};
use crate::parser::lexer::Lexer;
use crate::types::uri::{Scheme, Uri};

fn parse_scheme(s: &str) -> Scheme {
    if s.eq_ignore_ascii_case("sip") {
        Scheme::Sip
    } else if s.eq_ignore_ascii_case("sips") {
        Scheme::Sips
    } else if s.eq_ignore_ascii_case("tel") {
        Scheme::Tel
    } else {
        Scheme::Other(s.to_ascii_lowercase())
    }
}

/// Splits `host[:port]`, accepting bracketed IPv6 references
pub(crate) fn parse_host_port(s: &str) -> Result<(String, Option<u16>)> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidUri("empty host".into()));
    }
    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::InvalidUri(format!("unterminated IPv6 reference in {s}")))?;
        let host = &s[..end + 2];
        let after = &rest[end + 1..];
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(Error::InvalidUri(format!("junk after IPv6 reference in {s}"))),
        }
    } else {
        match s.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (s, None),
        }
    };
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '[' | ']' | ':'))
    {
        return Err(Error::InvalidUri(format!("invalid host '{host}'")));
    }
    let port = match port {
        Some(p) => Some(
            p.trim()
                .parse::<u16>()
                .map_err(|_| Error::InvalidUri(format!("invalid port '{p}'")))?,
        ),
        None => None,
    };
    Ok((host.to_string(), port))
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidUri(format!("missing scheme in '{s}'")))?;
        if scheme.is_empty() || !scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidUri(format!("invalid scheme in '{s}'")));
        }
        let scheme = parse_scheme(scheme);

        if !matches!(scheme, Scheme::Sip | Scheme::Sips) {
            if rest.is_empty() {
                return Err(Error::InvalidUri(format!("empty {scheme} URI")));
            }
            return Ok(Uri {
                scheme,
                user: None,
                password: None,
                host: rest.to_string(),
                port: None,
                params: Vec::new(),
                headers: None,
            });
        }

        let (rest, headers) = match rest.split_once('?') {
            Some((r, h)) => (r, Some(h.to_string())),
            None => (rest, None),
        };
        let (userinfo, hostpart) = match rest.rfind('@') {
            Some(at) => (Some(&rest[..at]), &rest[at + 1..]),
            None => (None, rest),
        };
        let (user, password) = match userinfo {
            Some(info) if info.is_empty() => {
                return Err(Error::InvalidUri(format!("empty user part in '{s}'")));
            }
            Some(info) => match info.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        let (host_port, params_text) = match hostpart.find(';') {
            Some(i) => (&hostpart[..i], &hostpart[i..]),
            None => (hostpart, ""),
        };
        let (host, port) = parse_host_port(host_port)?;

        let mut lexer = Lexer::new(params_text);
        let params = lexer
            .params()
            .map_err(|e| Error::InvalidUri(format!("{s}: {e}")))?;
        if !lexer.is_eof() {
            return Err(Error::InvalidUri(format!("trailing characters in '{s}'")));
        }

        Ok(Uri {
            scheme,
            user,
            password,
            host,
            port,
            params,
            headers,
        })
    }
}
