//! Header parser registry.
//!
//! Maps header names (canonical or compact, any case) to value parsers.
//! Lookups read an immutable snapshot through [`ArcSwap`] and never take a
//! lock; [`HeaderRegistry::register`] publishes a new snapshot
//! (copy-on-write), so registration never blocks concurrent parsing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::error::{Error, ParseError, Result};
use crate::parser::headers::builtin_parsers;
use crate::parser::whitespace::unfold_lws;
use crate::types::headers::{Header, HeaderName, HeaderValue};

/// A header value parser
pub type HeaderParserFn = Arc<dyn Fn(&str) -> std::result::Result<HeaderValue, ParseError> + Send + Sync>;

fn raw_parser(value: &str) -> std::result::Result<HeaderValue, ParseError> {
    Ok(HeaderValue::Raw(unfold_lws(value)))
}

/// Name-to-parser dispatch table
pub struct HeaderRegistry {
    parsers: ArcSwap<HashMap<String, HeaderParserFn>>,
    raw: HeaderParserFn,
}

impl HeaderRegistry {
    /// A registry pre-loaded with every built-in parser
    pub fn new() -> Self {
        let parsers = builtin_parsers()
            .into_iter()
            .map(|(name, f)| (name.key(), Arc::new(f) as HeaderParserFn))
            .collect::<HashMap<_, _>>();
        Self {
            parsers: ArcSwap::from_pointee(parsers),
            raw: Arc::new(raw_parser),
        }
    }

    /// A registry that keeps every header raw until parsers are registered
    pub fn empty() -> Self {
        Self {
            parsers: ArcSwap::from_pointee(HashMap::new()),
            raw: Arc::new(raw_parser),
        }
    }

    /// Resolves a header name to its canonical [`HeaderName`] and parser.
    ///
    /// Unregistered names resolve to a parser that keeps the value raw.
    pub fn resolve(&self, name: &str) -> Result<(HeaderName, HeaderParserFn)> {
        let header_name: HeaderName = name.parse()?;
        let parser = self
            .parsers
            .load()
            .get(&header_name.key())
            .cloned()
            .unwrap_or_else(|| self.raw.clone());
        Ok((header_name, parser))
    }

    /// Registers (or replaces) the parser for `name`.
    ///
    /// Registering a canonical name also covers its compact form.
    pub fn register<F>(&self, name: &str, parser: F) -> Result<()>
    where
        F: Fn(&str) -> std::result::Result<HeaderValue, ParseError> + Send + Sync + 'static,
    {
        let key = name.parse::<HeaderName>()?.key();
        let parser: HeaderParserFn = Arc::new(parser);
        self.parsers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(key.clone(), parser.clone());
            next
        });
        debug!(header = %name, "Registered header parser");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        name.parse::<HeaderName>()
            .map(|n| self.parsers.load().contains_key(&n.key()))
            .unwrap_or(false)
    }

    /// Parses a single header value into a [`Header`]
    pub fn parse_header(&self, name: &str, value: &str) -> Result<Header> {
        let (header_name, parser) = self.resolve(name)?;
        let value = parser(value).map_err(|error| Error::InvalidHeader {
            name: header_name.to_string(),
            error,
        })?;
        Ok(Header::new(header_name, value))
    }
}

impl Default for HeaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HeaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.parsers.load();
        let mut names: Vec<&String> = snapshot.keys().collect();
        names.sort();
        f.debug_struct("HeaderRegistry").field("parsers", &names).finish()
    }
}
