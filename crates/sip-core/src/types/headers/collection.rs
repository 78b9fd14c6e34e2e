use std::fmt;

use crate::types::headers::header::{Header, HeaderValue};
use crate::types::headers::header_name::HeaderName;

/// Ordered header list.
///
/// Order is preserved exactly as received or inserted; lookups return the
/// first header with a matching name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &HeaderName) -> Option<&Header> {
        self.0.iter().find(|h| &h.name == name)
    }

    pub fn get_value(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.get(name).map(|h| &h.value)
    }

    pub fn get_mut(&mut self, name: &HeaderName) -> Option<&mut Header> {
        self.0.iter_mut().find(|h| &h.name == name)
    }

    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a Header> + 'a {
        self.0.iter().filter(move |h| &h.name == name)
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.get(name).is_some()
    }

    /// Appends a header after all existing ones
    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// Inserts a header in front of all existing ones (new top Via, Route)
    pub fn push_front(&mut self, header: Header) {
        self.0.insert(0, header);
    }

    /// Replaces every header with this name by `header`, keeping the position
    /// of the first one
    pub fn set(&mut self, header: Header) {
        match self.0.iter().position(|h| h.name == header.name) {
            Some(idx) => {
                let name = header.name.clone();
                self.0[idx] = header;
                let mut i = 0;
                self.0.retain(|h| {
                    let keep = i <= idx || h.name != name;
                    i += 1;
                    keep
                });
            }
            None => self.0.push(header),
        }
    }

    /// Removes every header with this name, returning how many were removed
    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.0.len();
        self.0.retain(|h| &h.name != name);
        before - self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Header> {
        self.0.iter_mut()
    }
}

impl From<Vec<Header>> for Headers {
    fn from(headers: Vec<Header>) -> Self {
        Self(headers)
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for h in &self.0 {
            write!(f, "{h}\r\n")?;
        }
        Ok(())
    }
}
