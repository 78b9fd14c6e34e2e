use std::fmt;

use crate::types::param::{fmt_params, param_value, set_param, Param};
use crate::types::uri::Uri;

/// A `name-addr` / `addr-spec` with header parameters, as carried by From,
/// To, Contact, Route, Record-Route, Refer-To and Referred-By.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub params: Vec<Param>,
}

impl Address {
    pub fn new(uri: Uri) -> Self {
        Self {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        set_param(&mut self.params, param);
        self
    }

    pub fn tag(&self) -> Option<&str> {
        param_value(&self.params, "tag")
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        set_param(&mut self.params, Param::new("tag", tag));
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        param_value(&self.params, name)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            f.write_str("\"")?;
            for c in name.chars() {
                if c == '"' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
            f.write_str("\" ")?;
        }
        write!(f, "<{}>", self.uri)?;
        fmt_params(f, &self.params)
    }
}
