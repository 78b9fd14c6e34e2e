use std::fmt;

use crate::types::param::{fmt_params, param_value, Param};

/// `type/subtype *(;param)` as carried by Content-Type and Accept
#[derive(Debug, Clone, Eq)]
pub struct MediaType {
    pub mtype: String,
    pub subtype: String,
    pub params: Vec<Param>,
}

impl MediaType {
    pub fn new(mtype: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            mtype: mtype.into(),
            subtype: subtype.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn is_multipart(&self) -> bool {
        self.mtype.eq_ignore_ascii_case("multipart")
    }

    /// Multipart boundary, quotes already removed by the lexer
    pub fn boundary(&self) -> Option<&str> {
        param_value(&self.params, "boundary")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        param_value(&self.params, name)
    }

    /// `true` for `type/subtype` ignoring case and parameters
    pub fn matches(&self, mtype: &str, subtype: &str) -> bool {
        self.mtype.eq_ignore_ascii_case(mtype) && self.subtype.eq_ignore_ascii_case(subtype)
    }
}

impl PartialEq for MediaType {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.mtype, &other.subtype) && self.params == other.params
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mtype, self.subtype)?;
        fmt_params(f, &self.params)
    }
}
