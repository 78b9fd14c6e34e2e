use std::fmt;

use crate::types::param::{find_param, fmt_params, param_value, set_param, Param};

/// RFC 3261 magic cookie prefixing compliant branch values
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via value (`sent-protocol sent-by *(;via-params)`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub protocol: String,
    pub version: String,
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<Param>,
}

impl Via {
    /// `SIP/2.0/<transport> host[:port];branch=<branch>`
    pub fn new(transport: &str, host: impl Into<String>, port: Option<u16>, branch: impl Into<String>) -> Self {
        Self {
            protocol: "SIP".to_string(),
            version: "2.0".to_string(),
            transport: transport.to_ascii_uppercase(),
            host: host.into(),
            port,
            params: vec![Param::new("branch", branch)],
        }
    }

    pub fn branch(&self) -> Option<&str> {
        param_value(&self.params, "branch")
    }

    pub fn set_branch(&mut self, branch: impl Into<String>) {
        set_param(&mut self.params, Param::new("branch", branch));
    }

    /// `true` when the branch starts with the RFC 3261 magic cookie
    pub fn has_rfc3261_branch(&self) -> bool {
        self.branch().is_some_and(|b| b.starts_with(BRANCH_MAGIC_COOKIE))
    }

    pub fn received(&self) -> Option<&str> {
        param_value(&self.params, "received")
    }

    /// `Some(None)` for a bare `;rport`, `Some(Some(port))` once filled in
    pub fn rport(&self) -> Option<Option<u16>> {
        find_param(&self.params, "rport").map(|p| p.value.as_deref().and_then(|v| v.parse().ok()))
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        find_param(&self.params, name)
    }

    /// `host[:port]`, lowercased for comparisons
    pub fn sent_by(&self) -> String {
        let host = self.host.to_ascii_lowercase();
        match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }

    pub fn is_reliable_transport(&self) -> bool {
        !self.transport.eq_ignore_ascii_case("UDP")
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{} {}", self.protocol, self.version, self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        fmt_params(f, &self.params)
    }
}
