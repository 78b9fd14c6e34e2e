use std::fmt;

use serde::{Deserialize, Serialize};
use sipline_sip_core::prelude::{Request, Response, SipMessage};

/// Dialog identifier: Call-ID plus local and remote tag, seen from this
/// endpoint (RFC 3261 §12)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>, remote_tag: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Dialog a received request belongs to: the To tag is ours
    pub fn from_incoming_request(request: &Request) -> Option<Self> {
        Some(Self::new(request.call_id()?, request.to_tag()?, request.from_tag()?))
    }

    /// Dialog a received response belongs to: the From tag is ours
    pub fn from_incoming_response(response: &Response) -> Option<Self> {
        Some(Self::new(response.call_id()?, response.from_tag()?, response.to_tag()?))
    }

    /// Dialog a response we send establishes: the To tag is ours
    pub fn from_outgoing_response(response: &Response) -> Option<Self> {
        Some(Self::new(response.call_id()?, response.to_tag()?, response.from_tag()?))
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};local={};remote={}", self.call_id, self.local_tag, self.remote_tag)
    }
}
