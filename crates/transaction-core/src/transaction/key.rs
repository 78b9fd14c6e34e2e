use std::fmt;

use sipline_sip_core::prelude::{Method, Request, Response, SipMessage};

/// Prefix of synthetic branches computed for RFC 2543 peers
const LEGACY_PREFIX: &str = "legacy|";

/// Identifies a transaction in the transaction table.
///
/// Client transactions are keyed by the branch of the Via they inserted plus
/// the CSeq method (RFC 3261 §17.1.3), so a CANCEL sharing the INVITE's
/// branch is a different transaction. Server transactions additionally use
/// the sent-by of the top Via (§17.2.3), and ACK is folded onto the INVITE
/// it acknowledges.
///
/// When the top Via branch lacks the `z9hG4bK` cookie the branch is replaced
/// by a value derived from the Request-URI, From tag, Call-ID, CSeq number
/// and top Via, which is what RFC 2543 used for matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    /// Lowercased branch, or the synthetic legacy value
    pub branch: String,
    pub method: Method,
    /// Lowercased `host[:port]` of the top Via; empty for client keys
    pub sent_by: String,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn client(branch: &str, method: Method) -> Self {
        Self {
            branch: branch.to_ascii_lowercase(),
            method,
            sent_by: String::new(),
            is_server: false,
        }
    }

    pub fn server(branch: &str, sent_by: &str, method: Method) -> Self {
        Self {
            branch: branch.to_ascii_lowercase(),
            method: fold_ack(method),
            sent_by: sent_by.to_ascii_lowercase(),
            is_server: true,
        }
    }

    /// Key of the server transaction an incoming request belongs to
    pub fn from_request(request: &Request) -> Option<Self> {
        let via = request.top_via()?;
        let branch = if via.has_rfc3261_branch() {
            via.branch()?.to_string()
        } else {
            legacy_branch(request)?
        };
        Some(Self::server(&branch, &via.sent_by(), request.method.clone()))
    }

    /// Key of the client transaction that sent `request`
    pub fn for_outgoing(request: &Request) -> Option<Self> {
        let branch = request.top_via()?.branch()?;
        Some(Self::client(branch, request.method.clone()))
    }

    /// Key of the client transaction a response belongs to
    pub fn from_response(response: &Response) -> Option<Self> {
        let branch = response.top_via()?.branch()?;
        let method = response.cseq()?.method.clone();
        Some(Self::client(branch, method))
    }

    /// Same transaction identity with another method; used to find the
    /// INVITE a CANCEL targets
    pub fn with_method(&self, method: Method) -> Self {
        Self {
            method: if self.is_server { fold_ack(method) } else { method },
            ..self.clone()
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.branch.starts_with(LEGACY_PREFIX)
    }

    pub fn is_invite(&self) -> bool {
        self.method == Method::Invite
    }
}

fn fold_ack(method: Method) -> Method {
    if method == Method::Ack {
        Method::Invite
    } else {
        method
    }
}

fn legacy_branch(request: &Request) -> Option<String> {
    let via = request.top_via()?;
    Some(format!(
        "{LEGACY_PREFIX}{}|{}|{}|{}|{}|{}",
        request.uri,
        request.from_tag().unwrap_or_default(),
        request.call_id()?,
        request.cseq()?.seq,
        via.sent_by(),
        via.branch().unwrap_or_default(),
    ))
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        if self.sent_by.is_empty() {
            write!(f, "{}:{}:{}", self.branch, self.method, side)
        } else {
            write!(f, "{}:{}:{}:{}", self.branch, self.method, self.sent_by, side)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::prelude::{Address, RequestBuilder, ResponseBuilder, StatusCode, Uri, Via};

    fn request(method: Method, branch: &str) -> Request {
        RequestBuilder::new(method, Uri::sip("biloxi.com").with_user("bob"))
            .via(Via::new("UDP", "PC33.atlanta.com", Some(5060), branch))
            .from(Address::new(Uri::sip("atlanta.com").with_user("alice")).with_tag("1928301774"))
            .to(Address::new(Uri::sip("biloxi.com").with_user("bob")))
            .call_id("a84b4c76e66710")
            .cseq(314159)
            .build()
    }

    #[test]
    fn test_server_key_folds_ack_onto_invite() {
        let invite = TransactionKey::from_request(&request(Method::Invite, "z9hG4bK776asdhds")).unwrap();
        let ack = TransactionKey::from_request(&request(Method::Ack, "z9hG4bK776asdhds")).unwrap();
        let cancel = TransactionKey::from_request(&request(Method::Cancel, "z9hG4bK776asdhds")).unwrap();
        assert_eq!(invite, ack);
        assert_ne!(invite, cancel);
        assert_eq!(cancel.with_method(Method::Invite), invite);
        assert_eq!(invite.sent_by, "pc33.atlanta.com:5060");
    }

    #[test]
    fn test_response_matches_client_key() {
        let invite = request(Method::Invite, "z9hG4bKAbC");
        let key = TransactionKey::for_outgoing(&invite).unwrap();
        let response = ResponseBuilder::from_request(&invite, StatusCode::RINGING).build();
        assert_eq!(TransactionKey::from_response(&response), Some(key.clone()));
        assert_eq!(key.branch, "z9hg4bkabc");
        assert!(!key.is_server);
    }

    #[test]
    fn test_legacy_key() {
        let invite = TransactionKey::from_request(&request(Method::Invite, "1234")).unwrap();
        let ack = TransactionKey::from_request(&request(Method::Ack, "1234")).unwrap();
        assert!(invite.is_legacy());
        assert_eq!(invite, ack);

        let mut other = request(Method::Invite, "1234");
        other.uri = Uri::sip("elsewhere.com");
        assert_ne!(TransactionKey::from_request(&other).unwrap(), invite);
    }
}
