//! The dialog state and the construction of requests within it

use std::net::SocketAddr;

use sipline_sip_core::prelude::{Address, Method, Request, RequestBuilder, Response, SipMessage, Uri};
use tracing::debug;

use super::dialog_id::DialogId;
use super::dialog_state::DialogState;
use super::dialog_utils::{contact_uri, uac_route_set, uas_route_set};
use crate::errors::{DialogError, DialogResult};

/// CSeq numbers must stay below 2^31 (RFC 3261 §8.1.1.5)
pub const MAX_CSEQ: u32 = (1 << 31) - 1;

/// A SIP dialog as defined in RFC 3261 §12
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,

    pub state: DialogState,

    /// Our From/To value, tag included
    pub local: Address,

    /// The peer's From/To value, tag included
    pub remote: Address,

    /// CSeq of the last request we sent; zero until we send one as UAS
    pub local_cseq: u32,

    /// CSeq of the last request the peer sent; `None` while empty
    pub remote_cseq: Option<u32>,

    /// CSeq of the last INVITE we sent, which its ACK repeats
    pub invite_cseq: Option<u32>,

    /// Where requests within the dialog are addressed
    pub remote_target: Uri,

    /// Proxies every request within the dialog traverses, next hop first
    pub route_set: Vec<Uri>,

    /// The dialog was created over SIPS
    pub secure: bool,

    /// We sent the dialog-creating request
    pub is_initiator: bool,

    /// Method of the request that created the dialog
    pub method: Method,

    /// A received BYE ends the dialog. Subscription dialogs keep running
    /// when the call sharing their Call-ID hangs up.
    pub terminate_on_bye: bool,

    /// Peer address used when neither the route set nor the remote target
    /// is an IP literal
    pub remote_addr: SocketAddr,
}

impl Dialog {
    /// Dialog of the UAC, created by a response with a To tag
    pub fn new_uac(request: &Request, response: &Response, remote_addr: SocketAddr) -> DialogResult<Self> {
        let id = DialogId::from_incoming_response(response)
            .ok_or_else(|| DialogError::protocol_error("response lacks Call-ID or tags"))?;
        let state = if response.status.is_success() {
            DialogState::Confirmed
        } else if response.status.is_provisional() {
            DialogState::Early
        } else {
            return Err(DialogError::protocol_error(format!(
                "{} does not create a dialog",
                response.status.as_u16()
            )));
        };
        let local_cseq = request
            .cseq()
            .map(|c| c.seq)
            .ok_or_else(|| DialogError::protocol_error("request lacks CSeq"))?;
        let local = request
            .from_address()
            .cloned()
            .ok_or_else(|| DialogError::protocol_error("request lacks From"))?;
        let remote = response
            .to_address()
            .cloned()
            .ok_or_else(|| DialogError::protocol_error("response lacks To"))?;

        Ok(Self {
            id,
            state,
            secure: request.uri.is_secure(),
            remote_target: contact_uri(response).unwrap_or_else(|| request.uri.clone()),
            route_set: uac_route_set(response),
            local,
            remote,
            local_cseq,
            remote_cseq: None,
            invite_cseq: (request.method == Method::Invite).then_some(local_cseq),
            is_initiator: true,
            method: request.method.clone(),
            terminate_on_bye: true,
            remote_addr,
        })
    }

    /// Dialog of the UAS, created when it sends a 1xx or 2xx with a To tag
    pub fn new_uas(request: &Request, response: &Response, remote_addr: SocketAddr) -> DialogResult<Self> {
        let id = DialogId::from_outgoing_response(response)
            .ok_or_else(|| DialogError::protocol_error("response lacks Call-ID or tags"))?;
        let state = if response.status.is_success() {
            DialogState::Confirmed
        } else {
            DialogState::Early
        };
        let remote_cseq = request
            .cseq()
            .map(|c| c.seq)
            .ok_or_else(|| DialogError::protocol_error("request lacks CSeq"))?;
        let local = response
            .to_address()
            .cloned()
            .ok_or_else(|| DialogError::protocol_error("response lacks To"))?;
        let remote = request
            .from_address()
            .cloned()
            .ok_or_else(|| DialogError::protocol_error("request lacks From"))?;

        Ok(Self {
            id,
            state,
            secure: request.uri.is_secure(),
            remote_target: contact_uri(request)
                .ok_or_else(|| DialogError::protocol_error("dialog-creating request lacks Contact"))?,
            route_set: uas_route_set(request),
            local,
            remote,
            local_cseq: 0,
            remote_cseq: Some(remote_cseq),
            invite_cseq: None,
            is_initiator: false,
            method: request.method.clone(),
            terminate_on_bye: true,
            remote_addr,
        })
    }

    /// Subscription dialog created by a NOTIFY that answers our SUBSCRIBE
    /// (RFC 6665 §4.1.2.4). The NOTIFY still has to pass
    /// [`Dialog::validate_remote_cseq`].
    pub fn from_notify(subscribe: &Request, notify: &Request, remote_addr: SocketAddr) -> DialogResult<Self> {
        let id = DialogId::from_incoming_request(notify)
            .ok_or_else(|| DialogError::protocol_error("NOTIFY lacks Call-ID or tags"))?;
        let local_cseq = subscribe
            .cseq()
            .map(|c| c.seq)
            .ok_or_else(|| DialogError::protocol_error("SUBSCRIBE lacks CSeq"))?;
        let local = subscribe
            .from_address()
            .cloned()
            .ok_or_else(|| DialogError::protocol_error("SUBSCRIBE lacks From"))?;
        let remote = notify
            .from_address()
            .cloned()
            .ok_or_else(|| DialogError::protocol_error("NOTIFY lacks From"))?;

        Ok(Self {
            id,
            state: DialogState::Confirmed,
            secure: subscribe.uri.is_secure(),
            remote_target: contact_uri(notify)
                .ok_or_else(|| DialogError::protocol_error("NOTIFY lacks Contact"))?,
            route_set: uas_route_set(notify),
            local,
            remote,
            local_cseq,
            remote_cseq: None,
            invite_cseq: None,
            is_initiator: true,
            method: subscribe.method.clone(),
            terminate_on_bye: true,
            remote_addr,
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }

    pub fn local_uri(&self) -> &Uri {
        &self.local.uri
    }

    pub fn remote_uri(&self) -> &Uri {
        &self.remote.uri
    }

    /// Early to Confirmed; returns whether the state changed
    pub fn confirm(&mut self) -> bool {
        if self.state == DialogState::Early {
            self.state = DialogState::Confirmed;
            true
        } else {
            false
        }
    }

    pub fn terminate(&mut self) {
        self.state = DialogState::Terminated;
    }

    /// Checks the CSeq of a request received within the dialog and records
    /// it. ACK and CANCEL reuse the CSeq of the request they refer to and
    /// are not checked.
    pub fn validate_remote_cseq(&mut self, request: &Request) -> DialogResult<()> {
        if matches!(request.method, Method::Ack | Method::Cancel) {
            return Ok(());
        }
        let received = request
            .cseq()
            .map(|c| c.seq)
            .ok_or_else(|| DialogError::protocol_error("request lacks CSeq"))?;
        if received > MAX_CSEQ {
            return Err(DialogError::protocol_error(format!("CSeq {received} is not below 2^31")));
        }
        if let Some(last) = self.remote_cseq {
            if received <= last {
                return Err(DialogError::CSeqOutOfOrder { received, last });
            }
        }
        self.remote_cseq = Some(received);
        Ok(())
    }

    /// Takes the remote target from the first Contact; returns whether it
    /// changed
    pub fn update_remote_target(&mut self, message: &impl SipMessage) -> bool {
        match contact_uri(message) {
            Some(target) if target != self.remote_target => {
                debug!(dialog = %self.id, %target, "Remote target refreshed");
                self.remote_target = target;
                true
            }
            _ => false,
        }
    }

    /// Applies a 1xx or 2xx to the request that created this dialog. The
    /// route set is only fixed once the dialog is confirmed (RFC 3261
    /// §13.2.2.4).
    pub fn update_from_response(&mut self, response: &Response) {
        if self.state == DialogState::Early {
            self.route_set = uac_route_set(response);
            if response.status.is_success() {
                self.confirm();
            }
        }
        self.update_remote_target(response);
    }

    /// Builds the next request within the dialog (RFC 3261 §12.2.1.1).
    ///
    /// The local CSeq is incremented. ACK and CANCEL are built elsewhere
    /// since they reuse the CSeq of an earlier request.
    pub fn create_request(&mut self, method: Method) -> DialogResult<Request> {
        if matches!(method, Method::Ack | Method::Cancel) {
            return Err(DialogError::protocol_error(format!("{method} does not take a new CSeq")));
        }
        if self.is_terminated() {
            return Err(DialogError::InvalidState {
                id: self.id.clone(),
                state: self.state,
                message: format!("cannot send {method}"),
            });
        }
        let cseq = self
            .local_cseq
            .checked_add(1)
            .filter(|seq| *seq <= MAX_CSEQ)
            .ok_or_else(|| DialogError::CSeqExhausted(self.id.clone()))?;
        self.local_cseq = cseq;
        if method == Method::Invite {
            self.invite_cseq = Some(self.local_cseq);
        }
        Ok(self.build_request(method, self.local_cseq))
    }

    /// ACK for a 2xx to the INVITE sent with `cseq`
    pub fn create_ack(&self, cseq: u32) -> Request {
        self.build_request(Method::Ack, cseq)
    }

    fn build_request(&self, method: Method, cseq: u32) -> Request {
        let (uri, routes) = self.request_target();
        let mut from = self.local.clone();
        from.set_tag(self.id.local_tag.clone());
        let mut to = self.remote.clone();
        to.set_tag(self.id.remote_tag.clone());

        let mut builder = RequestBuilder::new(method, uri)
            .from(from)
            .to(to)
            .call_id(self.id.call_id.clone())
            .cseq(cseq)
            .max_forwards(70);
        for route in routes {
            builder = builder.route(Address::new(route));
        }
        builder.build()
    }

    /// Request-URI and Route values. With a strict router first in the route
    /// set, it becomes the Request-URI and the remote target is appended as
    /// the last Route.
    fn request_target(&self) -> (Uri, Vec<Uri>) {
        match self.route_set.split_first() {
            None => (self.remote_target.clone(), Vec::new()),
            Some((first, _)) if first.is_loose_route() => (self.remote_target.clone(), self.route_set.clone()),
            Some((first, rest)) => {
                let mut uri = first.clone();
                uri.headers = None;
                let mut routes = rest.to_vec();
                routes.push(self.remote_target.clone());
                (uri, routes)
            }
        }
    }

    /// Next hop for requests within the dialog
    pub fn destination(&self) -> SocketAddr {
        self.route_set
            .first()
            .unwrap_or(&self.remote_target)
            .socket_addr()
            .unwrap_or(self.remote_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::prelude::{Param, ResponseBuilder, StatusCode};
    use sipline_sip_core::{Header, HeaderName, HeaderValue};

    const ALICE_ADDR: &str = "192.0.2.1:5060";

    fn invite() -> Request {
        RequestBuilder::new(Method::Invite, Uri::sip("biloxi.com").with_user("bob"))
            .from(Address::new(Uri::sip("atlanta.com").with_user("alice")).with_tag("1928301774"))
            .to(Address::new(Uri::sip("biloxi.com").with_user("bob")))
            .call_id("a84b4c76e66710")
            .cseq(314159)
            .contact(Address::new(Uri::sip("192.0.2.1").with_user("alice")))
            .build()
    }

    fn answer(request: &Request, status: StatusCode, contact_host: &str) -> Response {
        ResponseBuilder::from_request(request, status)
            .to_tag("a6c85cf")
            .contact(Address::new(Uri::sip(contact_host).with_user("bob")))
            .build()
    }

    fn record_route(uri: Uri) -> Header {
        Header::new(HeaderName::RecordRoute, HeaderValue::Address(Address::new(uri)))
    }

    #[test]
    fn test_uac_dialog_from_2xx() {
        let request = invite();
        let dialog = Dialog::new_uac(&request, &answer(&request, StatusCode::OK, "192.0.2.4"), ALICE_ADDR.parse().unwrap())
            .unwrap();
        assert_eq!(dialog.state, DialogState::Confirmed);
        assert_eq!(dialog.id, DialogId::new("a84b4c76e66710", "1928301774", "a6c85cf"));
        assert_eq!(dialog.local_cseq, 314159);
        assert_eq!(dialog.remote_cseq, None);
        assert_eq!(dialog.remote_target.host, "192.0.2.4");
        assert!(dialog.is_initiator);
        assert_eq!(dialog.destination(), "192.0.2.4:5060".parse().unwrap());
    }

    #[test]
    fn test_uac_dialog_early_then_confirmed() {
        let request = invite();
        let mut dialog = Dialog::new_uac(
            &request,
            &answer(&request, StatusCode::RINGING, "192.0.2.4"),
            ALICE_ADDR.parse().unwrap(),
        )
        .unwrap();
        assert_eq!(dialog.state, DialogState::Early);

        dialog.update_from_response(&answer(&request, StatusCode::OK, "192.0.2.5"));
        assert_eq!(dialog.state, DialogState::Confirmed);
        assert_eq!(dialog.remote_target.host, "192.0.2.5");

        let busy = ResponseBuilder::from_request(&request, StatusCode::BUSY_HERE).to_tag("x").build();
        assert!(Dialog::new_uac(&request, &busy, ALICE_ADDR.parse().unwrap()).is_err());
    }

    #[test]
    fn test_uas_dialog() {
        let request = invite();
        let dialog = Dialog::new_uas(&request, &answer(&request, StatusCode::OK, "192.0.2.4"), ALICE_ADDR.parse().unwrap())
            .unwrap();
        assert_eq!(dialog.id, DialogId::new("a84b4c76e66710", "a6c85cf", "1928301774"));
        assert_eq!(dialog.remote_cseq, Some(314159));
        assert_eq!(dialog.local_cseq, 0);
        assert_eq!(dialog.remote_target.host, "192.0.2.1");
        assert!(!dialog.is_initiator);
    }

    #[test]
    fn test_remote_cseq_must_increase() {
        let request = invite();
        let mut dialog = Dialog::new_uas(&request, &answer(&request, StatusCode::OK, "192.0.2.4"), ALICE_ADDR.parse().unwrap())
            .unwrap();

        let stale = RequestBuilder::new(Method::Bye, Uri::sip("192.0.2.4")).cseq(314159).build();
        assert!(matches!(
            dialog.validate_remote_cseq(&stale),
            Err(DialogError::CSeqOutOfOrder { received: 314159, last: 314159 })
        ));
        assert_eq!(dialog.remote_cseq, Some(314159));

        let ack = RequestBuilder::new(Method::Ack, Uri::sip("192.0.2.4")).cseq(314159).build();
        assert!(dialog.validate_remote_cseq(&ack).is_ok());

        let bye = RequestBuilder::new(Method::Bye, Uri::sip("192.0.2.4")).cseq(314160).build();
        assert!(dialog.validate_remote_cseq(&bye).is_ok());
        assert_eq!(dialog.remote_cseq, Some(314160));
        assert!(dialog.validate_remote_cseq(&bye).is_err());
    }

    #[test]
    fn test_cseq_stays_below_2_pow_31() {
        let request = invite();
        let mut dialog = Dialog::new_uac(&request, &answer(&request, StatusCode::OK, "192.0.2.4"), ALICE_ADDR.parse().unwrap())
            .unwrap();
        dialog.local_cseq = MAX_CSEQ - 1;
        assert!(dialog.create_request(Method::Info).is_ok());
        assert_eq!(dialog.local_cseq, MAX_CSEQ);
        assert!(matches!(dialog.create_request(Method::Bye), Err(DialogError::CSeqExhausted(_))));
        assert_eq!(dialog.local_cseq, MAX_CSEQ);

        dialog.local_cseq = u32::MAX;
        assert!(matches!(dialog.create_request(Method::Bye), Err(DialogError::CSeqExhausted(_))));

        let huge = RequestBuilder::new(Method::Info, Uri::sip("192.0.2.4")).cseq(u32::MAX).build();
        let err = dialog.validate_remote_cseq(&huge).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(dialog.remote_cseq, None);
    }

    #[test]
    fn test_local_cseq_increments() {
        let request = invite();
        let mut dialog = Dialog::new_uac(&request, &answer(&request, StatusCode::OK, "192.0.2.4"), ALICE_ADDR.parse().unwrap())
            .unwrap();
        let first = dialog.create_request(Method::Info).unwrap();
        let second = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(first.cseq().map(|c| c.seq), Some(314160));
        assert_eq!(second.cseq().map(|c| c.seq), Some(314161));
        assert_eq!(second.to_tag(), Some("a6c85cf"));
        assert_eq!(second.from_tag(), Some("1928301774"));
        assert_eq!(second.uri.host, "192.0.2.4");
        assert!(dialog.create_request(Method::Ack).is_err());

        let ack = dialog.create_ack(314159);
        assert_eq!(ack.cseq().map(|c| (c.seq, c.method.clone())), Some((314159, Method::Ack)));

        dialog.terminate();
        assert!(matches!(
            dialog.create_request(Method::Bye),
            Err(DialogError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_loose_routing() {
        let request = invite();
        let response = ResponseBuilder::from_request(&request, StatusCode::OK)
            .to_tag("a6c85cf")
            .contact(Address::new(Uri::sip("192.0.2.4").with_user("bob")))
            .header(record_route(Uri::sip("192.0.2.20").with_param(Param::flag("lr"))))
            .header(record_route(Uri::sip("192.0.2.10").with_param(Param::flag("lr"))))
            .build();
        let mut dialog = Dialog::new_uac(&request, &response, ALICE_ADDR.parse().unwrap()).unwrap();

        let bye = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(bye.uri.host, "192.0.2.4");
        let routes: Vec<&str> = bye.routes().iter().map(|r| r.uri.host.as_str()).collect();
        assert_eq!(routes, vec!["192.0.2.10", "192.0.2.20"]);
        assert_eq!(dialog.destination(), "192.0.2.10:5060".parse().unwrap());
    }

    #[test]
    fn test_strict_routing() {
        let request = invite();
        let response = ResponseBuilder::from_request(&request, StatusCode::OK)
            .to_tag("a6c85cf")
            .contact(Address::new(Uri::sip("192.0.2.4").with_user("bob")))
            .header(record_route(Uri::sip("192.0.2.20").with_param(Param::flag("lr"))))
            .header(record_route(Uri::sip("192.0.2.10")))
            .build();
        let mut dialog = Dialog::new_uac(&request, &response, ALICE_ADDR.parse().unwrap()).unwrap();

        let bye = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(bye.uri.host, "192.0.2.10");
        let routes: Vec<String> = bye.routes().iter().map(|r| r.uri.host.clone()).collect();
        assert_eq!(routes, vec!["192.0.2.20", "192.0.2.4"]);
    }

    #[test]
    fn test_target_refresh() {
        let request = invite();
        let mut dialog = Dialog::new_uac(&request, &answer(&request, StatusCode::OK, "192.0.2.4"), ALICE_ADDR.parse().unwrap())
            .unwrap();
        let reinvite = dialog.create_request(Method::Invite).unwrap();
        let refreshed = answer(&reinvite, StatusCode::OK, "192.0.2.99");
        assert!(dialog.update_remote_target(&refreshed));
        assert!(!dialog.update_remote_target(&refreshed));
        assert_eq!(dialog.create_request(Method::Bye).unwrap().uri.host, "192.0.2.99");
    }
}
