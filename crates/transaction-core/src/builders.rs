//! Requests the transaction layer builds on its own: the ACK for a non-2xx
//! final response (RFC 3261 §17.1.1.3) and CANCEL (§9.1).

use sipline_sip_core::prelude::{HeaderName, Method, Request, RequestBuilder, Response, SipMessage};

use crate::error::{Error, Result};

fn missing(what: &str) -> Error {
    Error::InvalidMessage(format!("INVITE lacks {what}"))
}

/// Starts a request that shares the INVITE's Request-URI, top Via, Call-ID,
/// From, CSeq number and Route set
fn derived_request(invite: &Request, method: Method) -> Result<RequestBuilder> {
    let via = invite.top_via().ok_or_else(|| missing("a Via"))?;
    let from = invite.from_address().ok_or_else(|| missing("From"))?;
    let call_id = invite.call_id().ok_or_else(|| missing("Call-ID"))?;
    let seq = invite.cseq().ok_or_else(|| missing("CSeq"))?.seq;

    let mut builder = RequestBuilder::new(method, invite.uri.clone())
        .via(via.clone())
        .from(from.clone())
        .call_id(call_id)
        .cseq(seq)
        .max_forwards(70);
    for route in invite.headers.get_all(&HeaderName::Route) {
        builder = builder.header(route.clone());
    }
    Ok(builder)
}

/// ACK for a 300-699 response; its To carries the response's tag
pub fn build_ack_for_non_2xx(invite: &Request, response: &Response) -> Result<Request> {
    let to = response
        .to_address()
        .or_else(|| invite.to_address())
        .ok_or_else(|| missing("To"))?;
    Ok(derived_request(invite, Method::Ack)?.to(to.clone()).build())
}

/// CANCEL for a pending INVITE; To is copied without adding a tag
pub fn build_cancel(invite: &Request) -> Result<Request> {
    if invite.method != Method::Invite {
        return Err(Error::InvalidMessage(format!("cannot cancel a {} request", invite.method)));
    }
    let to = invite.to_address().ok_or_else(|| missing("To"))?;
    Ok(derived_request(invite, Method::Cancel)?.to(to.clone()).build())
}
