//! Header helpers shared by dialog creation and target refresh

use sipline_sip_core::prelude::{SipMessage, Uri};

/// URI of the first Contact, the remote target of a dialog
pub fn contact_uri(message: &impl SipMessage) -> Option<Uri> {
    message.contacts().first().map(|contact| contact.uri.clone())
}

/// Route set as seen by the UAC: Record-Route of the response, reversed
/// (RFC 3261 §12.1.2)
pub fn uac_route_set(message: &impl SipMessage) -> Vec<Uri> {
    let mut routes: Vec<Uri> = message.record_routes().into_iter().map(|rr| rr.uri.clone()).collect();
    routes.reverse();
    routes
}

/// Route set as seen by the UAS: Record-Route of the request, in order
/// (RFC 3261 §12.1.1)
pub fn uas_route_set(message: &impl SipMessage) -> Vec<Uri> {
    message.record_routes().into_iter().map(|rr| rr.uri.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::prelude::{Address, Method, Param, RequestBuilder, ResponseBuilder, StatusCode};
    use sipline_sip_core::{Header, HeaderName, HeaderValue};

    fn record_route(host: &str) -> Header {
        Header::new(
            HeaderName::RecordRoute,
            HeaderValue::Address(Address::new(Uri::sip(host).with_param(Param::flag("lr")))),
        )
    }

    #[test]
    fn test_route_set_order() {
        let request = RequestBuilder::new(Method::Invite, Uri::sip("biloxi.com"))
            .header(record_route("p2.example.com"))
            .header(record_route("p1.example.com"))
            .contact(Address::new(Uri::sip("192.0.2.4").with_user("alice")))
            .build();
        let uas: Vec<String> = uas_route_set(&request).iter().map(|u| u.host.clone()).collect();
        assert_eq!(uas, vec!["p2.example.com", "p1.example.com"]);

        let response = ResponseBuilder::from_request(&request, StatusCode::OK).build();
        let uac: Vec<String> = uac_route_set(&response).iter().map(|u| u.host.clone()).collect();
        assert_eq!(uac, vec!["p1.example.com", "p2.example.com"]);

        assert_eq!(contact_uri(&request).map(|u| u.host), Some("192.0.2.4".to_string()));
        assert_eq!(contact_uri(&response), None);
    }
}
