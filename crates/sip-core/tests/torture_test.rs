//! Parser behavior on messages adapted from the RFC 4475 torture suite and
//! on malformed or hostile input.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sipline_sip_core::prelude::*;
use sipline_sip_core::parse_message;

const WSINV: &str = "OPTIONS sip:user@example.com SIP/2.0\r\n\
To:\r\n sip:user@example.com\r\n\
From    : caller<sip:caller@example.com>;tag  =  323\r\n\
Max-Forwards:  70\r\n\
Call-ID:   wsinv.ndaksdj@192.0.2.1\r\n\
CSeq:\r\n  0\r\n  OPTIONS\r\n\
Via  : SIP  /   2.0\r\n  /UDP\r\n    192.0.2.2;branch=390skdjuw\r\n\
s :\r\n\
NewFangledHeader:   newfangled value\r\n continued newfangled value\r\n\
UnknownHeaderWithUnusualValue: ;;,,;;,;\r\n\
Content-Type: application/sdp\r\n\
Route:\r\n <sip:services.example.com;lr;unknownwith=value;unknown-no-value>\r\n\
v:  SIP  / 2.0  / TCP     spindle.example.com   ;\r\n  branch  =   z9hG4bK9ikj8  ,\r\n SIP  /    2.0   / UDP  192.168.255.111   ; branch=\r\n z9hG4bK30239\r\n\
m:\"Quoted string \\\"\\\"\" <sip:jdrosen@example.com> ; newparam =\r\n      newvalue ;\r\n  secondparam ; q = 0.33\r\n\
\r\n\
v=0\r\n";

#[test]
fn test_whitespace_and_folding_torture() {
    let msg = parse_message(WSINV.as_bytes()).unwrap();
    let req = msg.as_request().unwrap();
    assert_eq!(req.method, Method::Options);

    assert_eq!(msg.to_address().unwrap().uri.to_string(), "sip:user@example.com");
    assert_eq!(msg.from_tag(), Some("323"));
    assert_eq!(msg.max_forwards(), Some(70));
    assert_eq!(msg.call_id(), Some("wsinv.ndaksdj@192.0.2.1"));

    let cseq = msg.cseq().unwrap();
    assert_eq!(cseq.seq, 0);
    assert_eq!(cseq.method, Method::Options);

    let vias = msg.vias();
    assert_eq!(vias.len(), 3);
    assert_eq!(vias[0].transport, "UDP");
    assert_eq!(vias[0].host, "192.0.2.2");
    assert_eq!(vias[1].transport, "TCP");
    assert_eq!(vias[1].branch(), Some("z9hG4bK9ikj8"));
    assert_eq!(vias[2].branch(), Some("z9hG4bK30239"));

    let route = msg.routes();
    assert_eq!(route.len(), 1);
    assert!(route[0].uri.is_loose_route());

    let contact = msg.contacts();
    assert_eq!(contact.len(), 1);
    assert_eq!(contact[0].param("q"), Some("0.33"));
    assert_eq!(contact[0].param("newparam"), Some("newvalue"));

    let folded = msg
        .header(&"NewFangledHeader".parse().unwrap())
        .and_then(|v| v.as_text())
        .unwrap();
    assert_eq!(folded, "newfangled value continued newfangled value");

    // body is everything after the blank line when Content-Length is absent
    assert_eq!(msg.body().as_ref(), b"v=0\r\n");
}

#[test]
fn test_compact_and_long_forms_are_equivalent() {
    let long = "MESSAGE sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/TCP client.atlanta.com:5060;branch=z9hG4bK74bf9\r\n\
From: <sip:alice@atlanta.com>;tag=49583\r\n\
To: <sip:bob@biloxi.com>\r\n\
Call-ID: asd88asd77a@1.2.3.4\r\n\
CSeq: 1 MESSAGE\r\n\
Contact: <sip:alice@client.atlanta.com>;expires=60\r\n\
Subject: lunch\r\n\
Supported: timer, 100rel\r\n\
Event: presence;id=7\r\n\
Allow-Events: presence, dialog\r\n\
Refer-To: <sip:carol@chicago.com>\r\n\
Referred-By: <sip:alice@atlanta.com>\r\n\
Session-Expires: 1800;refresher=uac\r\n\
Content-Type: text/plain\r\n\
Content-Encoding: identity\r\n\
Content-Length: 5\r\n\
\r\n\
hello";
    let compact = "MESSAGE sip:bob@biloxi.com SIP/2.0\r\n\
v: SIP/2.0/TCP client.atlanta.com:5060;branch=z9hG4bK74bf9\r\n\
f: <sip:alice@atlanta.com>;tag=49583\r\n\
t: <sip:bob@biloxi.com>\r\n\
i: asd88asd77a@1.2.3.4\r\n\
CSeq: 1 MESSAGE\r\n\
m: <sip:alice@client.atlanta.com>;expires=60\r\n\
s: lunch\r\n\
k: timer, 100rel\r\n\
o: presence;id=7\r\n\
u: presence, dialog\r\n\
r: <sip:carol@chicago.com>\r\n\
b: <sip:alice@atlanta.com>\r\n\
x: 1800;refresher=uac\r\n\
c: text/plain\r\n\
e: identity\r\n\
l: 5\r\n\
\r\n\
hello";

    let a = parse_message(long.as_bytes()).unwrap();
    let b = parse_message(compact.as_bytes()).unwrap();
    assert_eq!(a, b);
    assert_eq!(b.to_bytes(), a.to_bytes());
    assert!(String::from_utf8_lossy(&b.to_bytes()).contains("Call-ID: asd88asd77a@1.2.3.4\r\n"));
    assert_eq!(b.contacts().len(), 1);
    assert_eq!(b.header(&HeaderName::SessionExpires).unwrap().to_string(), "1800;refresher=uac");
    assert_eq!(b.header(&HeaderName::ReferredBy).and_then(|v| v.as_address()).unwrap().uri.host, "atlanta.com");
}

#[test]
fn test_header_names_are_case_insensitive() {
    let raw = "BYE sip:bob@biloxi.com SIP/2.0\r\n\
vIa: SIP/2.0/UDP h;branch=z9hG4bKa\r\n\
FROM: <sip:a@h>;tag=1\r\n\
tO: <sip:b@h>;tag=2\r\n\
call-id: x\r\n\
cseq: 2 BYE\r\n\
CONTENT-LENGTH: 0\r\n\r\n";
    let msg = parse_message(raw.as_bytes()).unwrap();
    assert!(msg.validate_mandatory().is_ok());
    assert_eq!(msg.to_tag(), Some("2"));
    assert_eq!(msg.content_length(), Some(0));
}

#[test]
fn test_unknown_method_and_scheme() {
    let raw = "NEWMETHOD tel:+1-201-555-0123 SIP/2.0\r\n\
Via: SIP/2.0/UDP h;branch=z9hG4bKa\r\n\
Call-ID: x\r\n\
CSeq: 8 NEWMETHOD\r\n\
Content-Length: 0\r\n\r\n";
    let msg = parse_message(raw.as_bytes()).unwrap();
    let req = msg.as_request().unwrap();
    assert_eq!(req.method, Method::Extension("NEWMETHOD".into()));
    assert_eq!(req.uri.scheme, Scheme::Tel);
    assert_eq!(msg.cseq().unwrap().method, req.method);
}

#[test]
fn test_bad_start_lines() {
    for raw in [
        "INVITE sip:bob@biloxi.com SIP/7.0\r\n\r\n",
        "INVITE  SIP/2.0\r\n\r\n",
        "SIP/2.0 2000 OK\r\n\r\n",
        "SIP/2.0 099 Low\r\n\r\n",
        "INVITE bob SIP/2.0\r\n\r\n",
    ] {
        let err = parse_message(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidStartLine(_)), "{raw:?} gave {err:?}");
    }
}

#[test]
fn test_non_ascii_start_lines_are_rejected() {
    let accented = parse_message("SIP\u{e9} 200 OK\r\nCall-ID: x\r\n\r\n".as_bytes()).unwrap_err();
    assert!(matches!(accented, Error::InvalidStartLine(_)), "{accented:?}");

    let garbage = parse_message(b"\xff\xff 200 OK\r\n\r\n").unwrap_err();
    assert_eq!(garbage, Error::InvalidUtf8 { offset: 0 });
    assert_eq!(garbage.kind(), ErrorKind::Syntax);
}

#[test]
fn test_invalid_utf8_in_headers_is_not_rewritten() {
    let mut raw = b"OPTIONS sip:bob@biloxi.com SIP/2.0\r\nSubject: caf".to_vec();
    raw.extend_from_slice(b"\xe9\r\nContent-Length: 0\r\n\r\n");
    let err = parse_message(&raw).unwrap_err();
    assert_eq!(err, Error::InvalidUtf8 { offset: 48 });

    // the body is opaque bytes and may hold anything
    let mut with_body = b"MESSAGE sip:bob@biloxi.com SIP/2.0\r\nContent-Length: 2\r\n\r\n".to_vec();
    with_body.extend_from_slice(b"\xff\xfe");
    let msg = parse_message(&with_body).unwrap();
    assert_eq!(msg.body().as_ref(), b"\xff\xfe");
}

#[test]
fn test_malformed_header_default_keeps_raw() {
    let raw = "OPTIONS sip:h SIP/2.0\r\n\
Via: SIP/2.0/UDP h;branch=z9hG4bKa\r\n\
Max-Forwards: seventy\r\n\
Call-ID: x\r\n\
CSeq: 1 OPTIONS\r\n\
Content-Length: 0\r\n\r\n";
    let msg = parse_message(raw.as_bytes()).unwrap();
    let value = msg.header(&HeaderName::MaxForwards).unwrap();
    assert!(value.is_raw());
    assert_eq!(value.as_text(), Some("seventy"));
    assert_eq!(msg.max_forwards(), None);
}

#[test]
fn test_listener_decides_recovery() {
    let raw = "OPTIONS sip:h SIP/2.0\r\n\
Via: SIP/2.0/UDP h;branch=z9hG4bKa\r\n\
Expires: soon\r\n\
CSeq: lots OPTIONS\r\n\
Call-ID: x\r\n\
Content-Length: 0\r\n\r\n";

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let parser = MessageParser::default().with_listener(move |ctx: &HeaderErrorContext<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
        if ctx.name.eq_ignore_ascii_case("CSeq") {
            Recovery::Abort
        } else {
            Recovery::Skip
        }
    });
    let err = parser.parse(raw.as_bytes()).unwrap_err();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    match err {
        Error::InvalidHeader { name, .. } => assert_eq!(name, "CSeq"),
        other => panic!("unexpected error {other:?}"),
    }

    let lenient = MessageParser::default().with_listener(|_: &HeaderErrorContext<'_>| Recovery::Skip);
    let msg = lenient.parse(raw.as_bytes()).unwrap();
    assert!(!msg.headers().contains(&HeaderName::Expires));
    assert!(!msg.headers().contains(&HeaderName::CSeq));
}

#[test]
fn test_default_policy_abort() {
    let parser = MessageParser::new(ParserConfig::default().with_default_recovery(Recovery::Abort));
    let raw = b"OPTIONS sip:h SIP/2.0\r\nMax-Forwards: x\r\n\r\n";
    let err = parser.parse(raw).unwrap_err();
    assert!(matches!(err, Error::InvalidHeader { .. }));
    assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn test_content_length_rules() {
    // declared length beyond what arrived
    let short = b"OPTIONS sip:h SIP/2.0\r\nContent-Length: 10\r\n\r\nabc";
    assert!(matches!(
        parse_message(short),
        Err(Error::ContentLengthMismatch { declared: 10, available: 3 })
    ));

    // surplus bytes after the declared body are ignored
    let long = b"OPTIONS sip:h SIP/2.0\r\nContent-Length: 3\r\n\r\nabcdef";
    assert_eq!(parse_message(long).unwrap().body().as_ref(), b"abc");

    // conflicting values
    let dup = b"OPTIONS sip:h SIP/2.0\r\nContent-Length: 3\r\nl: 4\r\n\r\nabcd";
    assert!(matches!(parse_message(dup), Err(Error::DuplicateHeader(_))));

    // no Content-Length: compute mode on and off
    let missing = b"OPTIONS sip:h SIP/2.0\r\nCall-ID: x\r\n\r\nbody";
    assert_eq!(parse_message(missing).unwrap().body().as_ref(), b"body");
    let strict = MessageParser::new(ParserConfig::default().with_compute_content_length(false));
    assert!(strict.parse(missing).unwrap().body().is_empty());
}

#[test]
fn test_size_limits() {
    let parser = MessageParser::new(ParserConfig::default().with_max_message_size(256));
    let mut raw = String::from("OPTIONS sip:h SIP/2.0\r\nSubject: ");
    raw.push_str(&"x".repeat(300));
    raw.push_str("\r\n\r\n");
    assert!(matches!(
        parser.parse(raw.as_bytes()),
        Err(Error::MessageTooLarge { limit: 256, .. })
    ));

    // a small datagram announcing a huge body
    let lying = b"OPTIONS sip:h SIP/2.0\r\nContent-Length: 100000\r\n\r\n";
    assert!(matches!(parser.parse(lying), Err(Error::MessageTooLarge { .. })));

    let parser = MessageParser::new(ParserConfig::default().with_max_header_count(5));
    let mut raw = String::from("OPTIONS sip:h SIP/2.0\r\n");
    for i in 0..6 {
        raw.push_str(&format!("X-H{i}: v\r\n"));
    }
    raw.push_str("\r\n");
    assert!(matches!(parser.parse(raw.as_bytes()), Err(Error::TooManyHeaders(5))));
}

#[test]
fn test_leading_crlf_and_lf_only_messages() {
    let raw = b"\r\n\r\nSIP/2.0 180 Ringing\nVia: SIP/2.0/UDP h;branch=z9hG4bKa\nCall-ID: x\nCSeq: 1 INVITE\nContent-Length: 0\n\n";
    let msg = parse_message(raw).unwrap();
    let resp = msg.as_response().unwrap();
    assert_eq!(resp.status, StatusCode::RINGING);
    assert_eq!(resp.reason, "Ringing");
    assert_eq!(msg.call_id(), Some("x"));
}

#[test]
fn test_stream_framing() {
    let first = b"OPTIONS sip:h SIP/2.0\r\nCall-ID: one\r\nContent-Length: 2\r\n\r\nhi";
    let second = b"SIP/2.0 200 OK\r\nCall-ID: two\r\nContent-Length: 0\r\n\r\n";

    let mut stream = IncrementalParser::new(MessageParser::default());
    stream.feed(b"\r\n\r\n");
    stream.feed(&first[..20]);
    assert!(stream.next_message().unwrap().is_none());
    stream.feed(&first[20..]);
    stream.feed(second);

    let a = stream.next_message().unwrap().unwrap();
    assert_eq!(a.call_id(), Some("one"));
    assert_eq!(a.body().as_ref(), b"hi");
    let b = stream.next_message().unwrap().unwrap();
    assert_eq!(b.call_id(), Some("two"));
    assert!(stream.next_message().unwrap().is_none());
    assert_eq!(stream.buffered(), 0);
}

#[test]
fn test_stream_without_content_length_has_empty_body() {
    let mut stream = IncrementalParser::new(MessageParser::default());
    stream.feed(b"OPTIONS sip:h SIP/2.0\r\nCall-ID: a\r\n\r\nOPTIONS sip:h SIP/2.0\r\nCall-ID: b\r\n\r\n");
    assert_eq!(stream.next_message().unwrap().unwrap().call_id(), Some("a"));
    assert_eq!(stream.next_message().unwrap().unwrap().call_id(), Some("b"));
}

#[test]
fn test_stream_rejects_runaway_header_block() {
    let parser = MessageParser::new(ParserConfig::default().with_max_message_size(128));
    let mut stream = IncrementalParser::new(parser);
    stream.feed(b"OPTIONS sip:h SIP/2.0\r\n");
    for _ in 0..20 {
        stream.feed(b"X-Filler: aaaaaaaaaa\r\n");
    }
    assert!(matches!(stream.next_message(), Err(Error::MessageTooLarge { .. })));
    assert_eq!(stream.buffered(), 0);
}
