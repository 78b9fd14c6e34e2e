//! Transaction state machines driven over the in-memory network.
//!
//! Timer scenarios run with a paused clock: tokio advances time whenever
//! every task is idle, so a 32 second timeout takes no wall time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sipline_sip_core::prelude::{
    generate_tag, Address, ErrorKind, Header, HeaderName, HeaderValue, Message, Method, Request, RequestBuilder,
    ResponseBuilder, SipMessage, StatusCode, Uri, Via,
};
use sipline_sip_transport::{bind_tcp, MemoryNetwork, MemoryTransport, Transport, TransportEvent};
use sipline_transaction_core::{
    TimerType, TransactionConfig, TransactionEvent, TransactionKey, TransactionManager, TransactionState,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const ALICE: &str = "127.0.0.1:5060";
const BOB: &str = "127.0.0.1:5070";

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn manager_at(
    network: &MemoryNetwork,
    at: &str,
    reliable: bool,
) -> (TransactionManager, mpsc::Receiver<TransactionEvent>) {
    let (transport, rx) = network.bind(addr(at), reliable).unwrap();
    TransactionManager::new(Arc::new(transport), rx, TransactionConfig::default())
}

fn request(method: Method, branch: &str) -> Request {
    RequestBuilder::new(method, Uri::sip("127.0.0.1").with_user("bob").with_port(5070))
        .via(Via::new("UDP", "127.0.0.1", Some(5060), branch))
        .from(Address::new(Uri::sip("127.0.0.1").with_user("alice")).with_tag("a73kszlfl"))
        .to(Address::new(Uri::sip("127.0.0.1").with_user("bob")))
        .call_id("txn-test@127.0.0.1")
        .cseq(1)
        .build()
}

fn response(to: &Request, status: StatusCode, tag: &str) -> Message {
    ResponseBuilder::from_request(to, status).to_tag(tag).build().into()
}

async fn next_event<F>(events: &mut mpsc::Receiver<TransactionEvent>, mut pred: F) -> TransactionEvent
where
    F: FnMut(&TransactionEvent) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(300), events.recv())
            .await
            .expect("timed out waiting for a transaction event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

async fn next_message(rx: &mut mpsc::Receiver<TransportEvent>) -> Message {
    loop {
        let event = timeout(Duration::from_secs(300), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("transport channel closed");
        if let TransportEvent::MessageReceived { message, .. } = event {
            return message;
        }
    }
}

fn drain(rx: &mut mpsc::Receiver<TransportEvent>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TransportEvent::MessageReceived { message, .. } = event {
            messages.push(message);
        }
    }
    messages
}

fn count_requests(messages: &[Message], method: Method) -> usize {
    messages
        .iter()
        .filter(|m| m.as_request().is_some_and(|r| r.method == method))
        .count()
}

fn count_responses(messages: &[Message], status: StatusCode) -> usize {
    messages
        .iter()
        .filter(|m| m.as_response().is_some_and(|r| r.status == status))
        .count()
}

fn raw_peer(network: &MemoryNetwork, at: &str, reliable: bool) -> (MemoryTransport, mpsc::Receiver<TransportEvent>) {
    network.bind(addr(at), reliable).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_timer_a_doubles_until_timer_b() {
    sipline_infra_common::setup_test_logging();
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, ALICE, false);
    let (_bob, mut bob_rx) = raw_peer(&network, BOB, false);

    let key = manager
        .send_request(request(Method::Invite, "z9hG4bKtimera"), addr(BOB))
        .await
        .unwrap();

    let event = next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTimeout { .. })).await;
    match event {
        TransactionEvent::TransactionTimeout { transaction_id, timer } => {
            assert_eq!(transaction_id, key);
            assert_eq!(timer, TimerType::B);
        }
        _ => unreachable!(),
    }

    // sent at 0, 0.5, 1.5, 3.5, 7.5, 15.5 and 31.5 seconds; B fires at 32
    let received = drain(&mut bob_rx);
    assert_eq!(count_requests(&received, Method::Invite), 7);

    next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;
    assert_eq!(manager.transaction_state(&key), Some(TransactionState::Terminated));
}

#[tokio::test(start_paused = true)]
async fn test_timer_e_caps_at_t2_until_timer_f() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, ALICE, false);
    let (_bob, mut bob_rx) = raw_peer(&network, BOB, false);

    manager
        .send_request(request(Method::Options, "z9hG4bKtimere"), addr(BOB))
        .await
        .unwrap();

    let event = next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTimeout { .. })).await;
    assert!(matches!(event, TransactionEvent::TransactionTimeout { timer: TimerType::F, .. }));

    // 0, 0.5, 1.5, 3.5, then every 4 seconds up to 31.5
    let received = drain(&mut bob_rx);
    assert_eq!(count_requests(&received, Method::Options), 11);
}

#[tokio::test(start_paused = true)]
async fn test_reliable_transport_sends_once() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, ALICE, true);
    let (_bob, mut bob_rx) = raw_peer(&network, BOB, true);

    manager
        .send_request(request(Method::Invite, "z9hG4bKreliable"), addr(BOB))
        .await
        .unwrap();
    next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTimeout { timer: TimerType::B, .. })).await;

    assert_eq!(count_requests(&drain(&mut bob_rx), Method::Invite), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_2xx_is_acknowledged_by_the_transaction() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, ALICE, false);
    let (bob, mut bob_rx) = raw_peer(&network, BOB, false);

    let key = manager
        .send_request(request(Method::Invite, "z9hG4bKbusy"), addr(BOB))
        .await
        .unwrap();
    let invite = next_message(&mut bob_rx).await.into_request().unwrap();

    let busy = response(&invite, StatusCode::BUSY_HERE, "bobtag");
    bob.send_message(busy.clone(), addr(ALICE)).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, TransactionEvent::FailureResponse { .. })).await;
    assert_eq!(event.transaction_id(), Some(&key));

    let ack = loop {
        let message = next_message(&mut bob_rx).await;
        if let Some(request) = message.into_request().filter(|r| r.method == Method::Ack) {
            break request;
        }
    };
    assert_eq!(ack.top_via().and_then(|v| v.branch()), Some("z9hG4bKbusy"));
    assert_eq!(ack.to_tag(), Some("bobtag"));
    assert_eq!(manager.transaction_state(&key), Some(TransactionState::Completed));

    // a retransmitted 486 is answered with the same ACK and not reported again
    bob.send_message(busy, addr(ALICE)).await.unwrap();
    let again = next_message(&mut bob_rx).await.into_request().unwrap();
    assert_eq!(again.method, Method::Ack);

    let event = next_event(&mut events, |e| {
        matches!(e, TransactionEvent::FailureResponse { .. } | TransactionEvent::TransactionTerminated { .. })
    })
    .await;
    assert!(matches!(event, TransactionEvent::TransactionTerminated { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_2xx_terminates_invite_client_and_retransmissions_are_stray() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, ALICE, false);
    let (bob, mut bob_rx) = raw_peer(&network, BOB, false);

    let key = manager
        .send_request(request(Method::Invite, "z9hG4bKok"), addr(BOB))
        .await
        .unwrap();
    let invite = next_message(&mut bob_rx).await.into_request().unwrap();

    let ok = response(&invite, StatusCode::OK, "bobtag");
    bob.send_message(ok.clone(), addr(ALICE)).await.unwrap();
    next_event(&mut events, |e| matches!(e, TransactionEvent::SuccessResponse { .. })).await;
    next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;
    assert_eq!(manager.transaction_state(&key), Some(TransactionState::Terminated));

    bob.send_message(ok, addr(ALICE)).await.unwrap();
    let event = next_event(&mut events, |e| matches!(e, TransactionEvent::StrayResponse { .. })).await;
    match event {
        TransactionEvent::StrayResponse { response, source } => {
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(source, addr(BOB));
        }
        _ => unreachable!(),
    }

    // the transaction never sends an ACK for a 2xx
    assert_eq!(count_requests(&drain(&mut bob_rx), Method::Ack), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_100_then_g_until_h() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, BOB, false);
    let (alice, mut alice_rx) = raw_peer(&network, ALICE, false);

    let invite = request(Method::Invite, "z9hG4bKservertimers");
    alice.send_message(invite.clone().into(), addr(BOB)).await.unwrap();

    let key = match next_event(&mut events, |e| matches!(e, TransactionEvent::NewRequest { .. })).await {
        TransactionEvent::NewRequest { transaction_id, request, source } => {
            assert_eq!(request.method, Method::Invite);
            assert_eq!(source, addr(ALICE));
            transaction_id
        }
        _ => unreachable!(),
    };

    let trying = next_message(&mut alice_rx).await.into_response().unwrap();
    assert_eq!(trying.status, StatusCode::TRYING);

    let decline = ResponseBuilder::from_request(&invite, StatusCode::DECLINE).to_tag("b1").build();
    manager.send_response(&key, decline).await.unwrap();
    assert_eq!(manager.transaction_state(&key), Some(TransactionState::Completed));

    let event = next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTimeout { .. })).await;
    assert!(matches!(event, TransactionEvent::TransactionTimeout { timer: TimerType::H, .. }));

    // first send plus G at 0.5, 1.5, 3.5, 7.5 and every 4 seconds to 31.5
    assert_eq!(count_responses(&drain(&mut alice_rx), StatusCode::DECLINE), 11);
}

#[tokio::test(start_paused = true)]
async fn test_ack_confirms_server_invite() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, BOB, false);
    let (alice, mut alice_rx) = raw_peer(&network, ALICE, false);

    let invite = request(Method::Invite, "z9hG4bKconfirm");
    alice.send_message(invite.clone().into(), addr(BOB)).await.unwrap();
    let key = next_event(&mut events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    let not_found = ResponseBuilder::from_request(&invite, StatusCode::NOT_FOUND).to_tag("b2").build();
    manager.send_response(&key, not_found.clone()).await.unwrap();
    let received = next_message(&mut alice_rx).await.into_response().unwrap();
    assert_eq!(received.status, StatusCode::NOT_FOUND);

    let mut ack = request(Method::Ack, "z9hG4bKconfirm");
    ack.headers.set(Header::new(
        HeaderName::To,
        HeaderValue::Address(not_found.to_address().unwrap().clone()),
    ));
    alice.send_message(ack.into(), addr(BOB)).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, TransactionEvent::AckReceived { .. })).await;
    assert_eq!(event.transaction_id(), Some(&key));
    assert_eq!(manager.transaction_state(&key), Some(TransactionState::Confirmed));

    // Timer I ends the transaction; G no longer retransmits
    next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;
    assert_eq!(count_responses(&drain(&mut alice_rx), StatusCode::NOT_FOUND), 0);

    // a second final response is refused
    assert!(manager
        .send_response(&key, ResponseBuilder::from_request(&invite, StatusCode::OK).build())
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_request_retransmission_resends_last_response() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, BOB, false);
    let (alice, mut alice_rx) = raw_peer(&network, ALICE, false);

    let options = request(Method::Options, "z9hG4bKretrans");
    alice.send_message(options.clone().into(), addr(BOB)).await.unwrap();
    let key = next_event(&mut events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    manager
        .send_response(&key, ResponseBuilder::from_request(&options, StatusCode::OK).build())
        .await
        .unwrap();
    assert_eq!(next_message(&mut alice_rx).await.as_response().map(|r| r.status), Some(StatusCode::OK));

    alice.send_message(options.into(), addr(BOB)).await.unwrap();
    assert_eq!(next_message(&mut alice_rx).await.as_response().map(|r| r.status), Some(StatusCode::OK));

    // Timer J ends it; only one NewRequest was ever reported
    let event = next_event(&mut events, |e| {
        matches!(e, TransactionEvent::NewRequest { .. } | TransactionEvent::TransactionTerminated { .. })
    })
    .await;
    assert!(matches!(event, TransactionEvent::TransactionTerminated { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_legacy_branch_matching() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, BOB, false);
    let (alice, mut alice_rx) = raw_peer(&network, ALICE, false);

    let invite = request(Method::Invite, "1234");
    alice.send_message(invite.clone().into(), addr(BOB)).await.unwrap();
    let key = next_event(&mut events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();
    assert!(key.is_legacy());
    assert_eq!(Some(key.clone()), TransactionKey::from_request(&invite));

    alice.send_message(invite.clone().into(), addr(BOB)).await.unwrap();
    manager
        .send_response(&key, ResponseBuilder::from_request(&invite, StatusCode::NOT_FOUND).to_tag("l1").build())
        .await
        .unwrap();
    let _ = next_message(&mut alice_rx).await;

    alice.send_message(request(Method::Ack, "1234").into(), addr(BOB)).await.unwrap();
    let event = next_event(&mut events, |e| {
        matches!(e, TransactionEvent::NewRequest { .. } | TransactionEvent::AckReceived { .. })
    })
    .await;
    assert!(matches!(event, TransactionEvent::AckReceived { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_not_a_timeout() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, ALICE, false);

    let key = manager
        .send_request(request(Method::Invite, "z9hG4bKnowhere"), addr("127.0.0.1:9"))
        .await
        .unwrap();

    let event = next_event(&mut events, |e| {
        matches!(e, TransactionEvent::TransportError { .. } | TransactionEvent::TransactionTimeout { .. })
    })
    .await;
    match event {
        TransactionEvent::TransportError { transaction_id, .. } => assert_eq!(transaction_id, key),
        other => panic!("expected a transport error, got {other:?}"),
    }
    next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;
    assert_eq!(manager.transaction_state(&key), Some(TransactionState::Terminated));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_invite() {
    sipline_infra_common::setup_test_logging();
    let network = MemoryNetwork::new();
    let (alice, mut alice_events) = manager_at(&network, ALICE, false);
    let (bob, mut bob_events) = manager_at(&network, BOB, false);

    let invite_key = alice
        .send_request(request(Method::Invite, "z9hG4bKcancelme"), addr(BOB))
        .await
        .unwrap();

    let (server_invite, invite) = match next_event(&mut bob_events, |e| matches!(e, TransactionEvent::NewRequest { .. })).await {
        TransactionEvent::NewRequest { transaction_id, request, .. } => (transaction_id, request),
        _ => unreachable!(),
    };

    // no provisional response yet
    assert!(alice.cancel(&invite_key).await.is_err());

    let ringing = ResponseBuilder::from_request(&invite, StatusCode::RINGING).to_tag("bobtag").build();
    bob.send_response(&server_invite, ringing).await.unwrap();
    next_event(&mut alice_events, |e| matches!(e, TransactionEvent::ProvisionalResponse { .. })).await;

    let cancel_key = alice.cancel(&invite_key).await.unwrap();
    assert_eq!(cancel_key.branch, invite_key.branch);
    assert_eq!(cancel_key.method, Method::Cancel);

    let (server_cancel, cancel, target) = match next_event(&mut bob_events, |e| {
        matches!(e, TransactionEvent::CancelReceived { .. })
    })
    .await
    {
        TransactionEvent::CancelReceived {
            transaction_id,
            invite_transaction_id,
            request,
            ..
        } => (transaction_id, request, invite_transaction_id),
        _ => unreachable!(),
    };
    assert_eq!(target, Some(server_invite.clone()));

    bob.send_response(&server_cancel, ResponseBuilder::from_request(&cancel, StatusCode::OK).build())
        .await
        .unwrap();
    bob.send_response(
        &server_invite,
        ResponseBuilder::from_request(&invite, StatusCode::REQUEST_TERMINATED).to_tag("bobtag").build(),
    )
    .await
    .unwrap();

    let mut cancel_ok = false;
    let mut terminated = false;
    while !(cancel_ok && terminated) {
        match next_event(&mut alice_events, |e| {
            matches!(e, TransactionEvent::SuccessResponse { .. } | TransactionEvent::FailureResponse { .. })
        })
        .await
        {
            TransactionEvent::SuccessResponse { transaction_id, .. } => {
                assert_eq!(transaction_id, cancel_key);
                cancel_ok = true;
            }
            TransactionEvent::FailureResponse { transaction_id, response } => {
                assert_eq!(transaction_id, invite_key);
                assert_eq!(response.status, StatusCode::REQUEST_TERMINATED);
                terminated = true;
            }
            _ => unreachable!(),
        }
    }

    // alice's INVITE transaction acknowledged the 487
    let event = next_event(&mut bob_events, |e| matches!(e, TransactionEvent::AckReceived { .. })).await;
    assert_eq!(event.transaction_id(), Some(&server_invite));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_without_invite_has_no_target() {
    let network = MemoryNetwork::new();
    let (_bob, mut bob_events) = manager_at(&network, BOB, false);
    let (alice, _alice_rx) = raw_peer(&network, ALICE, false);

    alice
        .send_message(request(Method::Cancel, "z9hG4bKorphan").into(), addr(BOB))
        .await
        .unwrap();
    let event = next_event(&mut bob_events, |e| matches!(e, TransactionEvent::CancelReceived { .. })).await;
    assert!(matches!(
        event,
        TransactionEvent::CancelReceived { invite_transaction_id: None, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_forked_final_responses_in_completed() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, ALICE, false);
    let (bob, mut bob_rx) = raw_peer(&network, BOB, false);

    let key = manager
        .send_request(request(Method::Subscribe, "z9hG4bKfork"), addr(BOB))
        .await
        .unwrap();
    let subscribe = next_message(&mut bob_rx).await.into_request().unwrap();

    for tag in ["fork-a", "fork-b", "fork-a"] {
        bob.send_message(response(&subscribe, StatusCode::OK, tag), addr(ALICE))
            .await
            .unwrap();
    }

    let mut tags = Vec::new();
    loop {
        match next_event(&mut events, |e| {
            matches!(e, TransactionEvent::SuccessResponse { .. } | TransactionEvent::TransactionTerminated { .. })
        })
        .await
        {
            TransactionEvent::SuccessResponse { transaction_id, response } => {
                assert_eq!(transaction_id, key);
                tags.push(response.to_tag().unwrap_or_default().to_string());
            }
            _ => break,
        }
    }
    assert_eq!(tags, vec!["fork-a", "fork-b"]);
}

#[tokio::test(start_paused = true)]
async fn test_linger_absorbs_late_retransmissions() {
    let network = MemoryNetwork::new();
    let (transport, rx) = network.bind(addr(BOB), true).unwrap();
    let config = TransactionConfig::default().with_transaction_linger(Duration::from_secs(10));
    let (manager, mut events) = TransactionManager::new(Arc::new(transport), rx, config);
    let (alice, _alice_rx) = raw_peer(&network, ALICE, true);

    let message = request(Method::Message, "z9hG4bKlinger");
    alice.send_message(message.clone().into(), addr(BOB)).await.unwrap();
    let key = next_event(&mut events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();
    manager
        .send_response(&key, ResponseBuilder::from_request(&message, StatusCode::OK).build())
        .await
        .unwrap();
    // Timer J is zero on a reliable transport
    next_event(&mut events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;
    assert!(manager.transaction_exists(&key));

    alice.send_message(message.clone().into(), addr(BOB)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!manager.transaction_exists(&key));

    // once removed, the same request starts a new transaction
    alice.send_message(message.into(), addr(BOB)).await.unwrap();
    let event = next_event(&mut events, |e| {
        matches!(e, TransactionEvent::NewRequest { .. } | TransactionEvent::Error { .. })
    })
    .await;
    assert!(matches!(event, TransactionEvent::NewRequest { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_send_request_adds_missing_via() {
    let network = MemoryNetwork::new();
    let (manager, _events) = manager_at(&network, ALICE, false);
    let (_bob, mut bob_rx) = raw_peer(&network, BOB, false);

    let bare = RequestBuilder::new(Method::Options, Uri::sip("127.0.0.1").with_port(5070))
        .from(Address::new(Uri::sip("127.0.0.1").with_user("alice")).with_tag(generate_tag()))
        .to(Address::new(Uri::sip("127.0.0.1")))
        .call_id("no-via")
        .cseq(1)
        .build();
    let key = manager.send_request(bare, addr(BOB)).await.unwrap();

    let received = next_message(&mut bob_rx).await.into_request().unwrap();
    let via = received.top_via().unwrap();
    assert!(via.has_rfc3261_branch());
    assert_eq!(via.sent_by(), "127.0.0.1:5060");
    assert_eq!(TransactionKey::for_outgoing(&received), Some(key));
    assert!(manager
        .send_request(request(Method::Ack, "z9hG4bKack"), addr(BOB))
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_request_missing_cseq_is_answered_400() {
    let network = MemoryNetwork::new();
    let (manager, mut events) = manager_at(&network, BOB, false);
    let (alice, mut alice_rx) = raw_peer(&network, ALICE, false);

    let mut options = request(Method::Options, "z9hG4bKnocseq");
    options.headers.remove(&HeaderName::CSeq);
    alice.send_message(options.into(), addr(BOB)).await.unwrap();

    let rejected = next_message(&mut alice_rx).await.into_response().unwrap();
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected.reason, "Missing CSeq Header");
    assert_eq!(rejected.call_id(), Some("txn-test@127.0.0.1"));

    match next_event(&mut events, |e| matches!(e, TransactionEvent::MalformedMessage { .. })).await {
        TransactionEvent::MalformedMessage { source, error } => {
            assert_eq!(source, addr(ALICE));
            assert_eq!(error.kind(), ErrorKind::Semantic);
        }
        _ => unreachable!(),
    }
    assert_eq!(manager.transaction_count(), 0);

    // ACK is never answered
    let mut ack = request(Method::Ack, "z9hG4bKnocseq");
    ack.headers.remove(&HeaderName::CallId);
    alice.send_message(ack.into(), addr(BOB)).await.unwrap();
    next_event(&mut events, |e| matches!(e, TransactionEvent::MalformedMessage { .. })).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn test_peer_closing_tcp_connection_aborts_the_transaction() {
    use tokio::io::AsyncWriteExt;

    sipline_infra_common::setup_test_logging();
    let (tcp, rx) = bind_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let (manager, mut events) = TransactionManager::new(Arc::new(tcp.clone()), rx, TransactionConfig::default());

    let mut peer = tokio::net::TcpStream::connect(tcp.local_addr().unwrap()).await.unwrap();
    let peer_port = peer.local_addr().unwrap().port();
    let options = RequestBuilder::new(Method::Options, Uri::sip("127.0.0.1").with_user("bob"))
        .via(Via::new("TCP", "127.0.0.1", Some(peer_port), "z9hG4bKtcpgone"))
        .from(Address::new(Uri::sip("127.0.0.1").with_user("alice")).with_tag("a73kszlfl"))
        .to(Address::new(Uri::sip("127.0.0.1").with_user("bob")))
        .call_id("tcp-gone@127.0.0.1")
        .cseq(1)
        .build();
    peer.write_all(&options.to_bytes()).await.unwrap();

    let key = next_event(&mut events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    drop(peer);
    timeout(Duration::from_secs(5), async {
        while tcp.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server kept the closed connection");

    let result = manager
        .send_response(&key, ResponseBuilder::from_request(&options, StatusCode::OK).build())
        .await;
    assert!(result.is_err());
    match next_event(&mut events, |e| matches!(e, TransactionEvent::TransportError { .. })).await {
        TransactionEvent::TransportError { transaction_id, .. } => assert_eq!(transaction_id, key),
        _ => unreachable!(),
    }
}
