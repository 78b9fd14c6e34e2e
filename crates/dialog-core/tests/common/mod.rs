//! Endpoints on the in-memory network whose listener events are collected
//! into a channel, so tests can await them in order

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sipline_dialog_core::prelude::*;
use sipline_sip_core::prelude::{
    generate_call_id, Address, Message, Method, Request, RequestBuilder, Response, ResponseBuilder, SipMessage,
    StatusCode, Uri,
};
use sipline_sip_transport::{MemoryNetwork, MemoryTransport, TransportEvent};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const ALICE: &str = "127.0.0.1:5060";
pub const BOB: &str = "127.0.0.2:5060";

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[derive(Debug)]
pub enum Observed {
    Request(RequestEvent),
    Response(ResponseEvent),
    Timeout(TimeoutEvent),
    TransactionTerminated(TransactionTerminatedEvent),
    DialogTerminated(DialogTerminatedEvent),
    IoException(IoExceptionEvent),
    ProtocolError(ProtocolErrorEvent),
}

struct ChannelListener(mpsc::UnboundedSender<Observed>);

#[async_trait]
impl SipListener for ChannelListener {
    async fn process_request(&self, event: RequestEvent) {
        let _ = self.0.send(Observed::Request(event));
    }

    async fn process_response(&self, event: ResponseEvent) {
        let _ = self.0.send(Observed::Response(event));
    }

    async fn process_timeout(&self, event: TimeoutEvent) {
        let _ = self.0.send(Observed::Timeout(event));
    }

    async fn process_transaction_terminated(&self, event: TransactionTerminatedEvent) {
        let _ = self.0.send(Observed::TransactionTerminated(event));
    }

    async fn process_dialog_terminated(&self, event: DialogTerminatedEvent) {
        let _ = self.0.send(Observed::DialogTerminated(event));
    }

    async fn process_io_exception(&self, event: IoExceptionEvent) {
        let _ = self.0.send(Observed::IoException(event));
    }

    async fn process_protocol_error(&self, event: ProtocolErrorEvent) {
        let _ = self.0.send(Observed::ProtocolError(event));
    }
}

pub struct Endpoint {
    pub manager: DialogManager,
    pub transport: MemoryTransport,
    pub addr: SocketAddr,
    events: mpsc::UnboundedReceiver<Observed>,
}

impl Endpoint {
    pub fn bind(network: &MemoryNetwork, at: &str, config: DialogManagerConfig) -> Self {
        Self::bind_with(network, at, false, config)
    }

    pub fn bind_with(network: &MemoryNetwork, at: &str, reliable: bool, config: DialogManagerConfig) -> Self {
        let (transport, rx) = network.bind(addr(at), reliable).unwrap();
        let manager = DialogManager::new(Arc::new(transport.clone()), rx, config);
        let (tx, events) = mpsc::unbounded_channel();
        manager.start(Arc::new(ChannelListener(tx))).unwrap();
        Self {
            manager,
            transport,
            addr: addr(at),
            events,
        }
    }

    /// Next observed event matching `pred`; everything before it is skipped
    pub async fn expect<F>(&mut self, mut pred: F) -> Observed
    where
        F: FnMut(&Observed) -> bool,
    {
        loop {
            let event = timeout(Duration::from_secs(300), self.events.recv())
                .await
                .expect("timed out waiting for a listener event")
                .expect("listener channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    pub async fn next_request(&mut self, method: Method) -> RequestEvent {
        match self
            .expect(|e| matches!(e, Observed::Request(r) if r.request.method == method))
            .await
        {
            Observed::Request(event) => event,
            _ => unreachable!(),
        }
    }

    pub async fn next_response(&mut self, status: StatusCode) -> ResponseEvent {
        match self
            .expect(|e| matches!(e, Observed::Response(r) if r.response.status == status))
            .await
        {
            Observed::Response(event) => event,
            _ => unreachable!(),
        }
    }

    pub async fn next_dialog_terminated(&mut self) -> DialogTerminatedEvent {
        match self.expect(|e| matches!(e, Observed::DialogTerminated(_))).await {
            Observed::DialogTerminated(event) => event,
            _ => unreachable!(),
        }
    }

    pub async fn next_timeout(&mut self) -> TimeoutEvent {
        match self.expect(|e| matches!(e, Observed::Timeout(_))).await {
            Observed::Timeout(event) => event,
            _ => unreachable!(),
        }
    }

    /// Events delivered so far and not consumed yet
    pub fn drain(&mut self) -> Vec<Observed> {
        let mut observed = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            observed.push(event);
        }
        observed
    }

    /// Answers a received request
    pub async fn respond(&self, event: &RequestEvent, status: StatusCode) {
        let response = ResponseBuilder::from_request(&event.request, status).build();
        self.respond_with(event, response).await;
    }

    pub async fn respond_with(&self, event: &RequestEvent, response: Response) {
        let key = event.transaction_id.as_ref().expect("request outside a transaction");
        self.manager.send_response(key, response).await.unwrap();
    }

    /// Requests and responses this endpoint put on the wire
    pub fn sent(&self) -> Vec<Message> {
        self.transport.sent_messages().into_iter().map(|(_, m)| m).collect()
    }

    pub fn sent_responses(&self, status: StatusCode, method: Method) -> usize {
        self.sent()
            .iter()
            .filter_map(Message::as_response)
            .filter(|r| r.status == status && r.cseq().map(|c| c.method.clone()) == Some(method.clone()))
            .count()
    }

    pub fn sent_requests(&self, method: Method) -> usize {
        self.sent()
            .iter()
            .filter_map(Message::as_request)
            .filter(|r| r.method == method)
            .count()
    }
}

/// Out-of-dialog request from the user at `from` to the user at `to`. The
/// stack adds the From tag, Contact and Via.
pub fn request(method: Method, from: (&str, &str), to: (&str, &str)) -> Request {
    let to_addr = addr(to.1);
    RequestBuilder::new(
        method,
        Uri::sip(to_addr.ip().to_string()).with_port(to_addr.port()).with_user(to.0),
    )
    .from(Address::new(Uri::sip(addr(from.1).ip().to_string()).with_user(from.0)))
    .to(Address::new(Uri::sip(to_addr.ip().to_string()).with_user(to.0)))
    .call_id(generate_call_id(None))
    .cseq(1)
    .build()
}

/// Next SIP message on a bare transport
pub async fn next_message(rx: &mut mpsc::Receiver<TransportEvent>) -> Message {
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

/// Alice calls Bob; returns both sides' dialog ids once Bob has the ACK
pub async fn establish_call(alice: &mut Endpoint, bob: &mut Endpoint) -> (DialogId, DialogId) {
    alice
        .manager
        .send_request(request(Method::Invite, ("alice", ALICE), ("bob", BOB)))
        .await
        .unwrap();
    let invite = bob.next_request(Method::Invite).await;
    assert!(invite.dialog_id.is_none());
    bob.respond(&invite, StatusCode::OK).await;

    let ok = alice.next_response(StatusCode::OK).await;
    let alice_id = ok.dialog_id.expect("2xx created no dialog");
    let ack = bob.next_request(Method::Ack).await;
    assert!(ack.transaction_id.is_none());
    let bob_id = ack.dialog_id.expect("ACK matched no dialog");
    (alice_id, bob_id)
}
