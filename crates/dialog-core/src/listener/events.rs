//! Events delivered to a [`super::SipListener`]

use std::net::SocketAddr;

use sipline_sip_core::prelude::{ErrorKind, Request, Response, StatusCode};
use sipline_transaction_core::{TimerType, TransactionKey};

use crate::dialog::DialogId;

/// A request arrived.
///
/// `transaction_id` is `None` for the ACK of a 2xx, which is not part of
/// any transaction. Answer everything else with
/// [`crate::DialogManager::send_response`].
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub transaction_id: Option<TransactionKey>,
    pub dialog_id: Option<DialogId>,
    pub request: Request,
    pub source: SocketAddr,
}

/// A response arrived.
///
/// `transaction_id` is `None` for responses outliving their transaction,
/// such as a 2xx from another fork.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub transaction_id: Option<TransactionKey>,
    pub dialog_id: Option<DialogId>,
    pub response: Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Timer B, F or H of a transaction fired
    Transaction(TimerType),
    /// A 2xx to INVITE was never acknowledged within 64*T1
    AckNotReceived,
}

#[derive(Debug, Clone)]
pub struct TimeoutEvent {
    pub transaction_id: Option<TransactionKey>,
    pub dialog_id: Option<DialogId>,
    pub timeout: Timeout,
}

#[derive(Debug, Clone)]
pub struct TransactionTerminatedEvent {
    pub transaction_id: TransactionKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// BYE received, or a final response to our BYE
    Bye,
    /// An early dialog whose request got a non-2xx final response
    Rejected(StatusCode),
    /// A request within the dialog was answered 481 or 408
    RequestFailed(StatusCode),
    /// A request within the dialog timed out
    Timeout,
    /// [`crate::DialogManager::terminate_dialog`]
    Local,
}

#[derive(Debug, Clone)]
pub struct DialogTerminatedEvent {
    pub dialog_id: DialogId,
    pub reason: TerminationReason,
}

/// The transport failed to send or to receive
#[derive(Debug, Clone)]
pub struct IoExceptionEvent {
    pub transaction_id: Option<TransactionKey>,
    pub message: String,
}

/// The stack rejected something that breaks the protocol rather than the
/// network: an unparseable message, a request missing a mandatory header
/// (already answered with 400 where possible), or a transaction step its
/// state machine refused.
#[derive(Debug, Clone)]
pub struct ProtocolErrorEvent {
    pub transaction_id: Option<TransactionKey>,
    /// Peer the offending message came from
    pub source: Option<SocketAddr>,
    pub kind: ErrorKind,
    pub message: String,
}
