use std::net::SocketAddr;

use sipline_sip_core::prelude::{Request, Response};

use crate::timer::TimerType;
use crate::transaction::{TransactionKey, TransactionState};

/// Events reported by the transaction layer to its user
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A request created a new server transaction
    NewRequest {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    /// ACK for a non-2xx final response reached its INVITE server transaction
    AckReceived {
        transaction_id: TransactionKey,
        request: Request,
    },

    /// A CANCEL created its own server transaction.
    ///
    /// `invite_transaction_id` names the INVITE server transaction it
    /// targets, or is `None` when no such transaction exists (the CANCEL
    /// should then be answered with 481).
    CancelReceived {
        transaction_id: TransactionKey,
        invite_transaction_id: Option<TransactionKey>,
        request: Request,
        source: SocketAddr,
    },

    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
    },

    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
    },

    /// 3xx-6xx final response
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
    },

    /// A request that belongs to no transaction, typically the ACK for a 2xx
    StrayRequest { request: Request, source: SocketAddr },

    /// A response that belongs to no live transaction, typically a 2xx
    /// retransmission or a 2xx from another fork
    StrayResponse { response: Response, source: SocketAddr },

    /// Timer B, F or H fired
    TransactionTimeout {
        transaction_id: TransactionKey,
        timer: TimerType,
    },

    /// Sending failed; the transaction is terminated
    TransportError {
        transaction_id: TransactionKey,
        error: String,
    },

    StateChanged {
        transaction_id: TransactionKey,
        previous_state: TransactionState,
        new_state: TransactionState,
    },

    TransactionTerminated { transaction_id: TransactionKey },

    /// A message from `source` was unparseable or lacked a mandatory
    /// header. Requests that can still be routed were answered with 400.
    MalformedMessage {
        source: SocketAddr,
        error: sipline_sip_core::Error,
    },

    /// The transport failed while receiving
    ReceiveError { error: String },

    /// A transaction refused a step its state machine does not allow
    Error {
        transaction_id: TransactionKey,
        error: String,
    },
}

impl TransactionEvent {
    /// The transaction this event is about, if any
    pub fn transaction_id(&self) -> Option<&TransactionKey> {
        match self {
            TransactionEvent::NewRequest { transaction_id, .. }
            | TransactionEvent::AckReceived { transaction_id, .. }
            | TransactionEvent::CancelReceived { transaction_id, .. }
            | TransactionEvent::ProvisionalResponse { transaction_id, .. }
            | TransactionEvent::SuccessResponse { transaction_id, .. }
            | TransactionEvent::FailureResponse { transaction_id, .. }
            | TransactionEvent::TransactionTimeout { transaction_id, .. }
            | TransactionEvent::TransportError { transaction_id, .. }
            | TransactionEvent::StateChanged { transaction_id, .. }
            | TransactionEvent::TransactionTerminated { transaction_id }
            | TransactionEvent::Error { transaction_id, .. } => Some(transaction_id),
            TransactionEvent::StrayRequest { .. }
            | TransactionEvent::StrayResponse { .. }
            | TransactionEvent::MalformedMessage { .. }
            | TransactionEvent::ReceiveError { .. } => None,
        }
    }
}
