//! Application callbacks
//!
//! The stack reports everything the application has to act on through one
//! [`SipListener`] per [`crate::DialogManager`]. By default callbacks run
//! one at a time in the order the events happened; with
//! `reentrant_listener` each callback runs in its own task, so a slow
//! callback does not hold up the others.

pub(crate) mod dispatcher;
pub mod events;

use async_trait::async_trait;

pub use events::{
    DialogTerminatedEvent, IoExceptionEvent, ProtocolErrorEvent, RequestEvent, ResponseEvent, TerminationReason,
    Timeout, TimeoutEvent, TransactionTerminatedEvent,
};

#[async_trait]
pub trait SipListener: Send + Sync + 'static {
    async fn process_request(&self, event: RequestEvent);

    async fn process_response(&self, event: ResponseEvent);

    async fn process_timeout(&self, _event: TimeoutEvent) {}

    async fn process_transaction_terminated(&self, _event: TransactionTerminatedEvent) {}

    async fn process_dialog_terminated(&self, _event: DialogTerminatedEvent) {}

    async fn process_io_exception(&self, _event: IoExceptionEvent) {}

    async fn process_protocol_error(&self, _event: ProtocolErrorEvent) {}
}
