use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::events::{
    DialogTerminatedEvent, IoExceptionEvent, ProtocolErrorEvent, RequestEvent, ResponseEvent, TimeoutEvent,
    TransactionTerminatedEvent,
};
use super::SipListener;

#[derive(Debug, Clone)]
pub(crate) enum ListenerEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    Timeout(TimeoutEvent),
    TransactionTerminated(TransactionTerminatedEvent),
    DialogTerminated(DialogTerminatedEvent),
    IoException(IoExceptionEvent),
    ProtocolError(ProtocolErrorEvent),
}

impl ListenerEvent {
    async fn deliver(self, listener: &dyn SipListener) {
        match self {
            ListenerEvent::Request(event) => listener.process_request(event).await,
            ListenerEvent::Response(event) => listener.process_response(event).await,
            ListenerEvent::Timeout(event) => listener.process_timeout(event).await,
            ListenerEvent::TransactionTerminated(event) => listener.process_transaction_terminated(event).await,
            ListenerEvent::DialogTerminated(event) => listener.process_dialog_terminated(event).await,
            ListenerEvent::IoException(event) => listener.process_io_exception(event).await,
            ListenerEvent::ProtocolError(event) => listener.process_protocol_error(event).await,
        }
    }
}

/// Hands events to the listener without blocking the dialog event loop
pub(crate) enum Dispatcher {
    /// One task drains a queue, so callbacks never overlap
    Serialized(mpsc::UnboundedSender<ListenerEvent>),
    /// A task per event
    Reentrant(Arc<dyn SipListener>),
}

impl Dispatcher {
    pub(crate) fn new(listener: Arc<dyn SipListener>, reentrant: bool) -> Self {
        if reentrant {
            return Dispatcher::Reentrant(listener);
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<ListenerEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                event.deliver(listener.as_ref()).await;
            }
            trace!("Listener queue closed");
        });
        Dispatcher::Serialized(tx)
    }

    pub(crate) fn dispatch(&self, event: ListenerEvent) {
        match self {
            Dispatcher::Serialized(queue) => {
                if queue.send(event).is_err() {
                    debug!("Listener task gone, event dropped");
                }
            }
            Dispatcher::Reentrant(listener) => {
                let listener = listener.clone();
                tokio::spawn(async move { event.deliver(listener.as_ref()).await });
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatcher::Serialized(_) => f.write_str("Dispatcher::Serialized"),
            Dispatcher::Reentrant(_) => f.write_str("Dispatcher::Reentrant"),
        }
    }
}
