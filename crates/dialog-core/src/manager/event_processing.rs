//! The loop turning transaction events into dialog updates and listener
//! callbacks

use sipline_sip_core::ErrorKind;
use sipline_transaction_core::{TimerType, TransactionEvent, TransactionKey};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::DialogManager;
use crate::dialog::DialogState;
use crate::listener::dispatcher::ListenerEvent;
use crate::listener::{
    IoExceptionEvent, ProtocolErrorEvent, TerminationReason, Timeout, TimeoutEvent, TransactionTerminatedEvent,
};

impl DialogManager {
    pub(crate) fn spawn_event_loop(&self, mut events: mpsc::Receiver<TransactionEvent>) {
        let manager = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(event) => manager.handle_transaction_event(event).await,
                    None => {
                        info!("Transaction layer closed its event channel");
                        break;
                    }
                }
            }
            debug!("Dialog event loop stopped");
        });
    }

    async fn handle_transaction_event(&self, event: TransactionEvent) {
        match event {
            TransactionEvent::NewRequest {
                transaction_id,
                request,
                source,
            } => self.handle_new_request(transaction_id, request, source).await,
            TransactionEvent::AckReceived { transaction_id, request } => {
                self.handle_ack_for_failure(transaction_id, request)
            }
            TransactionEvent::CancelReceived {
                transaction_id,
                invite_transaction_id,
                request,
                source,
            } => self.handle_cancel(transaction_id, invite_transaction_id, request, source),
            TransactionEvent::ProvisionalResponse {
                transaction_id,
                response,
            }
            | TransactionEvent::SuccessResponse {
                transaction_id,
                response,
            }
            | TransactionEvent::FailureResponse {
                transaction_id,
                response,
            } => self.handle_response(Some(transaction_id), response).await,
            TransactionEvent::StrayRequest { request, source } => self.handle_stray_request(request, source),
            TransactionEvent::StrayResponse { response, source } => {
                trace!(%source, status = response.status.as_u16(), "Stray response");
                self.handle_response(None, response).await
            }
            TransactionEvent::TransactionTimeout { transaction_id, timer } => {
                self.handle_transaction_timeout(transaction_id, timer)
            }
            TransactionEvent::TransportError { transaction_id, error } => {
                warn!(id = %transaction_id, %error, "Transport error");
                self.dispatch(ListenerEvent::IoException(IoExceptionEvent {
                    transaction_id: Some(transaction_id),
                    message: error,
                }));
            }
            TransactionEvent::ReceiveError { error } => {
                self.dispatch(ListenerEvent::IoException(IoExceptionEvent {
                    transaction_id: None,
                    message: error,
                }));
            }
            TransactionEvent::MalformedMessage { source, error } => {
                debug!(%source, %error, "Malformed message");
                self.dispatch(ListenerEvent::ProtocolError(ProtocolErrorEvent {
                    transaction_id: None,
                    source: Some(source),
                    kind: error.kind(),
                    message: error.to_string(),
                }));
            }
            TransactionEvent::Error { transaction_id, error } => {
                warn!(id = %transaction_id, %error, "Transaction refused a step");
                self.dispatch(ListenerEvent::ProtocolError(ProtocolErrorEvent {
                    transaction_id: Some(transaction_id),
                    source: None,
                    kind: ErrorKind::Semantic,
                    message: error,
                }));
            }
            TransactionEvent::StateChanged {
                transaction_id,
                previous_state,
                new_state,
            } => {
                trace!(id = %transaction_id, ?previous_state, ?new_state, "Transaction state changed");
            }
            TransactionEvent::TransactionTerminated { transaction_id } => {
                self.handle_transaction_terminated(transaction_id)
            }
        }
    }

    /// Timer B, F or H. A request within a dialog that times out ends the
    /// dialog; so does a dialog-creating request for its early dialogs.
    fn handle_transaction_timeout(&self, key: TransactionKey, timer: TimerType) {
        let dialog_id = self.dialog_for_transaction(&key);
        if let Some(id) = &dialog_id {
            self.end_dialog(id, TerminationReason::Timeout);
        }
        if let Some(pending_key) = self.inner.pending_transactions.get(&key).map(|entry| entry.value().clone()) {
            if let Some(pending) = self.inner.pending.get(&pending_key).map(|entry| entry.value().clone()) {
                let early = pending.dialogs.lock().clone();
                for id in &early {
                    self.terminate_early(id, TerminationReason::Timeout);
                }
            }
        }
        self.dispatch(ListenerEvent::Timeout(TimeoutEvent {
            transaction_id: Some(key),
            dialog_id,
            timeout: Timeout::Transaction(timer),
        }));
    }

    /// Unlinks the transaction. The request it carried stays pending for
    /// `dialog_linger`, so 2xx from other forks still create dialogs and
    /// get their ACK; early dialogs left after that are terminated.
    fn handle_transaction_terminated(&self, key: TransactionKey) {
        self.inner.transaction_dialogs.remove(&key);
        if let Some((_, pending_key)) = self.inner.pending_transactions.remove(&key) {
            let manager = self.clone();
            let linger = self.inner.config.dialog_linger;
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(linger).await;
                let Some((_, pending)) = manager.inner.pending.remove_if(&pending_key, |_, p| p.key == key) else {
                    return;
                };
                let early = pending.dialogs.lock().clone();
                for id in &early {
                    if manager.dialog_state(id) == Some(DialogState::Early) {
                        manager.end_dialog(id, TerminationReason::Timeout);
                    }
                }
                trace!(id = %key, "Pending request released");
            });
        }
        self.dispatch(ListenerEvent::TransactionTerminated(TransactionTerminatedEvent {
            transaction_id: key,
        }));
    }
}
