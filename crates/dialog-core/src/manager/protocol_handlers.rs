//! Handling of received requests

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use sipline_sip_core::prelude::{generate_tag, Method, Request, ResponseBuilder, SipMessage, StatusCode};
use sipline_transaction_core::{TransactionKey, TransactionState};
use tracing::{debug, info, trace, warn};

use super::DialogManager;
use crate::dialog::{Dialog, DialogId};
use crate::listener::dispatcher::ListenerEvent;
use crate::listener::{RequestEvent, TerminationReason};

impl DialogManager {
    /// A request that created a server transaction
    pub(crate) async fn handle_new_request(&self, key: TransactionKey, request: Request, source: SocketAddr) {
        if request.to_tag().is_none() {
            self.dispatch_request(Some(key), None, request, source);
            return;
        }
        let Some(id) = DialogId::from_incoming_request(&request) else {
            self.reply(&key, &request, StatusCode::BAD_REQUEST);
            return;
        };

        let dialog = match self.inner.dialogs.get(&id).map(|entry| entry.value().clone()) {
            Some(dialog) => Some(dialog),
            None if request.method == Method::Notify => self.dialog_from_notify(&id, &request, source),
            None => None,
        };
        let Some(dialog) = dialog.filter(|dialog| !dialog.lock().is_terminated()) else {
            debug!(dialog = %id, method = %request.method, "Request for unknown dialog");
            self.reply(&key, &request, StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST);
            return;
        };

        let checked = {
            let mut dialog = dialog.lock();
            dialog.validate_remote_cseq(&request).map(|()| {
                if request.method.is_target_refresh() {
                    dialog.update_remote_target(&request);
                }
                request.method == Method::Bye && dialog.terminate_on_bye
            })
        };
        let ends_dialog = match checked {
            Ok(ends_dialog) => ends_dialog,
            Err(e) => {
                warn!(dialog = %id, error = %e, "Rejecting request within dialog");
                self.reply(&key, &request, e.status_code());
                return;
            }
        };

        self.inner.transaction_dialogs.insert(key.clone(), id.clone());
        self.dispatch_request(Some(key), Some(id.clone()), request, source);
        if ends_dialog {
            self.end_dialog(&id, TerminationReason::Bye);
        }
    }

    /// A NOTIFY for our pending SUBSCRIBE or REFER carrying a to-tag we have
    /// not seen yet creates its own dialog (RFC 6665 §4.1.2.4)
    fn dialog_from_notify(&self, id: &DialogId, notify: &Request, source: SocketAddr) -> Option<Arc<Mutex<Dialog>>> {
        let pending = self
            .inner
            .pending
            .get(&(id.call_id.clone(), id.local_tag.clone()))
            .map(|entry| entry.value().clone())?;
        if !matches!(pending.request.method, Method::Subscribe | Method::Refer) {
            return None;
        }
        let mut dialog = match Dialog::from_notify(&pending.request, notify, source) {
            Ok(dialog) => dialog,
            Err(e) => {
                warn!(dialog = %id, error = %e, "NOTIFY cannot create a dialog");
                return None;
            }
        };
        dialog.terminate_on_bye = self.inner.config.terminate_on_bye;
        match self.inner.dialogs.entry(id.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                info!(dialog = %id, "Subscription dialog created by NOTIFY");
                pending.dialogs.lock().push(id.clone());
                Some(entry.insert(Arc::new(Mutex::new(dialog))).value().clone())
            }
        }
    }

    /// CANCEL: 200 to the CANCEL, 487 to the INVITE if it is still pending
    /// (RFC 3261 §9.2)
    pub(crate) fn handle_cancel(
        &self,
        key: TransactionKey,
        invite: Option<TransactionKey>,
        request: Request,
        source: SocketAddr,
    ) {
        let Some(invite) = invite else {
            debug!(id = %key, "CANCEL matches no INVITE");
            self.reply(&key, &request, StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST);
            return;
        };
        self.reply(&key, &request, StatusCode::OK);

        let dialog_id = self.dialog_for_transaction(&invite);
        self.dispatch_request(Some(key), dialog_id.clone(), request, source);
        if self.inner.transactions.transaction_state(&invite) == Some(TransactionState::Proceeding) {
            if let Some(original) = self.inner.transactions.original_request(&invite) {
                let tag = dialog_id
                    .as_ref()
                    .map(|id| id.local_tag.clone())
                    .unwrap_or_else(generate_tag);
                let terminated = ResponseBuilder::from_request(&original, StatusCode::REQUEST_TERMINATED)
                    .to_tag(tag)
                    .build();
                info!(invite = %invite, "INVITE cancelled");
                let manager = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.send_response(&invite, terminated).await {
                        warn!(invite = %invite, error = %e, "Failed to answer cancelled INVITE");
                    }
                });
            }
        } else {
            debug!(invite = %invite, "CANCEL for INVITE that already has a final response");
        }
    }

    /// ACK for a non-2xx final response, absorbed by its transaction
    pub(crate) fn handle_ack_for_failure(&self, key: TransactionKey, request: Request) {
        let Some(source) = self.inner.transactions.remote_addr(&key) else {
            trace!(id = %key, "ACK for vanished transaction");
            return;
        };
        let dialog_id = self.dialog_for_transaction(&key);
        self.dispatch_request(Some(key), dialog_id, request, source);
    }

    /// A request matching no transaction; only the ACK for a 2xx is expected
    pub(crate) fn handle_stray_request(&self, request: Request, source: SocketAddr) {
        if request.method != Method::Ack {
            debug!(method = %request.method, %source, "Stray request dropped");
            return;
        }
        let Some(id) = DialogId::from_incoming_request(&request) else {
            debug!(%source, "ACK without dialog tags dropped");
            return;
        };
        let cseq = request.cseq().map(|c| c.seq).unwrap_or_default();
        if !self.ack_arrived(&id, cseq) && self.inner.config.retransmission_filter {
            trace!(dialog = %id, cseq, "ACK retransmission absorbed");
            return;
        }
        let dialog_id = self.inner.dialogs.contains_key(&id).then_some(id);
        self.dispatch_request(None, dialog_id, request, source);
    }

    fn dispatch_request(
        &self,
        transaction_id: Option<TransactionKey>,
        dialog_id: Option<DialogId>,
        request: Request,
        source: SocketAddr,
    ) {
        self.dispatch(ListenerEvent::Request(RequestEvent {
            transaction_id,
            dialog_id,
            request,
            source,
        }));
    }

    /// Answers a request on the stack's behalf.
    ///
    /// The transaction acknowledges the response only after it has reported
    /// its state change on the event channel, and that channel is drained by
    /// the loop calling this; the send therefore runs in its own task.
    fn reply(&self, key: &TransactionKey, request: &Request, status: StatusCode) {
        let response = ResponseBuilder::from_request(request, status).to_tag(generate_tag()).build();
        let transactions = self.inner.transactions.clone();
        let key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = transactions.send_response(&key, response).await {
                warn!(id = %key, status = status.as_u16(), error = %e, "Failed to send automatic response");
            }
        });
    }
}
