//! Response Lifecycle Management
//!
//! Dialog state follows the responses that cross it:
//!
//! ```text
//! UAC (receiving):
//!   INVITE sent ──▶ 18x with tag ──▶ Early ──▶ 2xx ──▶ Confirmed + ACK
//!                                     └────▶ 3xx-6xx ──▶ Terminated
//!
//! UAS (sending):
//!   INVITE received ──▶ 18x sent ──▶ Early ──▶ 2xx sent ──▶ Confirmed
//!                                               └── retransmitted until ACK
//! ```
//!
//! Every to-tag in a response to a dialog-creating request gets its own
//! dialog, so forked responses stay apart.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use sipline_sip_core::prelude::{Message, Method, Response, SipMessage, StatusCode};
use sipline_transaction_core::TransactionKey;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use super::{DialogManager, PendingAck, PendingRequest};
use crate::dialog::{Dialog, DialogId, DialogState};
use crate::listener::dispatcher::ListenerEvent;
use crate::listener::{ResponseEvent, TerminationReason, Timeout, TimeoutEvent};

impl DialogManager {
    /// Handles a response from the transaction layer. `key` is `None` for
    /// responses that outlived their transaction.
    pub(crate) async fn handle_response(&self, key: Option<TransactionKey>, response: Response) {
        let Some(cseq) = response.cseq().cloned() else {
            warn!(status = response.status.as_u16(), "Response without CSeq dropped");
            return;
        };
        let uac_id = DialogId::from_incoming_response(&response);

        if response.status.is_success() && cseq.method == Method::Invite {
            if let Some(id) = &uac_id {
                if self.resend_cached_ack(id, cseq.seq).await {
                    if self.inner.config.retransmission_filter {
                        trace!(dialog = %id, "2xx retransmission absorbed");
                        return;
                    }
                    self.dispatch(ListenerEvent::Response(ResponseEvent {
                        transaction_id: key,
                        dialog_id: Some(id.clone()),
                        response,
                    }));
                    return;
                }
            }
        }

        let linked = key.as_ref().and_then(|k| self.dialog_for_transaction(k));
        let dialog_id = if let Some(id) = linked {
            self.on_in_dialog_response(&id, &response, &cseq.method, cseq.seq).await;
            Some(id)
        } else if let Some(pending) = self.pending_for(&response) {
            self.on_dialog_creating_response(&pending, &response, cseq.seq).await
        } else {
            uac_id.filter(|id| self.inner.dialogs.contains_key(id))
        };

        self.dispatch(ListenerEvent::Response(ResponseEvent {
            transaction_id: key,
            dialog_id,
            response,
        }));
    }

    /// Resends the ACK cached for the 2xx with this CSeq; false if there is
    /// none
    async fn resend_cached_ack(&self, id: &DialogId, cseq: u32) -> bool {
        let Some(cached) = self
            .inner
            .acks
            .get(id)
            .filter(|cached| cached.cseq == cseq)
            .map(|cached| cached.value().clone())
        else {
            return false;
        };
        debug!(dialog = %id, cseq, "Resending ACK for retransmitted 2xx");
        if let Err(e) = self
            .inner
            .transactions
            .send_stateless(Message::Request(cached.ack), cached.destination)
            .await
        {
            warn!(dialog = %id, error = %e, "Failed to resend ACK");
        }
        true
    }

    /// Response to a request sent within a dialog (RFC 3261 §12.2.1.2)
    async fn on_in_dialog_response(&self, id: &DialogId, response: &Response, method: &Method, cseq: u32) {
        let status = response.status;
        if status == StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST || status == StatusCode::REQUEST_TIMEOUT {
            self.end_dialog(id, TerminationReason::RequestFailed(status));
            return;
        }
        if *method == Method::Bye && status.is_final() {
            self.end_dialog(id, TerminationReason::Bye);
            return;
        }
        if !status.is_success() {
            return;
        }
        if method.is_target_refresh() {
            if let Ok(dialog) = self.find_dialog(id) {
                dialog.lock().update_remote_target(response);
            }
        }
        if *method == Method::Invite && self.inner.config.auto_ack_2xx {
            if let Err(e) = self.send_2xx_ack(id, cseq).await {
                warn!(dialog = %id, error = %e, "Failed to acknowledge re-INVITE 2xx");
            }
        }
    }

    /// Request we sent outside of a dialog that this response answers
    fn pending_for(&self, response: &Response) -> Option<Arc<PendingRequest>> {
        let key = (response.call_id()?.to_string(), response.from_tag()?.to_string());
        let pending = self.inner.pending.get(&key)?.value().clone();
        let sent = pending.request.cseq()?;
        let received = response.cseq()?;
        (sent.seq == received.seq && sent.method == received.method).then_some(pending)
    }

    /// Response to a dialog-creating request: creates one dialog per to-tag
    async fn on_dialog_creating_response(
        &self,
        pending: &PendingRequest,
        response: &Response,
        cseq: u32,
    ) -> Option<DialogId> {
        let status = response.status;
        if status.is_failure() {
            let early: Vec<DialogId> = pending.dialogs.lock().clone();
            for id in &early {
                self.terminate_early(id, TerminationReason::Rejected(status));
            }
            return None;
        }
        if status == StatusCode::TRYING {
            return None;
        }
        let id = DialogId::from_incoming_response(response)?;

        match self.inner.dialogs.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let mut dialog = entry.get().lock();
                if dialog.is_terminated() {
                    debug!(dialog = %id, "Response for terminated dialog");
                    return Some(id);
                }
                let was_early = dialog.state == DialogState::Early;
                dialog.update_from_response(response);
                if was_early && dialog.state == DialogState::Confirmed {
                    info!(dialog = %id, "Dialog confirmed");
                }
            }
            Entry::Vacant(entry) => match Dialog::new_uac(&pending.request, response, pending.destination) {
                Ok(mut dialog) => {
                    dialog.terminate_on_bye = self.inner.config.terminate_on_bye;
                    info!(dialog = %id, state = %dialog.state, method = %dialog.method, "Dialog created");
                    entry.insert(Arc::new(Mutex::new(dialog)));
                    pending.dialogs.lock().push(id.clone());
                }
                Err(e) => {
                    warn!(dialog = %id, error = %e, "Response cannot create a dialog");
                    return None;
                }
            },
        }

        if status.is_success() && pending.request.method == Method::Invite && self.inner.config.auto_ack_2xx {
            if let Err(e) = self.send_2xx_ack(&id, cseq).await {
                warn!(dialog = %id, error = %e, "Failed to acknowledge 2xx");
            }
        }
        Some(id)
    }

    /// Retransmits a 2xx to INVITE until the ACK arrives (RFC 3261
    /// §13.3.1.4). Intervals start at T1 and double up to T2; nothing is
    /// retransmitted over reliable transports. After 64*T1 without an ACK
    /// the listener gets [`Timeout::AckNotReceived`].
    pub(crate) fn spawn_2xx_retransmission(&self, id: DialogId, cseq: u32, response: Response, destination: SocketAddr) {
        let (stop, mut stopped) = oneshot::channel();
        // Replacing an older entry drops its sender, which ends its task
        self.inner.awaiting_ack.insert(id.clone(), PendingAck { cseq, stop });

        let timers = self.inner.config.transaction.timers;
        let max_retransmissions = if self.inner.transactions.transport().is_reliable() {
            0
        } else {
            self.inner.config.max_2xx_retransmissions
        };
        let manager = self.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timers.transaction_timeout());
            tokio::pin!(deadline);
            let mut interval = timers.t1;
            let mut sent = 0;
            loop {
                tokio::select! {
                    _ = &mut stopped => return,
                    _ = &mut deadline => break,
                    _ = tokio::time::sleep(interval), if sent < max_retransmissions => {
                        sent += 1;
                        trace!(dialog = %id, attempt = sent, "Retransmitting 2xx");
                        if let Err(e) = manager
                            .inner
                            .transactions
                            .send_stateless(Message::Response(response.clone()), destination)
                            .await
                        {
                            warn!(dialog = %id, error = %e, "2xx retransmission failed");
                        }
                        interval = timers.next_interval(interval, true);
                    }
                }
            }
            manager.ack_timeout(&id, cseq);
        });
    }

    fn ack_timeout(&self, id: &DialogId, cseq: u32) {
        if self.inner.awaiting_ack.remove_if(id, |_, pending| pending.cseq == cseq).is_none() {
            return;
        }
        warn!(dialog = %id, cseq, "No ACK received for 2xx");
        self.dispatch(ListenerEvent::Timeout(TimeoutEvent {
            transaction_id: None,
            dialog_id: Some(id.clone()),
            timeout: Timeout::AckNotReceived,
        }));
    }

    /// Stops 2xx retransmission; false if no 2xx with this CSeq was
    /// awaiting its ACK
    pub(crate) fn ack_arrived(&self, id: &DialogId, cseq: u32) -> bool {
        match self.inner.awaiting_ack.remove_if(id, |_, pending| pending.cseq == cseq) {
            Some((_, pending)) => {
                let _ = pending.stop.send(());
                debug!(dialog = %id, cseq, "ACK received for 2xx");
                true
            }
            None => false,
        }
    }
}
