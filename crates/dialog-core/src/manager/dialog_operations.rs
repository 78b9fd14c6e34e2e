//! Requests and responses the application sends, and the dialog
//! bookkeeping that goes with them

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use sipline_sip_core::prelude::{
    generate_tag, Address, Header, HeaderName, HeaderValue, Message, Method, Request, Response, SipMessage, Uri,
};
use sipline_transaction_core::TransactionKey;
use tracing::{debug, info, warn};

use super::{CachedAck, DialogManager, PendingRequest};
use crate::dialog::{Dialog, DialogId, DialogState};
use crate::errors::{DialogError, DialogResult};
use crate::listener::dispatcher::ListenerEvent;
use crate::listener::{DialogTerminatedEvent, TerminationReason};

impl DialogManager {
    /// Sends a request through a new client transaction.
    ///
    /// Out-of-dialog requests are routed by their first Route or their
    /// Request-URI, which must hold an IP address. A missing From tag,
    /// User-Agent or, for dialog-creating methods, Contact is filled in.
    /// Requests carrying the tags of a known dialog are sent within it.
    pub async fn send_request(&self, mut request: Request) -> DialogResult<TransactionKey> {
        self.ensure_running()?;
        if request.method == Method::Ack {
            return Err(DialogError::protocol_error("ACK is sent with send_ack"));
        }
        if let Some(id) = outgoing_dialog_id(&request) {
            if self.inner.dialogs.contains_key(&id) {
                return self.send_in_dialog_request(&id, request).await;
            }
        }

        ensure_from_tag(&mut request);
        self.add_user_agent(&mut request);
        if request.method.creates_dialog() {
            self.ensure_contact(&mut request)?;
        }
        let destination = next_hop(&request)?;
        let key = self.inner.transactions.prepare_request(&mut request)?;

        let pending_key = if request.method.creates_dialog() && request.to_tag().is_none() {
            self.track_pending(&key, &request, destination)
        } else {
            None
        };

        debug!(id = %key, method = %request.method, %destination, "Sending request");
        if let Err(e) = self.inner.transactions.send_request(request, destination).await {
            if let Some(pending_key) = pending_key {
                self.inner.pending.remove(&pending_key);
                self.inner.pending_transactions.remove(&key);
            }
            return Err(e.into());
        }
        Ok(key)
    }

    /// Builds the next request within a dialog. Target refresh requests get
    /// our Contact.
    pub fn create_request(&self, id: &DialogId, method: Method) -> DialogResult<Request> {
        let dialog = self.find_dialog(id)?;
        let mut request = dialog.lock().create_request(method)?;
        if request.method.is_target_refresh() {
            self.ensure_contact(&mut request)?;
        }
        self.add_user_agent(&mut request);
        Ok(request)
    }

    /// Sends a request built by [`DialogManager::create_request`] to the
    /// dialog's next hop
    pub async fn send_in_dialog_request(&self, id: &DialogId, mut request: Request) -> DialogResult<TransactionKey> {
        self.ensure_running()?;
        if request.method == Method::Ack {
            return Err(DialogError::protocol_error("ACK is sent with send_ack"));
        }
        let destination = {
            let dialog = self.find_dialog(id)?;
            let dialog = dialog.lock();
            if dialog.is_terminated() {
                return Err(DialogError::InvalidState {
                    id: id.clone(),
                    state: dialog.state,
                    message: format!("cannot send {}", request.method),
                });
            }
            dialog.destination()
        };
        self.add_user_agent(&mut request);
        let key = self.inner.transactions.prepare_request(&mut request)?;
        // Linked before sending so a fast response finds its dialog
        self.inner.transaction_dialogs.insert(key.clone(), id.clone());

        debug!(dialog = %id, id = %key, method = %request.method, %destination, "Sending request within dialog");
        if let Err(e) = self.inner.transactions.send_request(request, destination).await {
            self.inner.transaction_dialogs.remove(&key);
            return Err(e.into());
        }
        Ok(key)
    }

    /// Cancels a pending INVITE we sent
    pub async fn cancel(&self, invite: &TransactionKey) -> DialogResult<TransactionKey> {
        self.ensure_running()?;
        Ok(self.inner.transactions.cancel(invite).await?)
    }

    /// ACK for the 2xx to the dialog's last INVITE, for applications that
    /// turned `auto_ack_2xx` off. A body may be added before sending it
    /// with [`DialogManager::send_ack`].
    pub fn create_ack(&self, id: &DialogId) -> DialogResult<Request> {
        let dialog = self.find_dialog(id)?;
        let dialog = dialog.lock();
        let cseq = dialog.invite_cseq.ok_or_else(|| DialogError::InvalidState {
            id: id.clone(),
            state: dialog.state,
            message: "no INVITE was sent in this dialog".to_string(),
        })?;
        let mut ack = dialog.create_ack(cseq);
        self.add_user_agent(&mut ack);
        Ok(ack)
    }

    /// Sends an ACK for a 2xx and caches it for 2xx retransmissions
    pub async fn send_ack(&self, id: &DialogId, ack: Request) -> DialogResult<()> {
        self.ensure_running()?;
        if ack.method != Method::Ack {
            return Err(DialogError::protocol_error(format!("{} is not an ACK", ack.method)));
        }
        let cseq = ack
            .cseq()
            .map(|c| c.seq)
            .ok_or_else(|| DialogError::protocol_error("ACK lacks CSeq"))?;
        let destination = self.find_dialog(id)?.lock().destination();
        self.transmit_ack(id, cseq, ack, destination).await
    }

    pub(crate) async fn send_2xx_ack(&self, id: &DialogId, cseq: u32) -> DialogResult<()> {
        let (mut ack, destination) = {
            let dialog = self.find_dialog(id)?;
            let dialog = dialog.lock();
            (dialog.create_ack(cseq), dialog.destination())
        };
        self.add_user_agent(&mut ack);
        self.transmit_ack(id, cseq, ack, destination).await
    }

    async fn transmit_ack(&self, id: &DialogId, cseq: u32, mut ack: Request, destination: SocketAddr) -> DialogResult<()> {
        // The ACK for a 2xx is its own transaction: fresh Via branch
        self.inner.transactions.prepare_request(&mut ack)?;
        self.inner.acks.insert(
            id.clone(),
            CachedAck {
                cseq,
                ack: ack.clone(),
                destination,
            },
        );
        debug!(dialog = %id, cseq, %destination, "Sending ACK for 2xx");
        self.inner
            .transactions
            .send_stateless(Message::Request(ack), destination)
            .await?;
        Ok(())
    }

    /// Sends a response through the server transaction `key`.
    ///
    /// A 1xx (other than 100) or 2xx to a dialog-creating request creates
    /// the UAS dialog; a to-tag and Contact are added when missing. A 2xx
    /// to INVITE is retransmitted until its ACK arrives.
    pub async fn send_response(&self, key: &TransactionKey, mut response: Response) -> DialogResult<()> {
        self.ensure_running()?;
        let request = self
            .inner
            .transactions
            .original_request(key)
            .ok_or_else(|| DialogError::Transaction(sipline_transaction_core::Error::TransactionNotFound(key.clone())))?;
        let source = self.inner.transactions.remote_addr(key);
        let status = response.status;

        let mut dialog_id = self.dialog_for_transaction(key);
        if request.method.creates_dialog() && request.to_tag().is_none() {
            if status.is_final() && !status.is_success() {
                if let Some(id) = &dialog_id {
                    self.terminate_early(id, TerminationReason::Rejected(status));
                }
            } else if status.as_u16() > 100 {
                let tag = dialog_id
                    .as_ref()
                    .map(|id| id.local_tag.clone())
                    .unwrap_or_else(generate_tag);
                set_to_tag(&mut response, tag);
                self.ensure_contact(&mut response)?;
                let source = source.ok_or_else(|| DialogError::protocol_error("transaction lost its peer address"))?;
                dialog_id = Some(self.establish_uas_dialog(key, &request, &response, source)?);
            }
        }

        self.inner.transactions.send_response(key, response.clone()).await?;

        if status.is_success() && request.method == Method::Invite {
            if let (Some(id), Some(destination)) = (dialog_id, source) {
                let cseq = request.cseq().map(|c| c.seq).unwrap_or_default();
                self.spawn_2xx_retransmission(id, cseq, response, destination);
            }
        }
        Ok(())
    }

    fn establish_uas_dialog(
        &self,
        key: &TransactionKey,
        request: &Request,
        response: &Response,
        source: SocketAddr,
    ) -> DialogResult<DialogId> {
        let id = DialogId::from_outgoing_response(response)
            .ok_or_else(|| DialogError::protocol_error("response lacks Call-ID or tags"))?;
        match self.inner.dialogs.entry(id.clone()) {
            Entry::Occupied(entry) => {
                if response.status.is_success() && entry.get().lock().confirm() {
                    info!(dialog = %id, "Dialog confirmed");
                }
            }
            Entry::Vacant(entry) => {
                let mut dialog = Dialog::new_uas(request, response, source)?;
                dialog.terminate_on_bye = self.inner.config.terminate_on_bye;
                info!(dialog = %id, state = %dialog.state, method = %dialog.method, "Dialog created");
                entry.insert(Arc::new(Mutex::new(dialog)));
            }
        }
        self.inner.transaction_dialogs.insert(key.clone(), id.clone());
        Ok(id)
    }

    /// Marks a dialog terminated without sending anything. A confirmed
    /// INVITE dialog should be ended with a BYE instead.
    pub fn terminate_dialog(&self, id: &DialogId) -> DialogResult<()> {
        self.find_dialog(id)?;
        self.end_dialog(id, TerminationReason::Local);
        Ok(())
    }

    /// Whether a received BYE ends the dialog
    pub fn set_terminate_on_bye(&self, id: &DialogId, terminate: bool) -> DialogResult<()> {
        self.find_dialog(id)?.lock().terminate_on_bye = terminate;
        Ok(())
    }

    /// Terminates the dialog and reports it; false if it already was
    pub(crate) fn end_dialog(&self, id: &DialogId, reason: TerminationReason) -> bool {
        let Some(dialog) = self.inner.dialogs.get(id).map(|entry| entry.value().clone()) else {
            return false;
        };
        {
            let mut dialog = dialog.lock();
            if dialog.is_terminated() {
                return false;
            }
            dialog.terminate();
        }
        info!(dialog = %id, ?reason, "Dialog terminated");
        self.inner.acks.remove(id);
        self.inner.awaiting_ack.remove(id);
        self.dispatch(ListenerEvent::DialogTerminated(DialogTerminatedEvent {
            dialog_id: id.clone(),
            reason,
        }));
        self.schedule_dialog_removal(id.clone(), dialog);
        true
    }

    /// Terminates the dialog only while it is still early
    pub(crate) fn terminate_early(&self, id: &DialogId, reason: TerminationReason) {
        if self.dialog_state(id) == Some(DialogState::Early) {
            self.end_dialog(id, reason);
        }
    }

    fn schedule_dialog_removal(&self, id: DialogId, dialog: Arc<Mutex<Dialog>>) {
        let manager = self.clone();
        let linger = self.inner.config.dialog_linger;
        tokio::spawn(async move {
            if linger > Duration::ZERO {
                tokio::time::sleep(linger).await;
            }
            if manager
                .inner
                .dialogs
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &dialog))
                .is_some()
            {
                debug!(dialog = %id, "Dialog removed");
            }
        });
    }

    fn track_pending(&self, key: &TransactionKey, request: &Request, destination: SocketAddr) -> Option<(String, String)> {
        let pending_key = (request.call_id()?.to_string(), request.from_tag()?.to_string());
        self.inner.pending.insert(
            pending_key.clone(),
            Arc::new(PendingRequest {
                key: key.clone(),
                request: request.clone(),
                destination,
                dialogs: Mutex::new(Vec::new()),
            }),
        );
        self.inner.pending_transactions.insert(key.clone(), pending_key.clone());
        Some(pending_key)
    }

    fn add_user_agent(&self, request: &mut Request) {
        if let Some(user_agent) = &self.inner.config.user_agent {
            if !request.headers.contains(&HeaderName::UserAgent) {
                request
                    .headers
                    .push(Header::new(HeaderName::UserAgent, HeaderValue::Text(user_agent.clone())));
            }
        }
    }

    /// Adds a Contact pointing at our transport, with the user of From
    /// (requests) or To (responses)
    fn ensure_contact(&self, message: &mut impl ContactTarget) -> DialogResult<()> {
        if message.has_contact() {
            return Ok(());
        }
        let local = self.local_addr()?;
        let mut uri = Uri::sip(local.ip().to_string()).with_port(local.port());
        uri.user = message.local_user();
        message.set_contact(Address::new(uri));
        Ok(())
    }
}

/// Messages that carry our Contact
trait ContactTarget {
    fn has_contact(&self) -> bool;
    fn local_user(&self) -> Option<String>;
    fn set_contact(&mut self, contact: Address);
}

impl ContactTarget for Request {
    fn has_contact(&self) -> bool {
        self.headers.contains(&HeaderName::Contact)
    }

    fn local_user(&self) -> Option<String> {
        self.from_address().and_then(|from| from.uri.user.clone())
    }

    fn set_contact(&mut self, contact: Address) {
        self.headers
            .push(Header::new(HeaderName::Contact, HeaderValue::AddressList(vec![contact])));
    }
}

impl ContactTarget for Response {
    fn has_contact(&self) -> bool {
        self.headers.contains(&HeaderName::Contact)
    }

    fn local_user(&self) -> Option<String> {
        self.to_address().and_then(|to| to.uri.user.clone())
    }

    fn set_contact(&mut self, contact: Address) {
        self.headers
            .push(Header::new(HeaderName::Contact, HeaderValue::AddressList(vec![contact])));
    }
}

/// Dialog of a request we send: the From tag is ours
fn outgoing_dialog_id(request: &Request) -> Option<DialogId> {
    Some(DialogId::new(request.call_id()?, request.from_tag()?, request.to_tag()?))
}

fn ensure_from_tag(request: &mut Request) {
    if let Some(header) = request.headers.get_mut(&HeaderName::From) {
        if let HeaderValue::Address(from) = &mut header.value {
            if from.tag().is_none() {
                from.set_tag(generate_tag());
            }
        }
    }
}

pub(crate) fn set_to_tag(response: &mut Response, tag: String) {
    if let Some(header) = response.headers.get_mut(&HeaderName::To) {
        if let HeaderValue::Address(to) = &mut header.value {
            if to.tag().is_none() {
                to.set_tag(tag);
            }
        }
    }
}

/// First Route, else the Request-URI
fn next_hop(request: &Request) -> DialogResult<SocketAddr> {
    let target = request
        .routes()
        .first()
        .copied()
        .map(|route| &route.uri)
        .unwrap_or(&request.uri);
    target.socket_addr().ok_or_else(|| {
        warn!(%target, "Next hop is not an IP address");
        DialogError::Unroutable(target.to_string())
    })
}
