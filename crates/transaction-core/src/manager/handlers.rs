use std::net::SocketAddr;

use sipline_sip_core::prelude::{Message, Method, Request, Response, ResponseBuilder, SipMessage, StatusCode};
use tracing::{debug, trace, warn};

use super::TransactionManager;
use crate::transaction::{InternalTransactionCommand, TransactionEvent, TransactionKey, TransactionKind, TransactionState};

impl TransactionManager {
    pub(super) async fn handle_message(&self, message: Message, source: SocketAddr) {
        if let Err(error) = message.validate_mandatory() {
            warn!(%source, %error, "Rejecting message without mandatory headers");
            if let Message::Request(request) = &message {
                self.reject_malformed(request, &error, source).await;
            }
            self.emit(TransactionEvent::MalformedMessage { source, error }).await;
            return;
        }
        match message {
            Message::Request(request) => self.handle_request(request, source).await,
            Message::Response(response) => self.handle_response(response, source).await,
        }
    }

    /// Answers 400 to a request that cannot enter a transaction (RFC 3261
    /// §8.2.2). Without a top Via there is nowhere to route the response,
    /// and ACK is never answered.
    async fn reject_malformed(&self, request: &Request, error: &sipline_sip_core::Error, source: SocketAddr) {
        if request.method == Method::Ack || request.top_via().is_none() {
            return;
        }
        let reason = match error {
            sipline_sip_core::Error::MissingHeader(name) => format!("Missing {name} Header"),
            _ => "Bad Request".to_string(),
        };
        let response = ResponseBuilder::from_request(request, StatusCode::BAD_REQUEST)
            .reason(reason)
            .build();
        if let Err(e) = self.inner.transport.send_message(response.into(), source).await {
            debug!(%source, error = %e, "Could not answer malformed request");
        }
    }

    async fn handle_request(&self, request: Request, source: SocketAddr) {
        let Some(key) = TransactionKey::from_request(&request) else {
            warn!(%source, "Request without usable top Via");
            return;
        };

        let existing = self.inner.transactions.get(&key).map(|entry| entry.value().clone());
        if let Some(data) = existing {
            if data.state() != TransactionState::Terminated {
                trace!(id = %key, method = %request.method, "Request matched transaction");
                if data
                    .cmd_tx
                    .send(InternalTransactionCommand::ProcessMessage(Message::Request(request)))
                    .await
                    .is_err()
                {
                    debug!(id = %key, "Transaction loop already gone");
                }
                return;
            }
            // the ACK for a 2xx reuses the INVITE's branch when it comes
            // from an RFC 2543 peer; the dialog still has to see it
            if request.method == Method::Ack {
                self.emit(TransactionEvent::StrayRequest { request, source }).await;
            } else {
                trace!(id = %key, method = %request.method, "Absorbed by terminated transaction");
            }
            return;
        }

        match request.method {
            Method::Ack => {
                debug!(%source, call_id = ?request.call_id(), "ACK matches no transaction");
                self.emit(TransactionEvent::StrayRequest { request, source }).await;
            }
            Method::Cancel => {
                let invite_key = key.with_method(Method::Invite);
                let invite_transaction_id = self
                    .inner
                    .transactions
                    .contains_key(&invite_key)
                    .then_some(invite_key);
                if self.create_server_transaction(&key, &request, source).await {
                    self.emit(TransactionEvent::CancelReceived {
                        transaction_id: key,
                        invite_transaction_id,
                        request,
                        source,
                    })
                    .await;
                }
            }
            _ => {
                if self.create_server_transaction(&key, &request, source).await {
                    self.emit(TransactionEvent::NewRequest {
                        transaction_id: key,
                        request,
                        source,
                    })
                    .await;
                }
            }
        }
    }

    /// Returns `false` when the transaction could not be created; a racing
    /// duplicate already created it
    async fn create_server_transaction(&self, key: &TransactionKey, request: &Request, source: SocketAddr) -> bool {
        let kind = if request.method == Method::Invite {
            TransactionKind::InviteServer
        } else {
            TransactionKind::NonInviteServer
        };
        match self.insert_transaction(key.clone(), kind, request.clone(), source) {
            Ok(data) => {
                debug!(id = %key, %source, "Created server transaction");
                data.cmd_tx
                    .send(InternalTransactionCommand::TransitionTo(kind.first_state()))
                    .await
                    .is_ok()
            }
            Err(e) => {
                debug!(id = %key, error = %e, "Server transaction not created");
                false
            }
        }
    }

    async fn handle_response(&self, response: Response, source: SocketAddr) {
        let Some(key) = TransactionKey::from_response(&response) else {
            warn!(%source, "Response without branch or CSeq");
            return;
        };

        let existing = self.inner.transactions.get(&key).map(|entry| entry.value().clone());
        match existing {
            Some(data) if data.state() != TransactionState::Terminated => {
                trace!(id = %key, status = response.status.as_u16(), "Response matched transaction");
                if data
                    .cmd_tx
                    .send(InternalTransactionCommand::ProcessMessage(Message::Response(response)))
                    .await
                    .is_err()
                {
                    debug!(id = %key, "Transaction loop already gone");
                }
            }
            // 2xx retransmissions and 2xx from other forks outlive the
            // transaction; the dialog layer acknowledges them
            Some(_) if !response.status.is_success() => {
                trace!(id = %key, status = response.status.as_u16(), "Absorbed by terminated transaction");
            }
            _ => {
                debug!(id = %key, status = response.status.as_u16(), "Stray response");
                self.emit(TransactionEvent::StrayResponse { response, source }).await;
            }
        }
    }
}
