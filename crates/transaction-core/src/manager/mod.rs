//! # Transaction Manager
//!
//! Owns the transaction table and the link to the transport. Incoming
//! messages are matched to transactions (RFC 3261 §17.1.3, §17.2.3) and
//! forwarded into their event loops; requests that match nothing create
//! server transactions; what belongs to no transaction is reported to the
//! TU as stray.
//!
//! ```text
//!  transport events ──▶ TransactionManager ──▶ per-transaction loop ──▶ transport
//!                              │                        │
//!                              └──── TransactionEvent ◀─┘
//! ```

mod handlers;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sipline_sip_core::prelude::{
    generate_branch, Header, HeaderName, HeaderValue, Message, Method, Request, Response, SipMessage, Via,
};
use sipline_sip_transport::{Transport, TransportEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::builders::build_cancel;
use crate::client::{ClientInviteLogic, ClientNonInviteLogic};
use crate::config::TransactionConfig;
use crate::error::{Error, Result};
use crate::server::{ServerInviteLogic, ServerNonInviteLogic};
use crate::transaction::runner::run_transaction_loop;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TransactionData, TransactionEvent, TransactionKey,
    TransactionKind, TransactionState,
};

/// Entry point of the transaction layer.
///
/// Cheap to clone; all clones share one transaction table.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    transactions: DashMap<TransactionKey, Arc<TransactionData>>,
    events_tx: mpsc::Sender<TransactionEvent>,
    config: TransactionConfig,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

impl TransactionManager {
    /// Creates a manager reading from `transport_rx` and returns the channel
    /// on which the TU receives [`TransactionEvent`]s
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        config: TransactionConfig,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let manager = Self {
            inner: Arc::new(ManagerInner {
                transport,
                transactions: DashMap::new(),
                events_tx,
                config,
                shutdown,
                running: AtomicBool::new(true),
            }),
        };
        manager.spawn_transport_loop(transport_rx);
        (manager, events_rx)
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    fn spawn_transport_loop(&self, mut transport_rx: mpsc::Receiver<TransportEvent>) {
        let manager = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = transport_rx.recv() => event,
                };
                match event {
                    Some(TransportEvent::MessageReceived { message, source, .. }) => {
                        manager.handle_message(message, source).await;
                    }
                    Some(TransportEvent::MalformedMessage { source, error }) => {
                        debug!(%source, %error, "Transport dropped an unparseable message");
                        manager.emit(TransactionEvent::MalformedMessage { source, error }).await;
                    }
                    Some(TransportEvent::Error { error }) => {
                        warn!(%error, "Transport failed to receive");
                        manager.emit(TransactionEvent::ReceiveError { error }).await;
                    }
                    Some(TransportEvent::Closed) | None => {
                        info!("Transport closed, transaction manager stops receiving");
                        break;
                    }
                }
            }
        });
    }

    async fn emit(&self, event: TransactionEvent) {
        if self.inner.events_tx.send(event).await.is_err() {
            trace!("TU event channel closed");
        }
    }

    /// Sends a request through a new client transaction.
    ///
    /// A missing top Via is added and a missing branch generated. ACK is not
    /// a transaction; send it with [`TransactionManager::send_stateless`].
    pub async fn send_request(&self, mut request: Request, destination: SocketAddr) -> Result<TransactionKey> {
        self.ensure_running()?;
        if request.method == Method::Ack {
            return Err(Error::InvalidMessage("ACK is sent outside of transactions".to_string()));
        }
        let key = self.prepare_request(&mut request)?;
        let kind = if request.method == Method::Invite {
            TransactionKind::InviteClient
        } else {
            TransactionKind::NonInviteClient
        };

        let data = self.insert_transaction(key.clone(), kind, request, destination)?;
        debug!(id = %key, %destination, "Created client transaction");
        data.cmd_tx
            .send(InternalTransactionCommand::TransitionTo(kind.first_state()))
            .await?;
        Ok(key)
    }

    /// Adds the top Via, or the branch it lacks, the way
    /// [`TransactionManager::send_request`] does, and returns the key the
    /// client transaction for `request` will have. Also stamps the Via of
    /// a stateless ACK.
    pub fn prepare_request(&self, request: &mut Request) -> Result<TransactionKey> {
        self.ensure_via(request)?;
        TransactionKey::for_outgoing(request)
            .ok_or_else(|| Error::InvalidMessage("request has no branch".to_string()))
    }

    /// Sends a response through the server transaction `key`
    pub async fn send_response(&self, key: &TransactionKey, response: Response) -> Result<()> {
        let data = self.get(key)?;
        if data.state() == TransactionState::Terminated {
            return Err(Error::InvalidState {
                key: key.clone(),
                state: TransactionState::Terminated,
                message: "transaction already terminated".to_string(),
            });
        }
        let (reply, reply_rx) = oneshot::channel();
        data.cmd_tx
            .send(InternalTransactionCommand::SendResponse { response, reply })
            .await?;
        reply_rx
            .await
            .map_err(|_| Error::ChannelClosed("transaction ended before answering".to_string()))?
    }

    /// Sends a message without a transaction: ACK for 2xx, 2xx
    /// retransmissions and replies to stray requests
    pub async fn send_stateless(&self, message: Message, destination: SocketAddr) -> Result<()> {
        self.ensure_running()?;
        trace!(%destination, "Sending stateless message");
        self.inner.transport.send_message(message, destination).await?;
        Ok(())
    }

    /// Cancels a pending INVITE client transaction (RFC 3261 §9.1).
    ///
    /// The CANCEL runs as its own non-INVITE client transaction, whose key
    /// is returned. Only allowed once a provisional response arrived.
    pub async fn cancel(&self, invite_key: &TransactionKey) -> Result<TransactionKey> {
        let data = self.get(invite_key)?;
        if data.kind != TransactionKind::InviteClient {
            return Err(Error::InvalidMessage(format!("{invite_key} is not an INVITE client transaction")));
        }
        let state = data.state();
        if state != TransactionState::Proceeding {
            return Err(Error::InvalidState {
                key: invite_key.clone(),
                state,
                message: "CANCEL requires a provisional response and no final one".to_string(),
            });
        }
        let cancel = build_cancel(&data.request)?;
        self.send_request(cancel, data.remote_addr).await
    }

    /// Terminates a transaction at once, without waiting for its timers
    pub async fn terminate(&self, key: &TransactionKey) -> Result<()> {
        let data = self.get(key)?;
        data.cmd_tx.send(InternalTransactionCommand::Terminate).await?;
        Ok(())
    }

    pub fn transaction_state(&self, key: &TransactionKey) -> Option<TransactionState> {
        self.inner.transactions.get(key).map(|entry| entry.state())
    }

    pub fn transaction_kind(&self, key: &TransactionKey) -> Option<TransactionKind> {
        self.inner.transactions.get(key).map(|entry| entry.kind)
    }

    /// The request that created the transaction
    pub fn original_request(&self, key: &TransactionKey) -> Option<Request> {
        self.inner.transactions.get(key).map(|entry| entry.request.clone())
    }

    pub fn remote_addr(&self, key: &TransactionKey) -> Option<SocketAddr> {
        self.inner.transactions.get(key).map(|entry| entry.remote_addr)
    }

    pub fn transaction_exists(&self, key: &TransactionKey) -> bool {
        self.inner.transactions.contains_key(key)
    }

    /// Transactions in the table, lingering ones included
    pub fn transaction_count(&self) -> usize {
        self.inner.transactions.len()
    }

    /// Terminates every transaction and stops reading from the transport
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(count = self.inner.transactions.len(), "Shutting down transaction manager");
        self.inner.shutdown.send_replace(true);
        let live: Vec<_> = self
            .inner
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for data in live {
            let _ = data.cmd_tx.send(InternalTransactionCommand::Terminate).await;
        }
        self.inner.transactions.clear();
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShutDown)
        }
    }

    fn get(&self, key: &TransactionKey) -> Result<Arc<TransactionData>> {
        self.inner
            .transactions
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))
    }

    fn ensure_via(&self, request: &mut Request) -> Result<()> {
        let top = request.headers.iter_mut().find_map(|h| match &mut h.value {
            HeaderValue::Via(vias) => vias.first_mut(),
            _ => None,
        });
        match top {
            Some(via) => {
                if via.branch().is_none() {
                    via.set_branch(generate_branch());
                }
            }
            None => {
                let local = self.inner.transport.local_addr()?;
                let via = Via::new(
                    self.inner.transport.via_transport(),
                    local.ip().to_string(),
                    Some(local.port()),
                    generate_branch(),
                );
                request
                    .headers
                    .push_front(Header::new(HeaderName::Via, HeaderValue::Via(vec![via])));
            }
        }
        Ok(())
    }

    /// Creates the transaction atomically and starts its event loop
    fn insert_transaction(
        &self,
        key: TransactionKey,
        kind: TransactionKind,
        request: Request,
        remote_addr: SocketAddr,
    ) -> Result<Arc<TransactionData>> {
        let slot = match self.inner.transactions.entry(key.clone()) {
            Entry::Occupied(_) => return Err(Error::TransactionExists(key)),
            Entry::Vacant(slot) => slot,
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(self.inner.config.command_channel_capacity.max(1));
        let data = Arc::new(TransactionData {
            key: key.clone(),
            kind,
            state: Arc::new(AtomicTransactionState::new(TransactionState::Initial)),
            request,
            remote_addr,
            transport: self.inner.transport.clone(),
            events_tx: self.inner.events_tx.clone(),
            cmd_tx,
            timers: self.inner.config.timers,
            reliable: self.inner.transport.is_reliable(),
            send_trying: self.inner.config.send_trying,
        });
        slot.insert(data.clone());

        let manager = self.clone();
        let loop_data = data.clone();
        tokio::spawn(async move {
            match kind {
                TransactionKind::InviteClient => {
                    run_transaction_loop(loop_data.clone(), ClientInviteLogic::new(), cmd_rx).await
                }
                TransactionKind::NonInviteClient => {
                    run_transaction_loop(loop_data.clone(), ClientNonInviteLogic::new(), cmd_rx).await
                }
                TransactionKind::InviteServer => {
                    run_transaction_loop(loop_data.clone(), ServerInviteLogic::new(), cmd_rx).await
                }
                TransactionKind::NonInviteServer => {
                    run_transaction_loop(loop_data.clone(), ServerNonInviteLogic::new(), cmd_rx).await
                }
            }
            manager.linger_and_remove(loop_data).await;
        });
        Ok(data)
    }

    /// Keeps a terminated transaction in the table so late retransmissions
    /// still match it, then drops it
    async fn linger_and_remove(&self, data: Arc<TransactionData>) {
        let linger = self.inner.config.transaction_linger;
        if !linger.is_zero() {
            tokio::time::sleep(linger).await;
        }
        self.inner
            .transactions
            .remove_if(&data.key, |_, current| Arc::ptr_eq(current, &data));
        trace!(id = %data.key, "Transaction removed from table");
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transport", &self.inner.transport)
            .field("transactions", &self.inner.transactions.len())
            .finish()
    }
}
