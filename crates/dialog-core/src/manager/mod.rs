//! Dialog Manager Module
//!
//! The [`DialogManager`] sits between the transaction layer and the
//! application. It keeps the dialog table, turns transaction events into
//! listener callbacks and owns the parts of RFC 3261 that outlive a single
//! transaction: the ACK for a 2xx, 2xx retransmission on the UAS side and
//! routing of requests within a dialog.
//!
//! ```text
//!  TransactionManager ── TransactionEvent ──▶ event loop ──▶ Dispatcher ──▶ SipListener
//!          ▲                                     │
//!          └──────── requests / responses ◀──────┴── DialogManager API
//! ```

mod dialog_operations;
mod event_processing;
mod protocol_handlers;
mod response_lifecycle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use sipline_sip_core::prelude::{MessageParser, Request};
use sipline_sip_transport::{TcpTransport, Transport, TransportEvent, UdpTransport};
use sipline_transaction_core::{TransactionEvent, TransactionKey, TransactionManager};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::config::DialogManagerConfig;
use crate::dialog::{Dialog, DialogId, DialogState};
use crate::errors::{DialogError, DialogResult};
use crate::listener::dispatcher::{Dispatcher, ListenerEvent};
use crate::listener::SipListener;

/// Call-ID and From tag of a request we sent outside of any dialog
pub(crate) type PendingKey = (String, String);

/// A dialog-creating request waiting for responses. Forking may answer it
/// with several to-tags, each creating its own dialog.
pub(crate) struct PendingRequest {
    pub key: TransactionKey,
    pub request: Request,
    pub destination: SocketAddr,
    pub dialogs: Mutex<Vec<DialogId>>,
}

/// ACK sent for a 2xx, resent when the 2xx is retransmitted
#[derive(Clone)]
pub(crate) struct CachedAck {
    pub cseq: u32,
    pub ack: Request,
    pub destination: SocketAddr,
}

/// A 2xx we are retransmitting until its ACK arrives. Dropping `stop` ends
/// the retransmission task.
pub(crate) struct PendingAck {
    pub cseq: u32,
    pub stop: oneshot::Sender<()>,
}

/// Entry point of the dialog layer.
///
/// Cheap to clone; all clones share one dialog table.
#[derive(Clone)]
pub struct DialogManager {
    inner: Arc<DialogManagerInner>,
}

pub(crate) struct DialogManagerInner {
    pub config: DialogManagerConfig,
    pub transactions: TransactionManager,
    pub transaction_events: Mutex<Option<mpsc::Receiver<TransactionEvent>>>,
    pub dialogs: DashMap<DialogId, Arc<Mutex<Dialog>>>,
    /// Transactions sent or received within a dialog
    pub transaction_dialogs: DashMap<TransactionKey, DialogId>,
    pub pending: DashMap<PendingKey, Arc<PendingRequest>>,
    pub pending_transactions: DashMap<TransactionKey, PendingKey>,
    pub acks: DashMap<DialogId, CachedAck>,
    pub awaiting_ack: DashMap<DialogId, PendingAck>,
    pub dispatcher: OnceLock<Dispatcher>,
    pub shutdown: watch::Sender<bool>,
    pub running: AtomicBool,
}

impl DialogManager {
    /// Creates a manager on top of an already bound transport. Nothing is
    /// delivered until [`DialogManager::start`] installs a listener.
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        config: DialogManagerConfig,
    ) -> Self {
        let (transactions, events) = TransactionManager::new(transport, transport_rx, config.transaction.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(DialogManagerInner {
                config,
                transactions,
                transaction_events: Mutex::new(Some(events)),
                dialogs: DashMap::new(),
                transaction_dialogs: DashMap::new(),
                pending: DashMap::new(),
                pending_transactions: DashMap::new(),
                acks: DashMap::new(),
                awaiting_ack: DashMap::new(),
                dispatcher: OnceLock::new(),
                shutdown,
                running: AtomicBool::new(true),
            }),
        }
    }

    /// Binds a UDP transport to `config.local_address`
    pub async fn bind_udp(config: DialogManagerConfig) -> DialogResult<Self> {
        config.validate().map_err(DialogError::Configuration)?;
        let parser = MessageParser::new(config.parser_config());
        let (transport, rx) = UdpTransport::bind(config.local_address, parser, None).await?;
        Ok(Self::new(Arc::new(transport), rx, config))
    }

    /// Binds a TCP transport to `config.local_address`
    pub async fn bind_tcp(config: DialogManagerConfig) -> DialogResult<Self> {
        config.validate().map_err(DialogError::Configuration)?;
        let parser = MessageParser::new(config.parser_config());
        let (transport, rx) =
            TcpTransport::bind(config.local_address, parser, None, config.cache_connections).await?;
        Ok(Self::new(Arc::new(transport), rx, config))
    }

    /// Installs the listener and starts processing transaction events.
    /// Can only be called once.
    pub fn start(&self, listener: Arc<dyn SipListener>) -> DialogResult<()> {
        self.ensure_running()?;
        let events = self
            .inner
            .transaction_events
            .lock()
            .take()
            .ok_or_else(|| DialogError::configuration("dialog manager already started"))?;
        let dispatcher = Dispatcher::new(listener, self.inner.config.reentrant_listener);
        debug!(?dispatcher, "Listener installed");
        // The receiver was still present, so this is the only initialization
        let _ = self.inner.dispatcher.set(dispatcher);
        self.spawn_event_loop(events);
        info!(local = ?self.local_addr().ok(), "Dialog manager started");
        Ok(())
    }

    pub fn config(&self) -> &DialogManagerConfig {
        &self.inner.config
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    pub fn local_addr(&self) -> DialogResult<SocketAddr> {
        Ok(self.inner.transactions.transport().local_addr()?)
    }

    /// Snapshot of a dialog
    pub fn dialog(&self, id: &DialogId) -> Option<Dialog> {
        self.inner.dialogs.get(id).map(|entry| entry.value().lock().clone())
    }

    pub fn dialog_state(&self, id: &DialogId) -> Option<DialogState> {
        self.inner.dialogs.get(id).map(|entry| entry.value().lock().state)
    }

    /// Dialogs in the table, lingering terminated ones included
    pub fn dialog_count(&self) -> usize {
        self.inner.dialogs.len()
    }

    pub fn dialog_ids(&self) -> Vec<DialogId> {
        self.inner.dialogs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Dialog a transaction was sent or received in
    pub fn dialog_for_transaction(&self, key: &TransactionKey) -> Option<DialogId> {
        self.inner.transaction_dialogs.get(key).map(|entry| entry.value().clone())
    }

    /// Stops event processing, pending 2xx retransmissions and every
    /// transaction
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(dialogs = self.inner.dialogs.len(), "Shutting down dialog manager");
        self.inner.shutdown.send_replace(true);
        self.inner.awaiting_ack.clear();
        self.inner.transactions.shutdown().await;
    }

    pub(crate) fn ensure_running(&self) -> DialogResult<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DialogError::NotRunning)
        }
    }

    pub(crate) fn dispatch(&self, event: ListenerEvent) {
        match self.inner.dispatcher.get() {
            Some(dispatcher) => dispatcher.dispatch(event),
            None => debug!("No listener installed, event dropped"),
        }
    }

    pub(crate) fn find_dialog(&self, id: &DialogId) -> DialogResult<Arc<Mutex<Dialog>>> {
        self.inner
            .dialogs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DialogError::DialogNotFound(id.clone()))
    }
}

impl std::fmt::Debug for DialogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogManager")
            .field("dialogs", &self.inner.dialogs.len())
            .field("pending", &self.inner.pending.len())
            .field("running", &self.inner.running.load(Ordering::SeqCst))
            .finish()
    }
}
