//! Transactions: identity, state, shared data and the commands that drive
//! the per-transaction event loop.

pub mod event;
pub mod key;
pub mod logic;
pub mod runner;
pub mod state;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use sipline_sip_core::prelude::{Message, Request, Response};
use sipline_sip_transport::Transport;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::Result;
use crate::timer::{TimerSettings, TimerType};

pub use event::TransactionEvent;
pub use key::TransactionKey;
pub use state::{AtomicTransactionState, TransactionKind, TransactionState};

/// Commands processed, one at a time, by a transaction's event loop
#[derive(Debug)]
pub enum InternalTransactionCommand {
    TransitionTo(TransactionState),
    /// A message from the network matched this transaction
    ProcessMessage(Message),
    /// The TU answers a server transaction
    SendResponse {
        response: Response,
        reply: oneshot::Sender<Result<()>>,
    },
    /// A timer fired; ignored unless `generation` is still current
    Timer { timer: TimerType, generation: u64 },
    /// The transport failed outside of the transaction's own sends
    TransportError(String),
    Terminate,
}

/// Everything a transaction shares between its event loop and the manager
pub struct TransactionData {
    pub key: TransactionKey,
    pub kind: TransactionKind,
    pub state: Arc<AtomicTransactionState>,
    /// The request that created the transaction
    pub request: Request,
    /// Where requests (client) or responses (server) are sent
    pub remote_addr: SocketAddr,
    pub transport: Arc<dyn Transport>,
    pub events_tx: mpsc::Sender<TransactionEvent>,
    pub cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    pub timers: TimerSettings,
    pub reliable: bool,
    pub send_trying: bool,
}

impl TransactionData {
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Sends a message to the remote side of this transaction
    pub async fn send(&self, message: Message) -> Result<()> {
        trace!(id = %self.key, destination = %self.remote_addr, "Transaction sending message");
        self.transport.send_message(message, self.remote_addr).await?;
        Ok(())
    }

    pub async fn send_request(&self) -> Result<()> {
        self.send(Message::Request(self.request.clone())).await
    }

    /// Reports an event to the TU. A closed event channel only means nobody
    /// listens any more.
    pub async fn emit(&self, event: TransactionEvent) {
        if self.events_tx.send(event).await.is_err() {
            trace!(id = %self.key, "TU event channel closed");
        }
    }
}

impl fmt::Debug for TransactionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionData")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("state", &self.state.get())
            .field("remote_addr", &self.remote_addr)
            .field("reliable", &self.reliable)
            .finish()
    }
}
