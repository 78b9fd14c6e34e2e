use thiserror::Error;
use tokio::sync::mpsc;

use crate::transaction::{TransactionKey, TransactionState};

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transaction layer
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    #[error("Transaction already exists: {0}")]
    TransactionExists(TransactionKey),

    #[error("Invalid state transition for {kind}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        kind: &'static str,
        from: TransactionState,
        to: TransactionState,
    },

    /// The operation is not allowed in the transaction's current state
    #[error("Transaction {key} is in state {state:?}: {message}")]
    InvalidState {
        key: TransactionKey,
        state: TransactionState,
        message: String,
    },

    /// The message lacks what is needed to match or build a transaction
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Transport error: {0}")]
    Transport(#[from] sipline_sip_transport::Error),

    #[error("SIP error: {0}")]
    Sip(#[from] sipline_sip_core::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Transaction manager is shut down")]
    ShutDown,
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed(e.to_string())
    }
}

impl Error {
    /// `true` for failures reported by the transport rather than by the
    /// transaction layer itself
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
