use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised by transports
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send to {destination}: {source}")]
    SendFailed {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {destination}: {source}")]
    ConnectFailed {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No endpoint listens at the destination (in-memory network)
    #[error("Destination unreachable: {0}")]
    Unreachable(SocketAddr),

    #[error("Transport is closed")]
    TransportClosed,

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Invalid SIP message: {0}")]
    Parse(#[from] sipline_sip_core::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// `true` when the peer could not be reached at all, as opposed to a
    /// local failure
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::Unreachable(_) | Error::ConnectFailed { .. } | Error::SendFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
