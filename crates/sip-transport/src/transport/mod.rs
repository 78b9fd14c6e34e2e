pub mod memory;
#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "udp")]
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use sipline_sip_core::Message;

use crate::error::Result;

/// Events emitted by a transport on its event channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete SIP message arrived
    MessageReceived {
        message: Message,
        /// Peer that sent it
        source: SocketAddr,
        /// Local address it arrived on
        destination: SocketAddr,
    },

    /// Bytes from `source` that do not form a SIP message
    MalformedMessage {
        source: SocketAddr,
        error: sipline_sip_core::Error,
    },

    /// Receiving failed at the socket level
    Error { error: String },

    /// The transport stopped receiving
    Closed,
}

/// Message-oriented transport used by the transaction layer.
///
/// Implementations are cheap to share behind an `Arc` and safe to call from
/// many transaction tasks at once.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Stream transports deliver reliably; retransmission timers are only
    /// armed when this is `false`
    fn is_reliable(&self) -> bool;

    /// Sends already serialized bytes.
    ///
    /// Stream transports return once the bytes are written, so a send on a
    /// connection the peer closed fails here.
    async fn send_bytes(&self, data: Bytes, destination: SocketAddr) -> Result<()>;

    /// Serializes and sends a message
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        self.send_bytes(message.to_bytes(), destination).await
    }

    /// Stops receiving; later sends fail with [`crate::Error::TransportClosed`]
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Transport token used in Via headers
    fn via_transport(&self) -> &'static str {
        if self.is_reliable() {
            "TCP"
        } else {
            "UDP"
        }
    }
}
