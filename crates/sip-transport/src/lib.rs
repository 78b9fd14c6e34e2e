//! SIP transport layer for the sipline stack
//!
//! A [`Transport`] sends serialized messages to a socket address and reports
//! everything it receives as [`TransportEvent`]s on the channel returned when
//! it was bound. Three implementations are provided:
//!
//! - [`UdpTransport`]: one datagram per message, unreliable
//! - [`TcpTransport`]: stream framing by Content-Length, reliable
//! - [`MemoryTransport`]: an in-process network used by tests and simulations

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::memory::{MemoryNetwork, MemoryTransport, OutboundFilter};
#[cfg(feature = "tcp")]
pub use transport::tcp::TcpTransport;
#[cfg(feature = "udp")]
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport with the default parser configuration
#[cfg(feature = "udp")]
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, sipline_sip_core::MessageParser::default(), None).await
}

/// Bind a TCP transport with the default parser configuration and
/// connection caching enabled
#[cfg(feature = "tcp")]
pub async fn bind_tcp(
    addr: std::net::SocketAddr,
) -> Result<(TcpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    TcpTransport::bind(addr, sipline_sip_core::MessageParser::default(), None, true).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{Error, MemoryNetwork, MemoryTransport, Result, Transport, TransportEvent};
    #[cfg(feature = "tcp")]
    pub use crate::{bind_tcp, TcpTransport};
    #[cfg(feature = "udp")]
    pub use crate::{bind_udp, UdpTransport};
}
