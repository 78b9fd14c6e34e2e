use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sipline_sip_core::MessageParser;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Largest UDP payload
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl UdpTransport {
    /// Binds a UDP socket and starts the receive loop.
    ///
    /// Every datagram is parsed as one message with `parser`.
    pub async fn bind(
        addr: SocketAddr,
        parser: MessageParser,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::BindFailed { addr, source })?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: Arc::new(socket),
                local_addr,
                closed: AtomicBool::new(false),
                shutdown,
            }),
        };

        transport.spawn_receive_loop(parser, events_tx, shutdown_rx);

        Ok((transport, events_rx))
    }

    // Spawns a task to receive packets from the UDP socket
    fn spawn_receive_loop(
        &self,
        parser: MessageParser,
        events_tx: mpsc::Sender<TransportEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let socket = self.inner.socket.clone();
        let local_addr = self.inner.local_addr;

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (len, src) = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = socket.recv_from(&mut buf) => match result {
                        Ok(received) => received,
                        Err(e) => {
                            error!(error = %e, "Error receiving UDP packet");
                            let event = TransportEvent::Error {
                                error: format!("Error receiving packet: {}", e),
                            };
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    },
                };

                let packet = &buf[..len];
                // NAT keep-alives and stray padding
                if packet.iter().all(|b| matches!(b, b'\r' | b'\n' | 0)) {
                    trace!(%src, "Ignoring keep-alive datagram");
                    continue;
                }

                debug!(%src, bytes = len, "Received SIP datagram");
                let event = match parser.parse(packet) {
                    Ok(message) => TransportEvent::MessageReceived {
                        message,
                        source: src,
                        destination: local_addr,
                    },
                    Err(e) => {
                        warn!(%src, error = %e, "Error parsing SIP message");
                        TransportEvent::MalformedMessage { source: src, error: e }
                    }
                };
                if let Err(e) = events_tx.send(event).await {
                    error!("Error sending event: {}", e);
                    break;
                }
            }

            let _ = events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn is_reliable(&self) -> bool {
        false
    }

    async fn send_bytes(&self, data: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                limit: MAX_DATAGRAM_SIZE,
            });
        }

        debug!(%destination, bytes = data.len(), "Sending SIP datagram");
        self.inner
            .socket
            .send_to(&data, destination)
            .await
            .map_err(|source| Error::SendFailed { destination, source })?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            let _ = self.inner.shutdown.send(true);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
