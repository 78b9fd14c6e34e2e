use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sipline_sip_core::{IncrementalParser, MessageParser};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Outbound queue per connection
const WRITE_QUEUE_CAPACITY: usize = 32;

const READ_CHUNK_SIZE: usize = 8192;

/// Bytes for a connection's writer and where to report the outcome of
/// writing them
type WriteRequest = (Bytes, oneshot::Sender<io::Result<()>>);

/// TCP transport for SIP messages.
///
/// Messages are framed with an [`IncrementalParser`] (Content-Length is
/// mandatory on streams). Accepted connections are always kept so that
/// responses travel back over the connection the request arrived on.
/// Outbound connections are reused for later sends only when connection
/// caching is enabled.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpTransportInner>,
}

struct TcpTransportInner {
    local_addr: SocketAddr,
    parser: MessageParser,
    connections: DashMap<SocketAddr, mpsc::Sender<WriteRequest>>,
    cache_connections: bool,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl TcpTransport {
    /// Binds a listener and starts accepting connections
    pub async fn bind(
        addr: SocketAddr,
        parser: MessageParser,
        channel_capacity: Option<usize>,
        cache_connections: bool,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("SIP TCP transport bound to {}", local_addr);

        let (shutdown, _) = watch::channel(false);
        let transport = TcpTransport {
            inner: Arc::new(TcpTransportInner {
                local_addr,
                parser,
                connections: DashMap::new(),
                cache_connections,
                closed: AtomicBool::new(false),
                shutdown,
                events_tx,
            }),
        };

        transport.spawn_accept_loop(listener);

        Ok((transport, events_rx))
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let transport = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "Accepted TCP connection");
                            transport.spawn_connection(stream, peer, true);
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting TCP connection");
                            let _ = transport.inner.events_tx.send(TransportEvent::Error {
                                error: format!("Error accepting connection: {}", e),
                            }).await;
                        }
                    },
                }
            }
            let _ = transport.inner.events_tx.send(TransportEvent::Closed).await;
            info!("TCP accept loop terminated");
        });
    }

    /// Starts the reader and writer tasks of one connection and returns the
    /// queue feeding its writer.
    ///
    /// The writer stops when the reader sees the connection end, so a
    /// closed peer fails later sends instead of swallowing them.
    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, register: bool) -> mpsc::Sender<WriteRequest> {
        let (mut reader, mut writer) = stream.into_split();
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriteRequest>(WRITE_QUEUE_CAPACITY);
        let (reader_done_tx, mut reader_done) = oneshot::channel::<()>();
        if register {
            self.inner.connections.insert(peer, writer_tx.clone());
        }

        tokio::spawn(async move {
            loop {
                let (buf, ack) = tokio::select! {
                    _ = &mut reader_done => break,
                    next = writer_rx.recv() => match next {
                        Some(request) => request,
                        None => break,
                    },
                };
                let written = writer.write_all(&buf).await;
                let failed = written.is_err();
                if let Err(e) = &written {
                    warn!(%peer, error = %e, "TCP write error");
                }
                let _ = ack.send(written);
                if failed {
                    break;
                }
            }
            // queued requests see their acknowledgement dropped
            drop(writer_rx);
            let _ = writer.shutdown().await;
        });

        let inner = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let writer_handle = writer_tx.clone();
        tokio::spawn(async move {
            let mut framer = IncrementalParser::new(inner.parser.clone());
            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            'read: loop {
                let read = tokio::select! {
                    _ = shutdown_rx.changed() => break 'read,
                    read = reader.read(&mut chunk) => read,
                };
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        trace!(%peer, bytes = n, "TCP read");
                        framer.feed(&chunk[..n]);
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "TCP read error");
                        let _ = inner.events_tx.send(TransportEvent::Error {
                            error: format!("Read error on connection to {}: {}", peer, e),
                        }).await;
                        break;
                    }
                }

                loop {
                    match framer.next_message() {
                        Ok(Some(message)) => {
                            let event = TransportEvent::MessageReceived {
                                message,
                                source: peer,
                                destination: inner.local_addr,
                            };
                            if inner.events_tx.send(event).await.is_err() {
                                break 'read;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // framing is lost; the connection cannot be resynchronized
                            warn!(%peer, error = %e, "Closing TCP connection after framing error");
                            let _ = inner.events_tx.send(TransportEvent::MalformedMessage {
                                source: peer,
                                error: e,
                            }).await;
                            break 'read;
                        }
                    }
                }
            }

            // only drop the entry if it still belongs to this connection
            inner
                .connections
                .remove_if(&peer, |_, sender| sender.same_channel(&writer_handle));
            drop(reader_done_tx);
            debug!(%peer, "TCP connection closed");
        });

        writer_tx
    }

    async fn connect(&self, destination: SocketAddr) -> Result<mpsc::Sender<WriteRequest>> {
        let stream = TcpStream::connect(destination)
            .await
            .map_err(|source| Error::ConnectFailed { destination, source })?;
        debug!(%destination, cached = self.inner.cache_connections, "Opened TCP connection");
        Ok(self.spawn_connection(stream, destination, self.inner.cache_connections))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn is_reliable(&self) -> bool {
        true
    }

    async fn send_bytes(&self, data: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let existing = self
            .inner
            .connections
            .get(&destination)
            .map(|entry| entry.value().clone());
        let sender = match existing {
            Some(sender) if !sender.is_closed() => sender,
            _ => self.connect(destination).await?,
        };

        debug!(%destination, bytes = data.len(), "Sending SIP message over TCP");
        let broken = || Error::SendFailed {
            destination,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"),
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        sender.send((data, ack_tx)).await.map_err(|_| broken())?;
        match ack_rx.await {
            Ok(written) => written.map_err(|source| Error::SendFailed { destination, source }),
            Err(_) => Err(broken()),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.shutdown.send_replace(true);
            self.inner.connections.clear();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TcpTransport({}, {} connections)",
            self.inner.local_addr,
            self.inner.connections.len()
        )
    }
}
