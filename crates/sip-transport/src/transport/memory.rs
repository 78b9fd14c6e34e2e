//! In-process network.
//!
//! A [`MemoryNetwork`] connects any number of [`MemoryTransport`] endpoints
//! by socket address. Sent messages are serialized and parsed again on
//! delivery, so they go through the same wire format as a real socket.
//! An outbound filter can drop messages to simulate loss.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use sipline_sip_core::{Message, MessageParser};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Decides whether an outbound message is delivered (`true`) or dropped
pub type OutboundFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Shared routing table of an in-memory network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<SocketAddr, mpsc::Sender<TransportEvent>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an endpoint at `addr`.
    ///
    /// `reliable` only changes what the endpoint reports through
    /// [`Transport::is_reliable`]; delivery itself is always lossless unless
    /// a filter drops the message.
    pub fn bind(&self, addr: SocketAddr, reliable: bool) -> Result<(MemoryTransport, mpsc::Receiver<TransportEvent>)> {
        self.bind_with_parser(addr, reliable, MessageParser::default())
    }

    pub fn bind_with_parser(
        &self,
        addr: SocketAddr,
        reliable: bool,
        parser: MessageParser,
    ) -> Result<(MemoryTransport, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        match self.endpoints.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::BindFailed {
                    addr,
                    source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address already bound"),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(events_tx);
            }
        }
        debug!(%addr, reliable, "Memory transport bound");

        let transport = MemoryTransport {
            inner: Arc::new(MemoryTransportInner {
                addr,
                reliable,
                network: self.clone(),
                parser,
                filter: RwLock::new(None),
                sent: Mutex::new(Vec::new()),
                dropped: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        };
        Ok((transport, events_rx))
    }

    pub fn is_bound(&self, addr: &SocketAddr) -> bool {
        self.endpoints.contains_key(addr)
    }
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

/// One endpoint of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryTransportInner>,
}

struct MemoryTransportInner {
    addr: SocketAddr,
    reliable: bool,
    network: MemoryNetwork,
    parser: MessageParser,
    filter: RwLock<Option<OutboundFilter>>,
    sent: Mutex<Vec<(SocketAddr, Message)>>,
    dropped: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Installs a filter consulted for every outbound message
    pub fn set_outbound_filter<F>(&self, filter: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        *self.inner.filter.write() = Some(Arc::new(filter));
    }

    pub fn clear_outbound_filter(&self) {
        *self.inner.filter.write() = None;
    }

    /// Every message handed to the network, including dropped ones, in order
    pub fn sent_messages(&self) -> Vec<(SocketAddr, Message)> {
        self.inner.sent.lock().clone()
    }

    /// Number of messages the filter dropped
    pub fn dropped_count(&self) -> usize {
        self.inner.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.addr)
    }

    fn is_reliable(&self) -> bool {
        self.inner.reliable
    }

    async fn send_bytes(&self, data: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let message = self.inner.parser.parse(&data)?;
        self.inner.sent.lock().push((destination, message.clone()));

        let filter = self.inner.filter.read().clone();
        if let Some(filter) = filter {
            if !filter(&message) {
                self.inner.dropped.fetch_add(1, Ordering::SeqCst);
                trace!(from = %self.inner.addr, to = %destination, "Outbound filter dropped message");
                return Ok(());
            }
        }

        let peer = self
            .inner
            .network
            .endpoints
            .get(&destination)
            .map(|entry| entry.value().clone())
            .ok_or(Error::Unreachable(destination))?;

        trace!(from = %self.inner.addr, to = %destination, bytes = data.len(), "Delivering in-memory message");
        peer.send(TransportEvent::MessageReceived {
            message,
            source: self.inner.addr,
            destination,
        })
        .await
        .map_err(|_| Error::Unreachable(destination))
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            if let Some((_, events)) = self.inner.network.endpoints.remove(&self.inner.addr) {
                let _ = events.send(TransportEvent::Closed).await;
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryTransport({}, reliable={})", self.inner.addr, self.inner.reliable)
    }
}
