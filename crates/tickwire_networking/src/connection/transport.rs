//! # Transport Seam
//!
//! The connection layer needs three things from the network: send a packet
//! unreliably, send a packet reliably, and poll for peer events.
//!
//! [`LoopbackTransport`] implements the seam in memory over crossbeam
//! channels, for tests and single-process demos.

use std::collections::HashMap;
use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{ConnectionError, ConnectionResult};

/// Transport-assigned peer handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Delivery guarantee of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// May be lost, duplicated or reordered. Game packets.
    Unreliable,
    /// Delivered once, in order. Handshake packets.
    Reliable,
}

/// Something that happened on the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer connected.
    Connected(PeerId),
    /// A peer disconnected cleanly.
    Disconnected(PeerId),
    /// A peer stopped responding.
    TimedOut(PeerId),
    /// A packet arrived.
    Received {
        /// Sender.
        peer: PeerId,
        /// Delivery mode it was sent with.
        delivery: Delivery,
        /// Packet bytes.
        data: Vec<u8>,
    },
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Reliable packets among those sent.
    pub reliable_sent: u64,
    /// Send errors.
    pub send_errors: u64,
}

impl TransportStats {
    fn record_send(&mut self, delivery: Delivery, len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += len as u64;
        if delivery == Delivery::Reliable {
            self.reliable_sent += 1;
        }
    }
}

/// Packet transport used by a [`ConnectionManager`](super::ConnectionManager).
pub trait Transport: Send {
    /// Sends a packet that may be lost.
    ///
    /// # Errors
    ///
    /// Fails if the peer is unknown or the packet can't be handed off.
    fn send_unreliable(&mut self, peer: PeerId, data: &[u8]) -> ConnectionResult<()>;

    /// Sends a packet that will arrive once and in order.
    ///
    /// # Errors
    ///
    /// Fails if the peer is unknown or the packet can't be handed off.
    fn send_reliable(&mut self, peer: PeerId, data: &[u8]) -> ConnectionResult<()>;

    /// Takes the next pending event, if any.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Closes the link to `peer`. Both ends see a disconnect event.
    fn disconnect(&mut self, peer: PeerId);

    /// Counters.
    fn stats(&self) -> TransportStats;
}

/// One direction of an in-memory link.
#[derive(Debug)]
struct Link {
    /// Inbox of the remote endpoint.
    remote: Sender<TransportEvent>,
    /// Our id as seen by the remote endpoint.
    alias: PeerId,
}

/// In-memory transport endpoint.
///
/// Every endpoint owns an inbox; [`LoopbackTransport::connect`] links two
/// endpoints both ways and queues a connect event on each side. Packets are
/// never lost or reordered.
///
/// ```rust,ignore
/// let mut server = LoopbackTransport::new();
/// let mut client = LoopbackTransport::new();
/// let server_peer = client.connect(&mut server);
///
/// client.send_reliable(server_peer, b"hello")?;
/// while let Some(event) = server.poll_event() { /* Connected, Received */ }
/// ```
#[derive(Debug)]
pub struct LoopbackTransport {
    inbox_tx: Sender<TransportEvent>,
    inbox_rx: Receiver<TransportEvent>,
    links: HashMap<PeerId, Link>,
    next_peer: u32,
    stats: TransportStats,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    /// Creates an endpoint with no links.
    #[must_use]
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            inbox_tx,
            inbox_rx,
            links: HashMap::new(),
            next_peer: 1,
            stats: TransportStats::default(),
        }
    }

    fn allocate_peer(&mut self) -> PeerId {
        let peer = PeerId(self.next_peer);
        self.next_peer = self.next_peer.wrapping_add(1).max(1);
        peer
    }

    /// Links this endpoint with `remote` and returns the handle this side
    /// uses for it.
    pub fn connect(&mut self, remote: &mut LoopbackTransport) -> PeerId {
        let local_view = self.allocate_peer();
        let remote_view = remote.allocate_peer();

        self.links.insert(
            local_view,
            Link {
                remote: remote.inbox_tx.clone(),
                alias: remote_view,
            },
        );
        remote.links.insert(
            remote_view,
            Link {
                remote: self.inbox_tx.clone(),
                alias: local_view,
            },
        );

        // Own inboxes are alive as long as `self` and `remote` are.
        let _ = self.inbox_tx.send(TransportEvent::Connected(local_view));
        let _ = remote.inbox_tx.send(TransportEvent::Connected(remote_view));
        tracing::debug!("Loopback link {} <-> {}", local_view, remote_view);
        local_view
    }

    /// Number of live links.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.links.len()
    }

    fn send(&mut self, peer: PeerId, delivery: Delivery, data: &[u8]) -> ConnectionResult<()> {
        let Some(link) = self.links.get(&peer) else {
            self.stats.send_errors += 1;
            return Err(ConnectionError::Transport(format!("unknown {peer}")));
        };

        let event = TransportEvent::Received {
            peer: link.alias,
            delivery,
            data: data.to_vec(),
        };
        if link.remote.send(event).is_err() {
            self.stats.send_errors += 1;
            return Err(ConnectionError::Transport(format!("{peer} endpoint closed")));
        }

        self.stats.record_send(delivery, data.len());
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn send_unreliable(&mut self, peer: PeerId, data: &[u8]) -> ConnectionResult<()> {
        self.send(peer, Delivery::Unreliable, data)
    }

    fn send_reliable(&mut self, peer: PeerId, data: &[u8]) -> ConnectionResult<()> {
        self.send(peer, Delivery::Reliable, data)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.inbox_rx.try_recv().ok()?;
        match &event {
            TransportEvent::Received { data, .. } => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += data.len() as u64;
            }
            TransportEvent::Disconnected(peer) | TransportEvent::TimedOut(peer) => {
                self.links.remove(peer);
            }
            TransportEvent::Connected(_) => {}
        }
        Some(event)
    }

    fn disconnect(&mut self, peer: PeerId) {
        let Some(link) = self.links.remove(&peer) else {
            return;
        };
        let _ = link.remote.send(TransportEvent::Disconnected(link.alias));
        let _ = self.inbox_tx.send(TransportEvent::Disconnected(peer));
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        for link in self.links.values() {
            let _ = link.remote.send(TransportEvent::TimedOut(link.alias));
        }
    }
}
