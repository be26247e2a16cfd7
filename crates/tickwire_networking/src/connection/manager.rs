//! Connection bookkeeping of one host.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tickwire_core::BufferPool;
use tickwire_shared::HostSettings;

use super::transport::{Delivery, PeerId, Transport, TransportEvent};
use super::world::SharedWorld;
use super::{Connection, ControllerFactory, Role};
use crate::error::ConnectionError;
use crate::prediction::DynController;
use crate::sync::TickClock;

/// Blocks pre-allocated per buffer size class.
const POOL_BLOCKS_PER_CLASS: usize = 8;

/// Host counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Connections accepted.
    pub accepted: u64,
    /// Connections refused at the limit.
    pub rejected: u64,
    /// Connections closed by either end.
    pub closed: u64,
    /// Connections that timed out.
    pub timed_out: u64,
    /// World ticks run by a server host.
    pub world_ticks: u64,
    /// Packets the transport refused.
    pub send_failures: u64,
}

/// Owns the transport, the world and every connection of a host.
///
/// A server host ticks its world once per local tick; each connection only
/// snapshots it. A client host leaves ticking to its connection, which runs
/// the world on the remote clock.
pub struct ConnectionManager<T: Transport> {
    role: Role,
    transport: T,
    settings: Arc<HostSettings>,
    world: SharedWorld,
    controllers: Arc<ControllerFactory>,
    pool: Arc<BufferPool>,
    connections: BTreeMap<PeerId, Connection>,
    clock: TickClock,
    stats: ManagerStats,
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("role", &self.role)
            .field("connections", &self.connections.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a host over `transport`.
    ///
    /// `controllers` builds the controller of every connection that
    /// completes its handshake.
    pub fn new<F>(role: Role, transport: T, settings: HostSettings, world: SharedWorld, controllers: F) -> Self
    where
        F: Fn(Role) -> Box<dyn DynController> + Send + Sync + 'static,
    {
        let largest = settings.max_packet_size.max(settings.max_reliable_packet_size);
        let max_pow2 = largest.next_power_of_two().trailing_zeros();
        let clock = TickClock::new(settings.tick_duration(), settings.send_rate_ticks());

        Self {
            role,
            transport,
            settings: Arc::new(settings),
            world,
            controllers: Arc::new(controllers),
            pool: Arc::new(BufferPool::new(max_pow2, POOL_BLOCKS_PER_CLASS)),
            connections: BTreeMap::new(),
            clock,
            stats: ManagerStats::default(),
        }
    }

    /// Role of this host.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Host settings.
    #[must_use]
    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// The host's world.
    #[must_use]
    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    /// Packet buffer pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably. Used to open links.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    /// Live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no peer is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connection to `peer`.
    #[must_use]
    pub fn connection(&self, peer: PeerId) -> Option<&Connection> {
        self.connections.get(&peer)
    }

    /// Connection to `peer`, mutably.
    pub fn connection_mut(&mut self, peer: PeerId) -> Option<&mut Connection> {
        self.connections.get_mut(&peer)
    }

    /// Every connection, by peer.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.values()
    }

    /// Runs the host for `elapsed` wall time: route transport events, tick
    /// the world on a server, update every connection and flush its packets.
    pub fn update(&mut self, elapsed: Duration) {
        while let Some(event) = self.transport.poll_event() {
            self.handle_event(event);
        }

        if self.role == Role::Server {
            self.clock.advance(elapsed);
            while let Some(step) = self.clock.next_tick() {
                self.world.lock().tick(step.tick);
                self.stats.world_ticks += 1;
            }
        }

        for connection in self.connections.values_mut() {
            connection.update(elapsed);
        }
        self.flush();
    }

    /// Closes every connection.
    pub fn shutdown(&mut self) {
        let peers: Vec<PeerId> = self.connections.keys().copied().collect();
        for peer in peers {
            self.transport.disconnect(peer);
            self.remove(peer);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(peer) => self.accept(peer),
            TransportEvent::Disconnected(peer) => {
                if self.remove(peer) {
                    tracing::info!("{} disconnected", peer);
                }
            }
            TransportEvent::TimedOut(peer) => {
                if self.remove(peer) {
                    tracing::info!("{} timed out", peer);
                    self.stats.timed_out += 1;
                }
            }
            TransportEvent::Received { peer, delivery, data } => match self.connections.get_mut(&peer) {
                Some(connection) => connection.on_packet(delivery, data),
                None => tracing::debug!("Packet from unknown {}", peer),
            },
        }
    }

    fn accept(&mut self, peer: PeerId) {
        if self.connections.len() >= self.settings.max_connections {
            tracing::warn!("Refusing {}: {}", peer, ConnectionError::Full(self.settings.max_connections));
            self.stats.rejected += 1;
            self.transport.disconnect(peer);
            return;
        }

        let mut connection = Connection::new(
            peer,
            self.role,
            Arc::clone(&self.settings),
            Arc::clone(&self.world),
            Arc::clone(&self.controllers),
            Arc::clone(&self.pool),
        );
        connection.on_connect();
        self.connections.insert(peer, connection);
        self.stats.accepted += 1;
        tracing::info!("{} connected to {}", peer, self.role);
    }

    fn remove(&mut self, peer: PeerId) -> bool {
        let Some(mut connection) = self.connections.remove(&peer) else {
            return false;
        };
        connection.dispose();
        self.stats.closed += 1;
        true
    }

    fn flush(&mut self) {
        for connection in self.connections.values_mut() {
            let peer = connection.peer();
            for packet in connection.take_outgoing() {
                let sent = match packet.delivery {
                    Delivery::Unreliable => self.transport.send_unreliable(peer, packet.data()),
                    Delivery::Reliable => self.transport.send_reliable(peer, packet.data()),
                };
                if let Err(error) = sent {
                    tracing::warn!("Could not send to {}: {}", peer, error);
                    self.stats.send_failures += 1;
                }
                if let Err(error) = self.pool.free(packet.block) {
                    tracing::error!("Could not return packet buffer: {}", error);
                }
            }
        }
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        for connection in self.connections.values_mut() {
            connection.dispose();
        }
    }
}
