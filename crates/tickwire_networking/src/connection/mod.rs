//! # Connections
//!
//! A [`Connection`] is one peer as seen by a host. It starts in the text
//! handshake over reliable packets and then switches to its role's game
//! phase, which exchanges one unreliable packet per send tick:
//!
//! ```text
//!            Connected                 JoinGame
//! (peer) ───────────────► Handshake ───────────► Server/Client game
//!                             │                         │
//!                             └──── Disconnected ───────┴──► Closed
//! ```
//!
//! The [`ConnectionManager`] owns the transport, the shared [`World`] and
//! every connection of a host, and drives them from a single `update` call.
//!
//! ```rust,ignore
//! let world = EntityWorld::new(registry).into_shared();
//! let mut server = ConnectionManager::new(Role::Server, LoopbackTransport::new(), settings, world, factory);
//!
//! loop {
//!     server.update(frame_time);
//! }
//! ```

mod client;
mod game;
mod handshake;
mod manager;
mod server;
mod transport;
mod world;

#[cfg(test)]
mod testing;

pub use game::{GameHeader, GameStats};
pub use handshake::{Handshake, HandshakeStep};
pub use manager::{ConnectionManager, ManagerStats};
pub use server::PLAYER_PREFAB;
pub use transport::{Delivery, LoopbackTransport, PeerId, Transport, TransportEvent, TransportStats};
pub use world::{
    EntityCommandHandler, EntityTicker, EntityWorld, Prefab, SharedWorld, SyncMode, World, WorldEvent,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tickwire_core::{BufferPool, PooledBlock};
use tickwire_shared::{CommandId, EntityId, HostSettings};

use self::client::ClientGame;
use self::game::{GameContext, GamePhase, GameSession};
use self::server::ServerGame;
use crate::codec::{pack, Message, TextMessage};
use crate::command::CommandType;
use crate::error::{ConnectionError, ConnectionResult};
use crate::prediction::DynController;

/// Which end of the protocol a host plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Authoritative host.
    Server,
    /// Host that predicts and interpolates.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Builds the controller of a connection entering its game phase.
pub type ControllerFactory = dyn Fn(Role) -> Box<dyn DynController> + Send + Sync;

enum Phase {
    Handshake(Handshake),
    ServerGame(Box<ServerGame>),
    ClientGame(Box<ClientGame>),
    Closed,
}

impl Phase {
    const fn name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::ServerGame(_) | Self::ClientGame(_) => "game",
            Self::Closed => "closed",
        }
    }
}

/// A packet waiting for the transport.
#[derive(Debug)]
pub(crate) struct OutgoingPacket {
    pub(crate) delivery: Delivery,
    pub(crate) block: PooledBlock,
    pub(crate) len: usize,
}

impl OutgoingPacket {
    pub(crate) fn data(&self) -> &[u8] {
        &self.block[..self.len]
    }
}

/// One peer of a host.
pub struct Connection {
    peer: PeerId,
    role: Role,
    phase: Phase,
    settings: Arc<HostSettings>,
    world: SharedWorld,
    controllers: Arc<ControllerFactory>,
    pool: Arc<BufferPool>,
    remote_name: Option<String>,
    /// Game packets received since the last update.
    incoming: Vec<Vec<u8>>,
    outgoing: Vec<OutgoingPacket>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("phase", &self.phase.name())
            .field("remote_name", &self.remote_name)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        peer: PeerId,
        role: Role,
        settings: Arc<HostSettings>,
        world: SharedWorld,
        controllers: Arc<ControllerFactory>,
        pool: Arc<BufferPool>,
    ) -> Self {
        let local_name = match role {
            Role::Server => settings.server_name.clone(),
            Role::Client => settings.player_name.clone(),
        };
        Self {
            peer,
            role,
            phase: Phase::Handshake(Handshake::new(role, local_name)),
            settings,
            world,
            controllers,
            pool,
            remote_name: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Transport handle of the peer.
    #[must_use]
    pub const fn peer(&self) -> PeerId {
        self.peer
    }

    /// Role of the local end.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether the handshake completed.
    #[must_use]
    pub const fn is_in_game(&self) -> bool {
        matches!(self.phase, Phase::ServerGame(_) | Phase::ClientGame(_))
    }

    /// Whether the connection was disposed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    /// Name the peer announced during the handshake.
    #[must_use]
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    /// Game phase counters, once in game.
    #[must_use]
    pub fn stats(&self) -> Option<GameStats> {
        self.session().map(GameSession::stats)
    }

    /// Newest frame the client confirmed. Server connections only.
    #[must_use]
    pub fn acked_snapshot_tick(&self) -> Option<i32> {
        match &self.phase {
            Phase::ServerGame(game) => Some(game.acked_snapshot_tick()),
            _ => None,
        }
    }

    /// Newest frame received. Client connections only.
    #[must_use]
    pub fn last_recv_snapshot_tick(&self) -> Option<i32> {
        match &self.phase {
            Phase::ClientGame(game) => Some(game.last_recv_snapshot_tick()),
            _ => None,
        }
    }

    /// Entities the connection's controller drives.
    #[must_use]
    pub fn associated(&self) -> Vec<EntityId> {
        self.session()
            .map(|session| session.context.controller.associated().to_vec())
            .unwrap_or_default()
    }

    /// Queues a command for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotInGame`] before the handshake completes,
    /// or the command channel's error.
    pub fn send_command(&mut self, command_type: CommandType, payload: &mut dyn Message) -> ConnectionResult<CommandId> {
        let session = self.session_mut().ok_or(ConnectionError::NotInGame)?;
        Ok(session.send_command(command_type, payload)?)
    }

    fn session(&self) -> Option<&GameSession> {
        match &self.phase {
            Phase::ServerGame(game) => Some(game.session()),
            Phase::ClientGame(game) => Some(game.session()),
            Phase::Handshake(_) | Phase::Closed => None,
        }
    }

    fn session_mut(&mut self) -> Option<&mut GameSession> {
        match &mut self.phase {
            Phase::ServerGame(game) => Some(game.session_mut()),
            Phase::ClientGame(game) => Some(game.session_mut()),
            Phase::Handshake(_) | Phase::Closed => None,
        }
    }

    /// The link came up.
    pub(crate) fn on_connect(&mut self) {
        let Phase::Handshake(handshake) = &self.phase else {
            return;
        };
        if let Some(message) = handshake.on_connect() {
            self.queue_reliable(message);
        }
    }

    /// Routes a packet from the peer.
    pub(crate) fn on_packet(&mut self, delivery: Delivery, data: Vec<u8>) {
        match (&mut self.phase, delivery) {
            (Phase::Handshake(handshake), Delivery::Reliable) => {
                let message = match Handshake::decode(&data) {
                    Ok(message) => message,
                    Err(error) => {
                        tracing::warn!("{} sent a bad handshake: {}", self.peer, error);
                        return;
                    }
                };
                tracing::debug!("Handshake from {}: {:?}", self.peer, message.text);

                let step = handshake.on_message(&message);
                let remote_name = handshake.remote_name().map(str::to_owned);
                if let Some(reply) = step.reply {
                    self.queue_reliable(reply);
                }
                if step.enter_game {
                    self.remote_name = remote_name;
                    self.enter_game();
                }
            }
            (Phase::Handshake(_), Delivery::Unreliable) => {
                tracing::trace!("Dropping game packet from {} during handshake", self.peer);
            }
            (Phase::ServerGame(_) | Phase::ClientGame(_), Delivery::Unreliable) => {
                self.incoming.push(data);
            }
            (Phase::ServerGame(_) | Phase::ClientGame(_), Delivery::Reliable) => {
                tracing::debug!("Ignoring reliable packet from {} in game", self.peer);
            }
            (Phase::Closed, _) => {}
        }
    }

    fn enter_game(&mut self) {
        let context = GameContext {
            controller: (self.controllers)(self.role),
            world: Arc::clone(&self.world),
            associations: Vec::new(),
        };
        let pool = Arc::clone(&self.pool);
        self.phase = match self.role {
            Role::Server => Phase::ServerGame(Box::new(ServerGame::new(&self.settings, context, pool))),
            Role::Client => Phase::ClientGame(Box::new(ClientGame::new(&self.settings, context, pool))),
        };
        tracing::info!(
            "{} entered the game with {}",
            self.peer,
            self.remote_name.as_deref().unwrap_or("unnamed peer")
        );
    }

    /// Runs the game phase for `elapsed` wall time.
    pub(crate) fn update(&mut self, elapsed: Duration) {
        let packets = std::mem::take(&mut self.incoming);
        let mut encoded = Vec::new();
        let received = packets.iter().map(Vec::as_slice);
        match &mut self.phase {
            Phase::ServerGame(game) => game.update(elapsed, received, &mut encoded),
            Phase::ClientGame(game) => game.update(elapsed, received, &mut encoded),
            Phase::Handshake(_) | Phase::Closed => {}
        }
        self.outgoing.extend(encoded.into_iter().map(|packet| OutgoingPacket {
            delivery: Delivery::Unreliable,
            block: packet.block,
            len: packet.len,
        }));
    }

    pub(crate) fn take_outgoing(&mut self) -> Vec<OutgoingPacket> {
        std::mem::take(&mut self.outgoing)
    }

    /// Releases everything the connection holds in the world. The
    /// connection is closed afterwards.
    pub(crate) fn dispose(&mut self) {
        match &mut self.phase {
            Phase::ServerGame(game) => game.dispose(),
            Phase::ClientGame(game) => game.dispose(),
            Phase::Handshake(_) | Phase::Closed => {}
        }
        self.phase = Phase::Closed;
        self.incoming.clear();
        for packet in std::mem::take(&mut self.outgoing) {
            if let Err(error) = self.pool.free(packet.block) {
                tracing::error!("Could not return packet buffer: {}", error);
            }
        }
    }

    fn queue_reliable(&mut self, mut message: TextMessage) {
        let mut block = match self.pool.alloc(self.settings.max_reliable_packet_size) {
            Ok(block) => block,
            Err(error) => {
                tracing::error!("No buffer for a reliable packet: {}", error);
                return;
            }
        };
        let size = self.settings.max_reliable_packet_size.min(block.len());
        match pack(&mut message, &mut block[..size]) {
            Ok(len) => self.outgoing.push(OutgoingPacket {
                delivery: Delivery::Reliable,
                block,
                len,
            }),
            Err(error) => {
                tracing::error!("Could not encode handshake for {}: {}", self.peer, error);
                if let Err(error) = self.pool.free(block) {
                    tracing::error!("Could not return packet buffer: {}", error);
                }
            }
        }
    }
}
