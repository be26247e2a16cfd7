//! State and packet plumbing shared by the server and client game phases.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tickwire_core::{BufferPool, PooledBlock};
use tickwire_shared::{CommandId, HostSettings};

use super::world::SharedWorld;
use crate::codec::{BitReader, Message, Stream};
use crate::command::{
    CommandChannel, CommandDisposition, CommandRegistry, CommandStats, CommandType,
    ControllerCommandHeader, EntityCommandHeader, EntityMessage,
};
use crate::error::{CommandError, CommandResult, ConnectionResult};
use crate::prediction::{ControllerStats, DynController};
use crate::snapshot::Frame;
use crate::sync::{TickClock, TickStats, TickSync};

/// Leading header of every game packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GameHeader {
    /// Sender's local tick.
    pub tick: i32,
    /// Highest command id the sender has received.
    pub ack: CommandId,
}

impl Message for GameHeader {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_i32(&mut self.tick) && stream.exchange_delta_u32(&mut self.ack.0, 1)
    }
}

/// What command handlers work on.
pub(crate) struct GameContext {
    pub(crate) controller: Box<dyn DynController>,
    pub(crate) world: SharedWorld,
    /// Association commands raised while the receive queue drains.
    pub(crate) associations: Vec<EntityMessage>,
}

/// Registers the handlers both ends share.
pub(crate) fn register_shared_handlers(registry: &mut CommandRegistry<GameContext>) {
    registry.register(
        CommandType::ControllerCommand,
        |context: &mut GameContext, reader: &mut BitReader<'_>, id: CommandId, disposition: CommandDisposition| {
            let mut header = ControllerCommandHeader::default();
            header.exchange(reader);
            reader.check()?;
            context.controller.on_controller_command(header, id, disposition, reader)
        },
    );

    registry.register(
        CommandType::EntityCommand,
        |context: &mut GameContext, reader: &mut BitReader<'_>, id: CommandId, disposition: CommandDisposition| {
            let mut header = EntityCommandHeader::default();
            header.exchange(reader);
            reader.check()?;
            context.world.lock().on_entity_command(&header, id, disposition, reader)
        },
    );
}

/// Rejects an association payload with an unknown direction byte.
pub(crate) fn association_error(message: &EntityMessage) -> CommandError {
    CommandError::Handler(format!(
        "unknown association {} for entity {}",
        message.data, message.entity
    ))
}

/// Counters of one game phase.
#[derive(Clone, Copy, Debug)]
pub struct GameStats {
    /// Local tick.
    pub local_tick: i32,
    /// Remote tick estimate.
    pub remote_tick: Option<i32>,
    /// Frames held in the cache.
    pub frames: usize,
    /// Game packets sent.
    pub packets_sent: u64,
    /// Game packets read.
    pub packets_received: u64,
    /// Game packets rejected as malformed.
    pub packets_rejected: u64,
    /// Command channel counters.
    pub commands: CommandStats,
    /// Controller counters.
    pub controller: ControllerStats,
    /// Tick timing.
    pub ticks: TickStats,
}

/// Everything a game phase owns regardless of role.
pub(crate) struct GameSession {
    pub(crate) clock: TickClock,
    pub(crate) sync: TickSync,
    pub(crate) commands: CommandChannel,
    pub(crate) registry: CommandRegistry<GameContext>,
    pub(crate) context: GameContext,
    /// Oldest first.
    pub(crate) frames: VecDeque<Frame>,
    pub(crate) frame_cache_count: usize,
    pub(crate) max_packet_size: usize,
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) packets_sent: u64,
    pub(crate) packets_received: u64,
    pub(crate) packets_rejected: u64,
}

impl GameSession {
    pub(crate) fn new(
        settings: &HostSettings,
        registry: CommandRegistry<GameContext>,
        context: GameContext,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            clock: TickClock::new(settings.tick_duration(), settings.send_rate_ticks()),
            sync: TickSync::new(settings.send_rate_ticks()),
            commands: CommandChannel::new(&settings.commands),
            registry,
            context,
            frames: VecDeque::new(),
            frame_cache_count: settings.frame_cache_count,
            max_packet_size: settings.max_packet_size,
            pool,
            packets_sent: 0,
            packets_received: 0,
            packets_rejected: 0,
        }
    }

    /// Forgets the remote clock and every cached frame.
    pub(crate) fn enter(&mut self) {
        self.sync.reset();
        self.frames.clear();
    }

    pub(crate) fn remove_old_frames(&mut self) {
        while self.frames.len() > self.frame_cache_count {
            self.frames.pop_front();
        }
    }

    pub(crate) fn frame_index(&self, tick: i32) -> Option<usize> {
        self.frames.iter().position(|frame| frame.tick() == tick)
    }

    /// Queues a command, reporting any evicted one to the handlers.
    pub(crate) fn send_command(
        &mut self,
        command_type: CommandType,
        payload: &mut dyn Message,
    ) -> CommandResult<CommandId> {
        let mut sink = self.registry.sink(&mut self.context);
        self.commands.send(command_type, payload, &mut sink)
    }

    pub(crate) fn ack_commands(&mut self, ack: CommandId) {
        let mut sink = self.registry.sink(&mut self.context);
        self.commands.ack(ack, &mut sink);
    }

    /// Runs the handlers for every received command, then sends the
    /// association commands they raised.
    pub(crate) fn process_commands(&mut self) {
        let mut sink = self.registry.sink(&mut self.context);
        self.commands.process_commands(&mut sink);
        self.flush_associations();
    }

    pub(crate) fn flush_associations(&mut self) {
        for mut message in std::mem::take(&mut self.context.associations) {
            if let Err(error) = self.send_command(CommandType::AssociateEntityWithController, &mut message) {
                tracing::error!("Could not send association for {}: {}", message.entity, error);
            }
        }
    }

    /// Buffer for one outgoing packet.
    pub(crate) fn alloc_packet(&self) -> ConnectionResult<PooledBlock> {
        Ok(self.pool.alloc(self.max_packet_size)?)
    }

    pub(crate) fn stats(&self) -> GameStats {
        GameStats {
            local_tick: self.clock.tick(),
            remote_tick: self.sync.remote_tick(),
            frames: self.frames.len(),
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            packets_rejected: self.packets_rejected,
            commands: *self.commands.stats(),
            controller: self.context.controller.stats(),
            ticks: *self.clock.stats(),
        }
    }
}

/// An encoded packet waiting for the transport.
#[derive(Debug)]
pub(crate) struct EncodedPacket {
    pub(crate) block: PooledBlock,
    pub(crate) len: usize,
}

/// One role's half of the game protocol.
///
/// The provided [`GamePhase::update`] runs the fixed-step loop: read every
/// packet received since the last call, then for each due tick advance the
/// remote estimate, simulate, and send on send ticks.
pub(crate) trait GamePhase {
    fn session(&self) -> &GameSession;

    fn session_mut(&mut self) -> &mut GameSession;

    /// Reads one game packet.
    fn read_packet(&mut self, data: &[u8]) -> ConnectionResult<()>;

    /// Simulates local tick `tick`.
    fn tick(&mut self, tick: i32);

    /// Encodes the packet for local tick `tick`.
    fn write_packet(&mut self, tick: i32) -> ConnectionResult<EncodedPacket>;

    fn update<'a>(
        &mut self,
        elapsed: Duration,
        packets: impl IntoIterator<Item = &'a [u8]>,
        outgoing: &mut Vec<EncodedPacket>,
    ) {
        self.session_mut().clock.advance(elapsed);

        for data in packets {
            match self.read_packet(data) {
                Ok(()) => self.session_mut().packets_received += 1,
                Err(error) => {
                    self.session_mut().packets_rejected += 1;
                    tracing::debug!("Rejected game packet of {} bytes: {}", data.len(), error);
                }
            }
        }

        while let Some(step) = self.session_mut().clock.next_tick() {
            let start = self.session().clock.begin_tick();
            self.session_mut().sync.update();
            self.tick(step.tick);

            if step.send {
                match self.write_packet(step.tick) {
                    Ok(packet) => {
                        self.session_mut().packets_sent += 1;
                        outgoing.push(packet);
                    }
                    Err(error) => tracing::error!("Could not write packet for tick {}: {}", step.tick, error),
                }
            }
            self.session_mut().clock.end_tick(start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pack, unpack};

    #[test]
    fn test_game_header_round_trip() {
        let mut sent = GameHeader {
            tick: 1200,
            ack: CommandId(17),
        };
        let mut buffer = [0u8; 16];
        let len = pack(&mut sent, &mut buffer).unwrap();

        let mut received = GameHeader::default();
        unpack(&mut received, &buffer[..len]).unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_game_header_without_ack() {
        let mut sent = GameHeader {
            tick: 1,
            ack: CommandId::NONE,
        };
        let mut buffer = [0u8; 16];
        let len = pack(&mut sent, &mut buffer).unwrap();

        let mut received = GameHeader {
            tick: 0,
            ack: CommandId(5),
        };
        unpack(&mut received, &buffer[..len]).unwrap();
        assert_eq!(received.ack, CommandId::NONE);
    }
}
