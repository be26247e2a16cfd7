//! Server half of the game protocol.
//!
//! ```text
//! GameHeader      tick, command ack
//! CommandHeader   count                       patched
//! ResultHeader    newest input tick, result?  patched
//! tick header     baseline frame tick
//! DeltaHeader     list presence + counts      patched
//! commands | result | delta
//! ```

use std::sync::Arc;

use tickwire_core::BufferPool;
use tickwire_shared::constants::SERVER_INPUT_DELAY;
use tickwire_shared::{EntityId, HostSettings};

use super::game::{
    register_shared_handlers, EncodedPacket, GameContext, GameHeader, GamePhase, GameSession,
};
use crate::codec::{BitReader, BitWriter, Message, Stream};
use crate::command::{
    Association, CommandDisposition, CommandHeader, CommandRegistry, CommandType, EntityMessage,
};
use crate::error::{CommandError, ConnectionResult};
use crate::prediction::InputHeader;
use crate::snapshot::{revert_unsent, write_delta, DeltaFrame, DeltaHeader, Frame, SnapshotTickHeader};

/// Prefab spawned for a client on [`CommandType::SpawnPlayer`].
pub const PLAYER_PREFAB: &str = "Player";

/// Command handlers of a server connection.
pub(crate) fn server_registry() -> CommandRegistry<GameContext> {
    let mut registry = CommandRegistry::new();
    register_shared_handlers(&mut registry);

    registry.register(
        CommandType::SpawnPlayer,
        |context: &mut GameContext, _reader: &mut BitReader<'_>, id, disposition| {
            if disposition != CommandDisposition::Received {
                return Ok(());
            }
            if !context.controller.associated().is_empty() {
                tracing::warn!("Ignoring {}: player already spawned", id);
                return Ok(());
            }

            let entity = {
                let mut world = context.world.lock();
                let prefab = world
                    .prefab_by_name(PLAYER_PREFAB)
                    .ok_or_else(|| CommandError::Handler(format!("no prefab named {PLAYER_PREFAB}")))?;
                let entity = world
                    .spawn(prefab)
                    .map_err(|error| CommandError::Handler(error.to_string()))?;
                world.set_controlled(entity.id, true);
                entity
            };

            context.controller.associate(entity.id);
            context
                .associations
                .push(EntityMessage::association(entity.id, Association::Link));
            tracing::info!("Spawned player {}", entity.id);
            Ok(())
        },
    );

    registry.register(
        CommandType::AssociateEntityWithController,
        |context: &mut GameContext, reader: &mut BitReader<'_>, id, disposition| {
            let mut message = EntityMessage::default();
            message.exchange(reader);
            reader.check()?;

            match disposition {
                CommandDisposition::Received => {
                    tracing::warn!("Client sent association {} for {}", id, message.entity);
                }
                CommandDisposition::Acked => {
                    tracing::debug!("Association of {} confirmed", message.entity);
                }
                CommandDisposition::Dropped => {
                    // Resend while it still describes the controller.
                    let linked = context.controller.associated().contains(&message.entity);
                    let still_valid = match Association::try_from(message.data) {
                        Ok(Association::Link) => linked,
                        Ok(Association::Unlink) => !linked,
                        Err(_) => false,
                    };
                    tracing::warn!("Association of {} dropped, resending: {}", message.entity, still_valid);
                    if still_valid {
                        context.associations.push(message);
                    }
                }
            }
            Ok(())
        },
    );

    registry
}

/// Server game phase of one connection.
pub(crate) struct ServerGame {
    session: GameSession,
    delta: DeltaFrame,
    /// Baseline used when the client has nothing usable acknowledged.
    empty: Frame,
    /// Newest frame the client confirmed; `0` before the first.
    acked_snapshot_tick: i32,
    window_ticks: i32,
}

impl ServerGame {
    pub(crate) fn new(settings: &HostSettings, context: GameContext, pool: Arc<BufferPool>) -> Self {
        let registry = Arc::clone(context.world.lock().registry());
        let mut game = Self {
            session: GameSession::new(settings, server_registry(), context, pool),
            delta: DeltaFrame::new(),
            empty: Frame::new(registry, 0),
            acked_snapshot_tick: 0,
            window_ticks: settings.delta_frame_window_ticks(),
        };
        game.session.enter();
        game
    }

    pub(crate) const fn acked_snapshot_tick(&self) -> i32 {
        self.acked_snapshot_tick
    }

    /// Client confirmed the frame of `tick`. Older frames can't become a
    /// baseline any more.
    fn ack(&mut self, tick: i32) {
        if tick <= self.acked_snapshot_tick {
            return;
        }
        let Some(index) = self.session.frame_index(tick) else {
            return;
        };
        self.acked_snapshot_tick = tick;
        self.session.frames.drain(..index);
    }

    /// Unlinks associated entities the world no longer holds.
    fn drop_vanished_associations(&mut self) {
        let context = &mut self.session.context;
        let vanished: Vec<EntityId> = {
            let world = context.world.lock();
            context
                .controller
                .associated()
                .iter()
                .copied()
                .filter(|&id| world.state(id).is_none())
                .collect()
        };

        for id in vanished {
            tracing::debug!("Player entity {} vanished", id);
            context.controller.deassociate(id);
            context
                .associations
                .push(EntityMessage::association(id, Association::Unlink));
        }
        self.session.flush_associations();
    }

    /// Releases the player entity. Called once when the connection goes away.
    pub(crate) fn dispose(&mut self) {
        let context = &mut self.session.context;
        let associated = context.controller.associated().to_vec();
        {
            let mut world = context.world.lock();
            for id in associated {
                context.controller.deassociate(id);
                world.set_controlled(id, false);
                if world.destroy(id) {
                    tracing::debug!("Destroyed player entity {}", id);
                }
            }
        }
        self.session.frames.clear();
        self.session.commands.clear();
    }

    fn encode(&mut self, tick: i32, buffer: &mut [u8]) -> ConnectionResult<usize> {
        let mut dst = {
            let world = self.session.context.world.lock();
            Frame::capture(Arc::clone(world.registry()), tick, world.states())?
        };

        let acked = self.acked_snapshot_tick;
        let baseline = self
            .session
            .frame_index(acked)
            .filter(|_| acked > 0 && tick.wrapping_sub(acked) <= self.window_ticks);
        let session = &mut self.session;
        let src = match baseline {
            Some(index) => &session.frames[index],
            None => &self.empty,
        };

        let mut writer = BitWriter::new(buffer);
        let mut game = GameHeader {
            tick,
            ack: session.commands.last_recv_command_id(),
        };
        game.exchange(&mut writer);

        let commands_at = writer.position();
        let mut commands = CommandHeader::default();
        commands.exchange(&mut writer);

        let result_at = writer.position();
        let mut result = session.context.controller.result_header();
        result.exchange(&mut writer);

        let mut source = SnapshotTickHeader {
            source_tick: src.tick(),
        };
        source.exchange(&mut writer, tick);

        self.delta.calculate(src, &dst);
        let placeholder = DeltaHeader::for_delta(&self.delta);
        let delta_at = writer.position();
        let mut header = placeholder;
        header.exchange(&mut writer);
        writer.check()?;

        commands.count = session.commands.write_commands(&mut writer);
        result.included = session.context.controller.write_result(&mut writer, &result);
        let mut sent = write_delta(&mut writer, &self.delta, placeholder, src, &mut dst)?;

        let end = writer.position();
        writer.set_position(commands_at);
        commands.exchange(&mut writer);
        writer.set_position(result_at);
        result.exchange(&mut writer);
        writer.set_position(delta_at);
        sent.exchange(&mut writer);
        writer.set_position(end);
        writer.check()?;
        let len = writer.bytes_written();

        revert_unsent(&self.delta, &sent, src, &mut dst)?;
        session.frames.push_back(dst);
        Ok(len)
    }
}

impl GamePhase for ServerGame {
    fn session(&self) -> &GameSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut GameSession {
        &mut self.session
    }

    fn read_packet(&mut self, data: &[u8]) -> ConnectionResult<()> {
        let mut reader = BitReader::new(data);
        let mut game = GameHeader::default();
        let mut commands = CommandHeader::default();
        let mut snapshot_ack = 0i32;
        let mut inputs = InputHeader::default();

        game.exchange(&mut reader);
        commands.exchange(&mut reader);
        reader.exchange_delta_i32(&mut snapshot_ack, game.tick);
        inputs.exchange(&mut reader);
        reader.check()?;

        self.session.ack_commands(game.ack);
        self.session.commands.read_commands(&mut reader, commands)?;
        self.session.context.controller.read_inputs(&mut reader, inputs)?;
        self.ack(snapshot_ack);
        self.session.sync.on_packet(game.tick);
        Ok(())
    }

    fn tick(&mut self, _tick: i32) {
        self.session.remove_old_frames();
        self.session.process_commands();
        self.drop_vanished_associations();

        if let Some(remote) = self.session.sync.remote_tick() {
            self.session
                .context
                .controller
                .server_tick(remote - SERVER_INPUT_DELAY);
        }
    }

    fn write_packet(&mut self, tick: i32) -> ConnectionResult<EncodedPacket> {
        let mut block = self.session.alloc_packet()?;
        let size = self.session.max_packet_size.min(block.len());
        match self.encode(tick, &mut block[..size]) {
            Ok(len) => Ok(EncodedPacket { block, len }),
            Err(error) => {
                if let Err(pool_error) = self.session.pool.free(block) {
                    tracing::error!("Could not return packet buffer: {}", pool_error);
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, EmptyMessage};
    use crate::connection::testing::{context, pool, settings, shared_world, CRATE};
    use crate::connection::Role;

    fn server() -> ServerGame {
        ServerGame::new(&settings(), context(Role::Server, shared_world()), pool())
    }

    fn spawn_command(id: u32) -> Command {
        let mut payload = vec![0u8; 4];
        let len = crate::codec::pack(&mut EmptyMessage, &mut payload).unwrap();
        payload.truncate(len);
        Command {
            id: tickwire_shared::CommandId(id),
            command_type: CommandType::SpawnPlayer,
            payload,
        }
    }

    fn spawn_player(game: &mut ServerGame) {
        let session = &mut game.session;
        session
            .registry
            .dispatch(&mut session.context, &spawn_command(1), CommandDisposition::Received);
        session.flush_associations();
    }

    #[test]
    fn test_spawn_player_links_entity() {
        let mut game = server();
        spawn_player(&mut game);

        let context = &game.session.context;
        assert_eq!(context.controller.associated().len(), 1);
        let id = context.controller.associated()[0];
        assert!(context.world.lock().is_controlled(id));
        assert!(context.associations.is_empty());
        assert_eq!(game.session.commands.pending(), 1);
    }

    #[test]
    fn test_second_spawn_ignored() {
        let mut game = server();
        spawn_player(&mut game);
        spawn_player(&mut game);
        assert_eq!(game.session.context.controller.associated().len(), 1);
        assert_eq!(game.session.context.world.lock().states().len(), 1);
    }

    #[test]
    fn test_ack_drops_older_frames() {
        let mut game = server();
        for tick in [2, 4, 6] {
            let packet = game.write_packet(tick).unwrap();
            game.session.pool.free(packet.block).unwrap();
        }
        assert_eq!(game.session.frames.len(), 3);

        game.ack(5);
        assert_eq!(game.acked_snapshot_tick(), 0);

        game.ack(4);
        assert_eq!(game.acked_snapshot_tick(), 4);
        assert_eq!(game.session.frames.len(), 2);

        game.ack(2);
        assert_eq!(game.acked_snapshot_tick(), 4);
    }

    #[test]
    fn test_stale_baseline_falls_back_to_empty_frame() {
        let mut game = server();
        game.session.context.world.lock().spawn(CRATE).unwrap();

        let packet = game.write_packet(2).unwrap();
        let first = packet.len;
        game.session.pool.free(packet.block).unwrap();
        game.ack(2);

        // Within the window the unchanged crate costs nothing.
        let packet = game.write_packet(4).unwrap();
        let within = packet.len;
        assert!(within < first);
        game.session.pool.free(packet.block).unwrap();

        // Past it the crate is created again from scratch.
        let late = 2 + game.window_ticks + 1;
        let packet = game.write_packet(late).unwrap();
        assert!(packet.len > within);
        game.session.pool.free(packet.block).unwrap();
    }

    #[test]
    fn test_dispose_destroys_player() {
        let mut game = server();
        spawn_player(&mut game);
        let world = Arc::clone(&game.session.context.world);
        assert_eq!(world.lock().states().len(), 1);

        game.dispose();
        assert!(world.lock().states().is_empty());
        assert!(game.session.context.controller.associated().is_empty());
    }

    #[test]
    fn test_vanished_player_unlinked() {
        let mut game = server();
        spawn_player(&mut game);
        let id = game.session.context.controller.associated()[0];
        game.session.context.world.lock().destroy(id);

        game.tick(1);
        assert!(game.session.context.controller.associated().is_empty());
        // Link and Unlink both await acknowledgement.
        assert_eq!(game.session.commands.pending(), 2);
    }
}
