//! Client half of the game protocol.
//!
//! ```text
//! GameHeader      tick, command ack
//! CommandHeader   count                   patched
//! snapshot ack    newest frame received
//! InputHeader     count                   patched
//! commands | inputs
//! ```
//!
//! Received frames feed the world two ways. Predicted entities follow the
//! newest frame. Interpolated entities are blended between the two frames
//! that straddle the remote tick estimate.

use std::sync::Arc;

use tickwire_core::BufferPool;
use tickwire_shared::constants::UNSET_TICK;
use tickwire_shared::{EntityId, HostSettings};

use super::game::{
    association_error, register_shared_handlers, EncodedPacket, GameContext, GameHeader, GamePhase,
    GameSession,
};
use super::world::{SyncMode, World};
use crate::codec::{BitReader, BitWriter, Message, Stream};
use crate::command::{
    Association, CommandDisposition, CommandHeader, CommandRegistry, CommandType, EmptyMessage,
    EntityMessage,
};
use crate::error::ConnectionResult;
use crate::prediction::{InputHeader, ResultHeader};
use crate::snapshot::{read_delta, DeltaHeader, Frame, SnapshotTickHeader};

/// Command handlers of a client connection.
pub(crate) fn client_registry() -> CommandRegistry<GameContext> {
    let mut registry = CommandRegistry::new();
    register_shared_handlers(&mut registry);

    registry.register(
        CommandType::AssociateEntityWithController,
        |context: &mut GameContext, reader: &mut BitReader<'_>, _id, disposition| {
            let mut message = EntityMessage::default();
            message.exchange(reader);
            reader.check()?;

            if disposition != CommandDisposition::Received {
                return Ok(());
            }

            match Association::try_from(message.data) {
                Ok(Association::Link) => {
                    if context.controller.associate(message.entity) {
                        context.world.lock().set_controlled(message.entity, true);
                        tracing::info!("Controlling {}", message.entity);
                    }
                }
                Ok(Association::Unlink) => {
                    if context.controller.deassociate(message.entity) {
                        context.world.lock().set_controlled(message.entity, false);
                        tracing::info!("Released {}", message.entity);
                    }
                }
                Err(_) => return Err(association_error(&message)),
            }
            Ok(())
        },
    );

    registry.register(
        CommandType::SpawnPlayer,
        |_context: &mut GameContext, _reader: &mut BitReader<'_>, id, disposition| {
            match disposition {
                CommandDisposition::Acked => tracing::debug!("Server received spawn request {}", id),
                CommandDisposition::Dropped => tracing::warn!("Spawn request {} dropped", id),
                CommandDisposition::Received => tracing::warn!("Server sent spawn request {}", id),
            }
            Ok(())
        },
    );

    registry
}

/// Makes the `mode` entities of `world` match `frame`: missing ones are
/// spawned, present ones overwritten and the rest destroyed.
fn mirror(world: &mut dyn World, frame: &Frame, mode: SyncMode) {
    for state in frame.states() {
        if world.sync_mode(state.prefab()) != mode {
            continue;
        }
        match world.state_mut(state.id()) {
            Some(local) => local.copy_shape_from(state),
            None => {
                if let Err(error) = world.spawn_replica(state) {
                    tracing::warn!("Could not replicate {}: {}", state.entity(), error);
                }
            }
        }
    }

    let stale: Vec<EntityId> = world
        .states()
        .iter()
        .filter(|state| world.sync_mode(state.prefab()) == mode && !frame.contains(state.id()))
        .map(|state| state.id())
        .collect();
    for id in stale {
        world.destroy(id);
    }
}

/// Client game phase of one connection.
pub(crate) struct ClientGame {
    session: GameSession,
    /// Baseline of a delta against nothing.
    empty: Frame,
    /// Newest frame received, reported back as the snapshot ack.
    last_recv_snapshot_tick: i32,
    /// Source frame of the current interpolation.
    lerp_frame_tick: Option<i32>,
}

impl ClientGame {
    /// Enters the game and asks the server for a player entity.
    pub(crate) fn new(settings: &HostSettings, context: GameContext, pool: Arc<BufferPool>) -> Self {
        let registry = Arc::clone(context.world.lock().registry());
        let mut game = Self {
            session: GameSession::new(settings, client_registry(), context, pool),
            empty: Frame::new(registry, 0),
            last_recv_snapshot_tick: UNSET_TICK,
            lerp_frame_tick: None,
        };
        game.session.enter();
        if let Err(error) = game.session.send_command(CommandType::SpawnPlayer, &mut EmptyMessage) {
            tracing::error!("Could not request a player: {}", error);
        }
        game
    }

    pub(crate) const fn last_recv_snapshot_tick(&self) -> i32 {
        self.last_recv_snapshot_tick
    }

    /// Releases every controlled entity.
    pub(crate) fn dispose(&mut self) {
        let context = &mut self.session.context;
        let associated = context.controller.associated().to_vec();
        {
            let mut world = context.world.lock();
            for id in associated {
                context.controller.deassociate(id);
                world.set_controlled(id, false);
            }
        }
        self.session.frames.clear();
        self.session.commands.clear();
    }

    fn read_snapshot(
        &mut self,
        reader: &mut BitReader<'_>,
        tick: i32,
        source_tick: i32,
        header: &DeltaHeader,
    ) -> ConnectionResult<()> {
        if self.session.frames.back().is_some_and(|frame| frame.tick() >= tick) {
            tracing::debug!("Ignoring snapshot {}: not newer than the last one", tick);
            return Ok(());
        }

        let src = if source_tick == 0 {
            &self.empty
        } else if let Some(index) = self.session.frame_index(source_tick) {
            &self.session.frames[index]
        } else {
            tracing::debug!("Snapshot {} against missing frame {}", tick, source_tick);
            return Ok(());
        };

        let mut frame = Frame::new(Arc::clone(src.registry()), tick);
        frame.copy_from(src)?;
        frame.set_tick(tick);
        read_delta(reader, header, src, &mut frame)?;

        self.session.frames.push_back(frame);
        self.last_recv_snapshot_tick = tick;
        Ok(())
    }

    fn predict(&mut self) {
        let Some(latest) = self.session.frames.back() else {
            return;
        };
        let mut world = self.session.context.world.lock();
        mirror(&mut *world, latest, SyncMode::Predicted);
    }

    #[allow(clippy::cast_precision_loss)]
    fn interpolate(&mut self, remote_tick_max: i32) {
        let frames = &self.session.frames;
        let Some(index) = frames.iter().rposition(|frame| frame.tick() < remote_tick_max) else {
            return;
        };
        let (Some(src), Some(dst)) = (frames.get(index), frames.get(index + 1)) else {
            tracing::debug!("Snapshot lerp stall at {}", remote_tick_max);
            return;
        };

        let mut world = self.session.context.world.lock();
        if self.lerp_frame_tick != Some(src.tick()) {
            mirror(&mut *world, src, SyncMode::Interpolated);
            self.lerp_frame_tick = Some(src.tick());
        }

        let t = (remote_tick_max - src.tick()) as f32 / (dst.tick() - src.tick()) as f32;
        for from in src.states() {
            if world.sync_mode(from.prefab()) != SyncMode::Interpolated {
                continue;
            }
            let (Some(to), Some(local)) = (dst.get(from.id()), world.state_mut(from.id())) else {
                continue;
            };
            local.interpolate(from, to, t);
        }
    }

    /// Controlled flags lag behind associations whose entity arrived after
    /// the link command.
    fn sync_controlled(&mut self) {
        let context = &mut self.session.context;
        let mut world = context.world.lock();
        for &id in context.controller.associated() {
            if !world.is_controlled(id) && world.state(id).is_some() {
                world.set_controlled(id, true);
            }
        }
    }

    fn encode(&mut self, tick: i32, buffer: &mut [u8]) -> ConnectionResult<usize> {
        let session = &mut self.session;
        let mut writer = BitWriter::new(buffer);

        let mut game = GameHeader {
            tick,
            ack: session.commands.last_recv_command_id(),
        };
        game.exchange(&mut writer);

        let commands_at = writer.position();
        let mut commands = CommandHeader::default();
        commands.exchange(&mut writer);

        let mut snapshot_ack = self.last_recv_snapshot_tick;
        writer.exchange_delta_i32(&mut snapshot_ack, tick);

        let inputs_at = writer.position();
        let mut inputs = InputHeader::default();
        inputs.exchange(&mut writer);
        writer.check()?;

        commands.count = session.commands.write_commands(&mut writer);
        inputs.count = session.context.controller.write_inputs(&mut writer);

        let end = writer.position();
        writer.set_position(commands_at);
        commands.exchange(&mut writer);
        writer.set_position(inputs_at);
        inputs.exchange(&mut writer);
        writer.set_position(end);
        writer.check()?;
        Ok(writer.bytes_written())
    }
}

impl GamePhase for ClientGame {
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
        let mut result = ResultHeader::default();
        let mut source = SnapshotTickHeader::default();
        let mut delta = DeltaHeader::default();

        game.exchange(&mut reader);
        commands.exchange(&mut reader);
        result.exchange(&mut reader);
        source.exchange(&mut reader, game.tick);
        delta.exchange(&mut reader);
        reader.check()?;

        self.session.ack_commands(game.ack);
        self.session.commands.read_commands(&mut reader, commands)?;
        self.session.context.controller.read_result(&mut reader, &result)?;
        self.read_snapshot(&mut reader, game.tick, source.source_tick, &delta)?;
        self.session.sync.on_packet(game.tick);
        Ok(())
    }

    fn tick(&mut self, tick: i32) {
        self.session.remove_old_frames();
        self.predict();

        if let Some(remote_tick_max) = self.session.sync.remote_tick_max() {
            self.interpolate(remote_tick_max);
            self.session.context.world.lock().tick(remote_tick_max);
        }

        self.session.process_commands();
        self.sync_controlled();
        self.session.context.controller.client_tick(tick);
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
    use crate::connection::server::ServerGame;
    use crate::connection::testing::{context, pool, settings, shared_world, CRATE, PLAYER};
    use crate::connection::world::SharedWorld;
    use crate::connection::Role;
    use crate::snapshot::Marker;
    use tickwire_shared::{Entity, Vec2};

    fn client(world: SharedWorld) -> ClientGame {
        ClientGame::new(&settings(), context(Role::Client, world), pool())
    }

    fn server(world: SharedWorld) -> ServerGame {
        ServerGame::new(&settings(), context(Role::Server, world), pool())
    }

    fn deliver(from: &mut impl GamePhase, to: &mut impl GamePhase, tick: i32) {
        let packet = from.write_packet(tick).unwrap();
        to.read_packet(&packet.block[..packet.len]).unwrap();
        from.session().pool.free(packet.block).unwrap();
    }

    fn frame(world: &SharedWorld, tick: i32, entities: &[(u16, f32)]) -> Frame {
        let registry = Arc::clone(world.lock().registry());
        let mut frame = Frame::new(registry, tick);
        for &(id, x) in entities {
            let state = frame.insert_default(Entity::new(EntityId(id), CRATE)).unwrap();
            state.get_mut::<Marker>().unwrap().position = Vec2::new(x, 0.0);
        }
        frame
    }

    fn crate_x(world: &SharedWorld, id: u16) -> Option<f32> {
        let world = world.lock();
        world.state(EntityId(id)).map(|state| state.get::<Marker>().unwrap().position.x)
    }

    #[test]
    fn test_spawn_request_sent_on_enter() {
        let game = client(shared_world());
        assert_eq!(game.session.commands.pending(), 1);
        assert_eq!(game.last_recv_snapshot_tick(), UNSET_TICK);
    }

    #[test]
    fn test_snapshot_received_and_acked() {
        let server_world = shared_world();
        server_world.lock().spawn(CRATE).unwrap();
        let mut server = server(Arc::clone(&server_world));
        let mut client = client(shared_world());

        deliver(&mut server, &mut client, 2);
        assert_eq!(client.last_recv_snapshot_tick(), 2);
        assert_eq!(client.session.frames.back().map(Frame::len), Some(1));

        deliver(&mut client, &mut server, 1);
        assert_eq!(server.acked_snapshot_tick(), 2);
    }

    #[test]
    fn test_older_snapshot_ignored() {
        let server_world = shared_world();
        let mut server = server(server_world);
        let mut client = client(shared_world());

        let late = server.write_packet(2).unwrap();
        deliver(&mut server, &mut client, 4);
        client.read_packet(&late.block[..late.len]).unwrap();
        server.session().pool.free(late.block).unwrap();
        assert_eq!(client.last_recv_snapshot_tick(), 4);
        assert_eq!(client.session.frames.len(), 1);
    }

    #[test]
    fn test_player_spawn_round_trip() {
        let server_world = shared_world();
        let client_world = shared_world();
        let mut server = server(Arc::clone(&server_world));
        let mut client = client(Arc::clone(&client_world));

        deliver(&mut client, &mut server, 1);
        server.tick(2);
        deliver(&mut server, &mut client, 2);
        client.tick(2);

        let associated = client.session.context.controller.associated().to_vec();
        assert_eq!(associated.len(), 1);
        let world = client_world.lock();
        assert_eq!(world.state(associated[0]).map(|state| state.prefab()), Some(PLAYER));
        assert!(world.is_controlled(associated[0]));
    }

    #[test]
    fn test_interpolation_between_frames() {
        let world = shared_world();
        let mut game = client(Arc::clone(&world));
        game.session.frames.push_back(frame(&world, 2, &[(7, 0.0), (8, 1.0)]));
        game.session.frames.push_back(frame(&world, 4, &[(7, 10.0)]));

        game.interpolate(3);
        assert_eq!(crate_x(&world, 7), Some(5.0));
        // Absent from the target frame, so left at the source state.
        assert_eq!(crate_x(&world, 8), Some(1.0));
        assert_eq!(game.lerp_frame_tick, Some(2));

        game.interpolate(4);
        assert_eq!(crate_x(&world, 7), Some(10.0));
    }

    #[test]
    fn test_interpolation_stalls_without_target() {
        let world = shared_world();
        let mut game = client(Arc::clone(&world));
        game.session.frames.push_back(frame(&world, 2, &[(7, 0.0)]));

        game.interpolate(6);
        assert_eq!(crate_x(&world, 7), None);
        assert_eq!(game.lerp_frame_tick, None);
    }

    #[test]
    fn test_new_source_frame_destroys_missing() {
        let world = shared_world();
        let mut game = client(Arc::clone(&world));
        game.session.frames.push_back(frame(&world, 2, &[(7, 0.0), (8, 0.0)]));
        game.session.frames.push_back(frame(&world, 4, &[(7, 2.0)]));
        game.session.frames.push_back(frame(&world, 6, &[(7, 4.0)]));

        game.interpolate(3);
        assert!(crate_x(&world, 8).is_some());
        game.interpolate(5);
        assert_eq!(crate_x(&world, 8), None);
        assert_eq!(crate_x(&world, 7), Some(3.0));
    }
}
