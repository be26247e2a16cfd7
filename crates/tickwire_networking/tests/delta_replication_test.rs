//! # Delta Replication Integration Test
//!
//! Replicates a changing world through packet-budgeted deltas and checks
//! that the receiver always rebuilds exactly the frame the sender cached.
//!
//! Run with: `cargo test -p tickwire_networking --test delta_replication_test`

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tickwire_networking::snapshot::{
    read_delta, revert_unsent, write_delta, DeltaHeader, SnapshotTickHeader,
};
use tickwire_networking::{BitReader, BitWriter, DeltaFrame, Frame, Message, StateRegistry, StateShape, Stream};
use tickwire_shared::{Entity, EntityId, PrefabId, Vec2};

const SHIP: PrefabId = PrefabId(1);

#[derive(Clone, Debug, Default, PartialEq)]
struct Ship {
    position: Vec2,
    hull: u8,
}

impl StateShape for Ship {
    fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool {
        stream.exchange_delta_vec2(&mut self.position, baseline.position, -1024.0, 1024.0, 10.0)
            && stream.exchange_delta_u8(&mut self.hull, baseline.hull)
    }

    fn has_changed(&self, baseline: &Self) -> bool {
        self != baseline
    }

    fn interpolate(&mut self, src: &Self, dst: &Self, t: f32) {
        self.position = src.position.lerp(dst.position, t);
        self.hull = dst.hull;
    }
}

fn registry() -> Arc<StateRegistry> {
    let mut registry = StateRegistry::new();
    let ship = registry.register::<Ship>().unwrap();
    registry.map_prefab(SHIP, ship).unwrap();
    Arc::new(registry)
}

fn spawn(world: &mut Frame, id: u16, x: i16) {
    let state = world.insert_default(Entity::new(EntityId(id), SHIP)).unwrap();
    let ship = state.get_mut::<Ship>().unwrap();
    ship.position = Vec2::new(f32::from(x), 0.0);
    ship.hull = 100;
}

/// One sender and one receiver over a lossless link with immediate acks.
struct Link {
    registry: Arc<StateRegistry>,
    delta: DeltaFrame,
    empty: Frame,
    /// Sender's copy of the last frame it sent.
    sent: Option<Frame>,
    /// Receiver's reconstruction of that frame.
    received: Option<Frame>,
    budget: usize,
}

impl Link {
    fn new(budget: usize) -> Self {
        let registry = registry();
        Self {
            empty: Frame::new(Arc::clone(&registry), 0),
            registry,
            delta: DeltaFrame::new(),
            sent: None,
            received: None,
            budget,
        }
    }

    /// Sends `world` as of `tick` and returns the header actually written.
    fn step(&mut self, world: &Frame, tick: i32) -> DeltaHeader {
        let mut dst = Frame::capture(Arc::clone(&self.registry), tick, world.states()).unwrap();
        let src = self.sent.as_ref().unwrap_or(&self.empty);
        self.delta.calculate(src, &dst);

        let mut buffer = vec![0u8; self.budget];
        let (header, len) = {
            let mut writer = BitWriter::new(&mut buffer);
            let mut source = SnapshotTickHeader { source_tick: src.tick() };
            source.exchange(&mut writer, tick);

            let placeholder = DeltaHeader::for_delta(&self.delta);
            let at = writer.position();
            let mut written = placeholder;
            written.exchange(&mut writer);
            writer.check().unwrap();

            let header = write_delta(&mut writer, &self.delta, placeholder, src, &mut dst).unwrap();
            let end = writer.position();
            writer.set_position(at);
            let mut patched = header;
            patched.exchange(&mut writer);
            writer.set_position(end);
            (header, writer.bytes_written())
        };
        revert_unsent(&self.delta, &header, src, &mut dst).unwrap();

        let mut reader = BitReader::new(&buffer[..len]);
        let mut source = SnapshotTickHeader::default();
        source.exchange(&mut reader, tick);
        let mut received_header = DeltaHeader::default();
        received_header.exchange(&mut reader);
        assert_eq!(received_header, header);

        let baseline = self
            .received
            .as_ref()
            .filter(|frame| frame.tick() == source.source_tick)
            .unwrap_or(&self.empty);
        let mut frame = Frame::new(Arc::clone(&self.registry), tick);
        frame.copy_from(baseline).unwrap();
        frame.set_tick(tick);
        read_delta(&mut reader, &received_header, baseline, &mut frame).unwrap();

        assert!(frame.same_contents(&dst), "receiver diverged at tick {tick}");
        self.sent = Some(dst);
        self.received = Some(frame);
        header
    }

    fn in_sync_with(&self, world: &Frame) -> bool {
        self.received.as_ref().is_some_and(|frame| frame.same_contents(world))
    }
}

/// Test: A world larger than one packet arrives over several ticks
#[test]
fn test_large_world_streams_in() {
    let mut world = Frame::new(registry(), 0);
    for id in 1..=150u16 {
        spawn(&mut world, id, i16::try_from(id).unwrap());
    }

    let mut link = Link::new(256);
    let first = link.step(&world, 1);
    assert!(usize::from(first.created_count()) < 150);
    assert!(!link.in_sync_with(&world));

    let mut tick = 1;
    while !link.in_sync_with(&world) {
        tick += 1;
        assert!(tick < 50, "world never finished streaming");
        link.step(&world, tick);
    }
    println!("150 ships streamed in {tick} ticks");

    // Nothing left to send once in sync.
    let header = link.step(&world, tick + 1);
    assert!(header.is_empty());
}

/// Test: Random spawns, deaths and moves converge once the world settles
#[test]
fn test_random_churn_converges() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut world = Frame::new(registry(), 0);
    let mut next_id = 1u16;
    for _ in 0..40 {
        spawn(&mut world, next_id, 0);
        next_id += 1;
    }

    let mut link = Link::new(160);
    for tick in 1..=60 {
        for _ in 0..rng.gen_range(0..4) {
            spawn(&mut world, next_id, rng.gen_range(-500..500));
            next_id += 1;
        }

        let ids: Vec<EntityId> = world.entities().map(|entity| entity.id).collect();
        for id in ids {
            let roll: u8 = rng.gen_range(0..100);
            if roll < 3 {
                world.remove(id);
            } else if roll < 40 {
                let ship = world.get_mut(id).unwrap().get_mut::<Ship>().unwrap();
                ship.position.x += f32::from(rng.gen_range(-5i8..=5));
                ship.hull = ship.hull.saturating_sub(rng.gen_range(0..3));
            }
        }

        link.step(&world, tick);
    }

    for tick in 61..=120 {
        if link.in_sync_with(&world) {
            break;
        }
        link.step(&world, tick);
    }
    assert!(link.in_sync_with(&world));
}
