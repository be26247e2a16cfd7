//! Fixtures shared by the connection tests.

use std::sync::Arc;

use tickwire_core::BufferPool;
use tickwire_shared::{HostSettings, PrefabId};

use super::game::GameContext;
use super::world::{EntityWorld, SharedWorld, SyncMode};
use super::Role;
use crate::prediction::{Controller, Mover};
use crate::snapshot::{Marker, StateRegistry};

pub(crate) const PLAYER: PrefabId = PrefabId(1);
pub(crate) const CRATE: PrefabId = PrefabId(2);

pub(crate) fn settings() -> HostSettings {
    HostSettings::default()
}

pub(crate) fn pool() -> Arc<BufferPool> {
    Arc::new(BufferPool::new(12, 4))
}

pub(crate) fn entity_world() -> EntityWorld {
    let mut registry = StateRegistry::new();
    let marker = registry.register::<Marker>().unwrap();
    registry.map_prefab(PLAYER, marker).unwrap();
    registry.map_prefab(CRATE, marker).unwrap();

    let mut world = EntityWorld::new(Arc::new(registry));
    world.register_prefab(PLAYER, "Player", SyncMode::Predicted).unwrap();
    world.register_prefab(CRATE, "Crate", SyncMode::Interpolated).unwrap();
    world
}

pub(crate) fn shared_world() -> SharedWorld {
    entity_world().into_shared()
}

/// Game context driving a scripted one-dimensional mover.
pub(crate) fn context(role: Role, world: SharedWorld) -> GameContext {
    let settings = settings();
    let controller = match role {
        Role::Server => Controller::server(Mover::default(), &settings.controller),
        Role::Client => Controller::client(
            Mover {
                script: vec![1],
                ..Mover::default()
            },
            &settings.controller,
        ),
    };
    GameContext {
        controller: Box::new(controller),
        world,
        associations: Vec::new(),
    }
}
