//! # Entity World
//!
//! The live set of entities shared by every connection of a host. The
//! server's world is authoritative; a client's world mirrors the frames it
//! receives, spawning and destroying replicas as they appear and vanish.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tickwire_shared::{CommandId, Entity, EntityId, PrefabId};

use crate::codec::BitReader;
use crate::command::{CommandDisposition, EntityCommandHeader};
use crate::error::{CommandResult, SnapshotError, SnapshotResult};
use crate::snapshot::{EntityState, Frame, StateRegistry};

/// How a client presents a replicated entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Blended between the two frames around the remote tick estimate.
    #[default]
    Interpolated,
    /// Set from the newest frame as soon as it arrives.
    Predicted,
}

/// Spawnable entity template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefab {
    /// Wire id.
    pub id: PrefabId,
    /// Lookup name.
    pub name: String,
    /// Client-side presentation.
    pub sync: SyncMode,
}

/// Notification raised by a world mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorldEvent {
    /// Entity added.
    Spawned(Entity),
    /// Entity removed.
    Despawned(Entity),
    /// A controller started driving the entity.
    Linked(EntityId),
    /// A controller stopped driving the entity.
    Unlinked(EntityId),
}

/// World shared between the connections of one host.
pub type SharedWorld = Arc<Mutex<dyn World>>;

/// Entity storage the connection layer reads from and writes to.
pub trait World: Send {
    /// Registry every entity state comes from.
    fn registry(&self) -> &Arc<StateRegistry>;

    /// Every live entity's state.
    fn states(&self) -> &[EntityState];

    /// State of `id`.
    fn state(&self, id: EntityId) -> Option<&EntityState>;

    /// Mutable state of `id`.
    fn state_mut(&mut self, id: EntityId) -> Option<&mut EntityState>;

    /// Prefab registered under `name`.
    fn prefab_by_name(&self, name: &str) -> Option<PrefabId>;

    /// Presentation of `prefab`'s entities on clients.
    fn sync_mode(&self, prefab: PrefabId) -> SyncMode;

    /// Spawns a new entity of `prefab` with a fresh id.
    ///
    /// # Errors
    ///
    /// Fails for an unknown prefab or when no id is free.
    fn spawn(&mut self, prefab: PrefabId) -> SnapshotResult<Entity>;

    /// Spawns a replica carrying `state`'s entity and data.
    ///
    /// # Errors
    ///
    /// Fails if the entity already exists or its shape is unknown.
    fn spawn_replica(&mut self, state: &EntityState) -> SnapshotResult<()>;

    /// Removes `id`. False if it didn't exist.
    fn destroy(&mut self, id: EntityId) -> bool;

    /// Marks whether a local controller drives `id`.
    fn set_controlled(&mut self, id: EntityId, controlled: bool);

    /// Whether a local controller drives `id`.
    fn is_controlled(&self, id: EntityId) -> bool;

    /// Runs per-entity logic for a network tick.
    fn tick(&mut self, tick: i32);

    /// Takes the notifications raised since the last call.
    fn drain_events(&mut self) -> Vec<WorldEvent>;

    /// Delivers an entity command. The reader is positioned after `header`.
    ///
    /// # Errors
    ///
    /// A failure is logged by the caller and otherwise ignored.
    fn on_entity_command(
        &mut self,
        header: &EntityCommandHeader,
        id: CommandId,
        disposition: CommandDisposition,
        reader: &mut BitReader<'_>,
    ) -> CommandResult<()>;
}

/// Per-entity logic run by [`World::tick`].
pub type EntityTicker = Box<dyn FnMut(&mut EntityState, i32) + Send>;

/// Per-entity command handler.
pub type EntityCommandHandler = Box<
    dyn FnMut(&mut EntityState, &EntityCommandHeader, CommandDisposition, &mut BitReader<'_>) -> CommandResult<()>
        + Send,
>;

/// In-memory [`World`] with a prefab table.
///
/// # Example
///
/// ```rust,ignore
/// let mut world = EntityWorld::new(registry);
/// world.register_prefab(PrefabId(1), "Player", SyncMode::Predicted)?;
/// let player = world.spawn(PrefabId(1))?;
/// let shared = world.into_shared();
/// ```
pub struct EntityWorld {
    registry: Arc<StateRegistry>,
    prefabs: HashMap<PrefabId, Prefab>,
    names: HashMap<String, PrefabId>,
    live: Frame,
    next_id: u16,
    controlled: HashSet<EntityId>,
    events: Vec<WorldEvent>,
    ticker: Option<EntityTicker>,
    command_handler: Option<EntityCommandHandler>,
}

impl std::fmt::Debug for EntityWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityWorld")
            .field("prefabs", &self.prefabs)
            .field("entities", &self.live.len())
            .field("controlled", &self.controlled)
            .finish_non_exhaustive()
    }
}

impl EntityWorld {
    /// Creates an empty world over `registry`.
    #[must_use]
    pub fn new(registry: Arc<StateRegistry>) -> Self {
        Self {
            live: Frame::new(Arc::clone(&registry), 0),
            registry,
            prefabs: HashMap::new(),
            names: HashMap::new(),
            next_id: 0,
            controlled: HashSet::new(),
            events: Vec::new(),
            ticker: None,
            command_handler: None,
        }
    }

    /// Wraps the world for sharing between connections.
    #[must_use]
    pub fn into_shared(self) -> SharedWorld {
        Arc::new(Mutex::new(self))
    }

    /// Adds a prefab. Its id must already be mapped to a shape in the
    /// registry; a later prefab with the same name replaces the lookup.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownPrefab`] for an unmapped id.
    pub fn register_prefab(&mut self, id: PrefabId, name: &str, sync: SyncMode) -> SnapshotResult<()> {
        self.registry.state_for_prefab(id)?;
        self.names.insert(name.to_owned(), id);
        self.prefabs.insert(
            id,
            Prefab {
                id,
                name: name.to_owned(),
                sync,
            },
        );
        Ok(())
    }

    /// Prefab `id`.
    #[must_use]
    pub fn prefab(&self, id: PrefabId) -> Option<&Prefab> {
        self.prefabs.get(&id)
    }

    /// Installs the per-entity tick logic.
    pub fn set_ticker(&mut self, ticker: impl FnMut(&mut EntityState, i32) + Send + 'static) {
        self.ticker = Some(Box::new(ticker));
    }

    /// Installs the entity command handler.
    pub fn set_command_handler(
        &mut self,
        handler: impl FnMut(&mut EntityState, &EntityCommandHeader, CommandDisposition, &mut BitReader<'_>) -> CommandResult<()>
            + Send
            + 'static,
    ) {
        self.command_handler = Some(Box::new(handler));
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no entity is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Next free id after the last one handed out, wrapping from
    /// `u16::MAX` back to 1.
    fn allocate_id(&mut self) -> SnapshotResult<EntityId> {
        for _ in 0..u16::MAX {
            self.next_id = if self.next_id >= u16::MAX { 1 } else { self.next_id + 1 };
            let id = EntityId(self.next_id);
            if !self.live.contains(id) {
                return Ok(id);
            }
        }
        Err(SnapshotError::EntitiesExhausted)
    }
}

impl World for EntityWorld {
    fn registry(&self) -> &Arc<StateRegistry> {
        &self.registry
    }

    fn states(&self) -> &[EntityState] {
        self.live.states()
    }

    fn state(&self, id: EntityId) -> Option<&EntityState> {
        self.live.get(id)
    }

    fn state_mut(&mut self, id: EntityId) -> Option<&mut EntityState> {
        self.live.get_mut(id)
    }

    fn prefab_by_name(&self, name: &str) -> Option<PrefabId> {
        self.names.get(name).copied()
    }

    fn sync_mode(&self, prefab: PrefabId) -> SyncMode {
        self.prefabs.get(&prefab).map_or(SyncMode::default(), |prefab| prefab.sync)
    }

    fn spawn(&mut self, prefab: PrefabId) -> SnapshotResult<Entity> {
        if !self.prefabs.contains_key(&prefab) {
            return Err(SnapshotError::UnknownPrefab(prefab));
        }
        let entity = Entity::new(self.allocate_id()?, prefab);
        self.live.insert_default(entity)?;
        self.events.push(WorldEvent::Spawned(entity));
        tracing::debug!("Spawned {}", entity);
        Ok(entity)
    }

    fn spawn_replica(&mut self, state: &EntityState) -> SnapshotResult<()> {
        self.live.insert_copy(state)?;
        self.events.push(WorldEvent::Spawned(state.entity()));
        tracing::debug!("Spawned replica {}", state.entity());
        Ok(())
    }

    fn destroy(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.live.get(id).map(EntityState::entity) else {
            return false;
        };
        self.live.remove(id);
        if self.controlled.remove(&id) {
            self.events.push(WorldEvent::Unlinked(id));
        }
        self.events.push(WorldEvent::Despawned(entity));
        tracing::debug!("Destroyed {}", entity);
        true
    }

    fn set_controlled(&mut self, id: EntityId, controlled: bool) {
        if controlled {
            if self.live.contains(id) && self.controlled.insert(id) {
                self.events.push(WorldEvent::Linked(id));
            }
        } else if self.controlled.remove(&id) {
            self.events.push(WorldEvent::Unlinked(id));
        }
    }

    fn is_controlled(&self, id: EntityId) -> bool {
        self.controlled.contains(&id)
    }

    fn tick(&mut self, tick: i32) {
        if let Some(ticker) = self.ticker.as_mut() {
            for state in self.live.states_mut() {
                ticker(state, tick);
            }
        }
    }

    fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    fn on_entity_command(
        &mut self,
        header: &EntityCommandHeader,
        id: CommandId,
        disposition: CommandDisposition,
        reader: &mut BitReader<'_>,
    ) -> CommandResult<()> {
        let Some(state) = self.live.get_mut(header.entity) else {
            tracing::debug!("{} for missing entity {} ({:?})", id, header.entity, disposition);
            return Ok(());
        };
        match self.command_handler.as_mut() {
            Some(handler) => handler(state, header, disposition, reader),
            None => Ok(()),
        }
    }
}
