//! Shape registry and per-shape state pools.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tickwire_shared::{Entity, PrefabId, StateId};

use super::state::{DynShape, EntityState, StateShape};
use crate::error::{SnapshotError, SnapshotResult};

/// One registered shape.
struct ShapeSlot {
    name: &'static str,
    type_id: TypeId,
    create: fn() -> Box<dyn DynShape>,
    /// Cleared instances ready for reuse.
    pool: Mutex<Vec<Box<dyn DynShape>>>,
}

fn create_shape<T: StateShape>() -> Box<dyn DynShape> {
    Box::new(T::default())
}

/// Maps state ids to shapes and prefabs to state ids, and pools state
/// instances per shape.
///
/// Built once at startup, then shared behind an `Arc` by every frame.
/// Registration order decides the ids, so both ends of a connection must
/// register the same shapes in the same order.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = StateRegistry::new();
/// let player = registry.register::<PlayerState>()?;
/// registry.map_prefab(PrefabId(1), player)?;
/// let registry = Arc::new(registry);
/// ```
pub struct StateRegistry {
    /// Slot `i` holds state id `i + 1`.
    shapes: Vec<ShapeSlot>,
    prefabs: HashMap<PrefabId, StateId>,
}

impl fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.shapes.iter().map(|slot| slot.name).collect();
        f.debug_struct("StateRegistry")
            .field("shapes", &names)
            .field("prefabs", &self.prefabs)
            .finish()
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRegistry {
    /// Ids `1..=254` are assignable.
    const MAX_SHAPES: usize = StateId::MAX.0 as usize - 1;

    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shapes: Vec::new(),
            prefabs: HashMap::new(),
        }
    }

    /// Registers `T` and returns its id. Registering the same type again
    /// returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::RegistryFull`] once every id is taken.
    pub fn register<T: StateShape>(&mut self) -> SnapshotResult<StateId> {
        if let Some(id) = self.state_id_of::<T>() {
            return Ok(id);
        }
        if self.shapes.len() >= Self::MAX_SHAPES {
            return Err(SnapshotError::RegistryFull);
        }

        self.shapes.push(ShapeSlot {
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            create: create_shape::<T>,
            pool: Mutex::new(Vec::new()),
        });
        let id = StateId(u8::try_from(self.shapes.len()).map_err(|_| SnapshotError::RegistryFull)?);
        tracing::debug!("Registered state shape {} as {:?}", type_name::<T>(), id);
        Ok(id)
    }

    /// Id of `T`, if registered.
    #[must_use]
    pub fn state_id_of<T: StateShape>(&self) -> Option<StateId> {
        let type_id = TypeId::of::<T>();
        self.shapes
            .iter()
            .position(|slot| slot.type_id == type_id)
            .and_then(|index| u8::try_from(index + 1).ok())
            .map(StateId)
    }

    /// Number of registered shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Whether no shape is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Type name of a registered shape.
    #[must_use]
    pub fn name(&self, state_id: StateId) -> Option<&'static str> {
        self.slot(state_id).ok().map(|slot| slot.name)
    }

    /// Declares that entities spawned from `prefab` carry `state_id`.
    ///
    /// # Errors
    ///
    /// Fails for the reserved prefab id or an unregistered state id.
    pub fn map_prefab(&mut self, prefab: PrefabId, state_id: StateId) -> SnapshotResult<()> {
        if !prefab.is_valid() {
            return Err(SnapshotError::UnknownPrefab(prefab));
        }
        self.slot(state_id)?;
        self.prefabs.insert(prefab, state_id);
        Ok(())
    }

    /// State id carried by entities spawned from `prefab`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownPrefab`] if the prefab isn't mapped.
    pub fn state_for_prefab(&self, prefab: PrefabId) -> SnapshotResult<StateId> {
        self.prefabs
            .get(&prefab)
            .copied()
            .ok_or(SnapshotError::UnknownPrefab(prefab))
    }

    fn slot(&self, state_id: StateId) -> SnapshotResult<&ShapeSlot> {
        if !state_id.is_valid() {
            return Err(SnapshotError::UnknownState(state_id));
        }
        self.shapes
            .get(usize::from(state_id.0) - 1)
            .ok_or(SnapshotError::UnknownState(state_id))
    }

    /// Takes a default-valued state of `state_id` for `entity`, reusing a
    /// pooled instance when one is available.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownState`] for an unregistered id.
    pub fn acquire(&self, state_id: StateId, entity: Entity) -> SnapshotResult<EntityState> {
        let slot = self.slot(state_id)?;
        let shape = slot.pool.lock().pop().unwrap_or_else(|| (slot.create)());
        let mut state = EntityState::from_parts(state_id, shape);
        state.clear();
        state.set_entity(entity);
        Ok(state)
    }

    /// [`StateRegistry::acquire`] with the state id looked up from the
    /// entity's prefab.
    ///
    /// # Errors
    ///
    /// Fails if the prefab isn't mapped.
    pub fn acquire_for(&self, entity: Entity) -> SnapshotResult<EntityState> {
        self.acquire(self.state_for_prefab(entity.prefab)?, entity)
    }

    /// Takes a copy of `src`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownState`] if `src` has an unregistered id.
    pub fn duplicate(&self, src: &EntityState) -> SnapshotResult<EntityState> {
        let mut state = self.acquire(src.state_id(), src.entity())?;
        state.copy_from(src);
        Ok(state)
    }

    /// Clears `state` and returns it to its pool.
    pub fn release(&self, state: EntityState) {
        let Ok(slot) = self.slot(state.state_id()) else {
            return;
        };
        let mut shape = state.into_shape();
        shape.clear();
        slot.pool.lock().push(shape);
    }

    /// Instances waiting in the pool of `state_id`.
    #[must_use]
    pub fn pooled(&self, state_id: StateId) -> usize {
        self.slot(state_id).map_or(0, |slot| slot.pool.lock().len())
    }
}
