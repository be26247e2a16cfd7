//! World snapshot at one tick.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tickwire_shared::{Entity, EntityId};

use super::registry::StateRegistry;
use super::state::EntityState;
use crate::error::{SnapshotError, SnapshotResult};

/// Every entity's state at one tick, keyed by entity id.
///
/// A frame owns its states outright; inserting copies and dropping the
/// frame hands every state back to the registry pool.
pub struct Frame {
    tick: i32,
    states: Vec<EntityState>,
    index: HashMap<EntityId, usize>,
    registry: Arc<StateRegistry>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("tick", &self.tick)
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Frame {
    /// Creates an empty frame.
    #[must_use]
    pub fn new(registry: Arc<StateRegistry>, tick: i32) -> Self {
        Self {
            tick,
            states: Vec::new(),
            index: HashMap::new(),
            registry,
        }
    }

    /// Copies `states` into a new frame, retagging each with `tick`.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate entity id or an unregistered shape.
    pub fn capture<'a>(
        registry: Arc<StateRegistry>,
        tick: i32,
        states: impl IntoIterator<Item = &'a EntityState>,
    ) -> SnapshotResult<Self> {
        let mut frame = Self::new(registry, tick);
        for state in states {
            frame.insert_copy(state)?.set_tick(tick);
        }
        Ok(frame)
    }

    /// Registry the states come from.
    #[must_use]
    pub fn registry(&self) -> &Arc<StateRegistry> {
        &self.registry
    }

    /// Capture tick.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> i32 {
        self.tick
    }

    /// Retags the frame.
    #[inline]
    pub fn set_tick(&mut self, tick: i32) {
        self.tick = tick;
    }

    /// Number of entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the frame holds no entity.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Whether `id` is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    /// Position of `id` in [`Frame::states`].
    #[inline]
    #[must_use]
    pub fn position(&self, id: EntityId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// State of `id`.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&EntityState> {
        self.position(id).map(|index| &self.states[index])
    }

    /// Mutable state of `id`.
    #[must_use]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityState> {
        self.position(id).map(move |index| &mut self.states[index])
    }

    /// Every state.
    #[must_use]
    pub fn states(&self) -> &[EntityState] {
        &self.states
    }

    pub(crate) fn states_mut(&mut self) -> &mut [EntityState] {
        &mut self.states
    }

    /// Every entity.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.states.iter().map(EntityState::entity)
    }

    fn push(&mut self, state: EntityState) -> SnapshotResult<&mut EntityState> {
        let id = state.id();
        if !id.is_valid() || self.index.contains_key(&id) {
            let error = if id.is_valid() {
                SnapshotError::DuplicateEntity(id)
            } else {
                SnapshotError::UnknownEntity(id)
            };
            self.registry.release(state);
            return Err(error);
        }
        let index = self.states.len();
        self.index.insert(id, index);
        self.states.push(state);
        Ok(&mut self.states[index])
    }

    /// Inserts a copy of `state`.
    ///
    /// # Errors
    ///
    /// Fails if the entity is already present or its id is the reserved one.
    pub fn insert_copy(&mut self, state: &EntityState) -> SnapshotResult<&mut EntityState> {
        let copy = self.registry.duplicate(state)?;
        self.push(copy)
    }

    /// Inserts a default state for `entity`, shaped by its prefab.
    ///
    /// # Errors
    ///
    /// Fails for an unmapped prefab or an entity already present.
    pub fn insert_default(&mut self, entity: Entity) -> SnapshotResult<&mut EntityState> {
        let state = self.registry.acquire_for(entity)?;
        self.push(state)
    }

    /// Removes `id`, returning its state to the pool.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(index) = self.index.remove(&id) else {
            return false;
        };
        let state = self.states.swap_remove(index);
        if let Some(moved) = self.states.get(index) {
            self.index.insert(moved.id(), index);
        }
        self.registry.release(state);
        true
    }

    /// Removes every entity.
    pub fn clear(&mut self) {
        self.index.clear();
        let registry = &self.registry;
        for state in self.states.drain(..) {
            registry.release(state);
        }
    }

    /// Replaces the contents with a copy of `src`, tick included.
    ///
    /// # Errors
    ///
    /// Fails if `src` holds a shape this frame's registry doesn't know.
    pub fn copy_from(&mut self, src: &Frame) -> SnapshotResult<()> {
        self.clear();
        self.tick = src.tick;
        for state in &src.states {
            self.insert_copy(state)?;
        }
        Ok(())
    }

    /// Whether both frames hold the same entities with equal shape data.
    /// Ticks are ignored.
    #[must_use]
    pub fn same_contents(&self, other: &Frame) -> bool {
        self.len() == other.len()
            && self
                .states
                .iter()
                .all(|state| other.get(state.id()).is_some_and(|theirs| state.same_as(theirs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::state::tests::Marker;
    use tickwire_shared::{PrefabId, StateId, Vec2};

    fn registry() -> (Arc<StateRegistry>, StateId) {
        let mut registry = StateRegistry::new();
        let id = registry.register::<Marker>().unwrap();
        registry.map_prefab(PrefabId(1), id).unwrap();
        (Arc::new(registry), id)
    }

    fn entity(id: u16) -> Entity {
        Entity::new(EntityId(id), PrefabId(1))
    }

    #[test]
    fn test_insert_get_remove() {
        let (registry, _) = registry();
        let mut frame = Frame::new(registry, 3);

        frame.insert_default(entity(1)).unwrap();
        frame.insert_default(entity(2)).unwrap();
        frame.insert_default(entity(3)).unwrap();
        assert_eq!(
            frame.insert_default(entity(2)).unwrap_err(),
            SnapshotError::DuplicateEntity(EntityId(2))
        );
        assert!(frame.insert_default(entity(0)).is_err());

        assert!(frame.remove(EntityId(1)));
        assert!(!frame.remove(EntityId(1)));
        assert_eq!(frame.len(), 2);
        // Swap-removal keeps the index consistent.
        assert_eq!(frame.get(EntityId(3)).map(EntityState::id), Some(EntityId(3)));
        assert_eq!(frame.get(EntityId(2)).map(EntityState::id), Some(EntityId(2)));
    }

    #[test]
    fn test_capture_copies_and_tags() {
        let (registry, id) = registry();
        let mut live = registry.acquire(id, entity(7)).unwrap();
        live.get_mut::<Marker>().unwrap().position = Vec2::new(3.0, 4.0);

        let frame = Frame::capture(Arc::clone(&registry), 42, [&live]).unwrap();
        live.get_mut::<Marker>().unwrap().position = Vec2::ZERO;

        let captured = frame.get(EntityId(7)).unwrap();
        assert_eq!(captured.tick(), 42);
        assert_eq!(captured.get::<Marker>().unwrap().position, Vec2::new(3.0, 4.0));
        registry.release(live);
    }

    #[test]
    fn test_drop_returns_states_to_pool() {
        let (registry, id) = registry();
        {
            let mut frame = Frame::new(Arc::clone(&registry), 0);
            frame.insert_default(entity(1)).unwrap();
            frame.insert_default(entity(2)).unwrap();
        }
        assert_eq!(registry.pooled(id), 2);
    }

    #[test]
    fn test_copy_from_and_same_contents() {
        let (registry, _) = registry();
        let mut src = Frame::new(Arc::clone(&registry), 5);
        src.insert_default(entity(1)).unwrap().get_mut::<Marker>().unwrap().health = 9;
        src.insert_default(entity(2)).unwrap();

        let mut copy = Frame::new(registry, 0);
        copy.copy_from(&src).unwrap();
        assert_eq!(copy.tick(), 5);
        assert!(copy.same_contents(&src));

        copy.get_mut(EntityId(1)).unwrap().get_mut::<Marker>().unwrap().health = 1;
        assert!(!copy.same_contents(&src));
    }
}
