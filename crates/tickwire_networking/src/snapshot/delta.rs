//! Prioritized difference between two frames.

use tickwire_core::{radix_sort_descending, Prioritized};
use tickwire_shared::Entity;

use super::frame::Frame;
use super::state::EntityState;

/// Entity present in the destination only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CreatedEntry {
    /// Position in the destination frame.
    pub dst: usize,
    pub priority: u32,
}

/// Entity present in the source only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DestroyedEntry {
    pub entity: Entity,
    pub priority: u32,
}

/// Entity present in both whose state changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChangedEntry {
    /// Position in the source frame.
    pub src: usize,
    /// Position in the destination frame.
    pub dst: usize,
    pub priority: u32,
}

impl Prioritized for CreatedEntry {
    fn priority(&self) -> u32 {
        self.priority
    }
}

impl Prioritized for DestroyedEntry {
    fn priority(&self) -> u32 {
        self.priority
    }
}

impl Prioritized for ChangedEntry {
    fn priority(&self) -> u32 {
        self.priority
    }
}

/// Created, destroyed and changed entities between a source and a
/// destination frame, each list ordered by descending priority.
///
/// Entries refer to positions in the two frames passed to
/// [`DeltaFrame::calculate`] and are only meaningful alongside them. The
/// lists are reused from tick to tick.
///
/// ```text
/// src: {1, 2, 3}        dst: {2', 3, 4}
///
/// created:   [4]        dst only
/// destroyed: [1]        src only
/// changed:   [2]        in both, has_changed(dst, src)
/// ```
#[derive(Debug, Default)]
pub struct DeltaFrame {
    source_tick: i32,
    pub(crate) created: Vec<CreatedEntry>,
    pub(crate) destroyed: Vec<DestroyedEntry>,
    pub(crate) changed: Vec<ChangedEntry>,
}

impl DeltaFrame {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick of the source frame of the last calculation.
    #[inline]
    #[must_use]
    pub const fn source_tick(&self) -> i32 {
        self.source_tick
    }

    /// Empties every list.
    pub fn clear(&mut self) {
        self.source_tick = 0;
        self.created.clear();
        self.destroyed.clear();
        self.changed.clear();
    }

    /// Diffs `src` against `dst`.
    ///
    /// A changed entity's priority is its base priority in `src` plus the
    /// number of ticks between the two captures, so entities waiting longest
    /// for a confirmed update go first.
    pub fn calculate(&mut self, src: &Frame, dst: &Frame) {
        self.clear();
        self.source_tick = src.tick();

        for (index, state) in dst.states().iter().enumerate() {
            if !src.contains(state.id()) {
                self.created.push(CreatedEntry {
                    dst: index,
                    priority: state.priority(),
                });
            }
        }

        for (src_index, src_state) in src.states().iter().enumerate() {
            match dst.position(src_state.id()) {
                Some(dst_index) => {
                    let dst_state = &dst.states()[dst_index];
                    if dst_state.has_changed(src_state) {
                        let age = u32::try_from(dst_state.tick().saturating_sub(src_state.tick())).unwrap_or(0);
                        self.changed.push(ChangedEntry {
                            src: src_index,
                            dst: dst_index,
                            priority: src_state.priority().saturating_add(age),
                        });
                    }
                }
                None => self.destroyed.push(DestroyedEntry {
                    entity: src_state.entity(),
                    priority: src_state.priority(),
                }),
            }
        }

        radix_sort_descending(&mut self.created);
        radix_sort_descending(&mut self.destroyed);
        radix_sort_descending(&mut self.changed);
    }

    /// Number of created entities.
    #[must_use]
    pub fn created_len(&self) -> usize {
        self.created.len()
    }

    /// Number of destroyed entities.
    #[must_use]
    pub fn destroyed_len(&self) -> usize {
        self.destroyed.len()
    }

    /// Number of changed entities.
    #[must_use]
    pub fn changed_len(&self) -> usize {
        self.changed.len()
    }

    /// Whether the two frames were equivalent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty() && self.changed.is_empty()
    }

    /// Created states, in send order.
    pub fn created<'a>(&'a self, dst: &'a Frame) -> impl Iterator<Item = &'a EntityState> + 'a {
        self.created.iter().map(move |entry| &dst.states()[entry.dst])
    }

    /// Destroyed entities, in send order.
    pub fn destroyed(&self) -> impl Iterator<Item = Entity> + '_ {
        self.destroyed.iter().map(|entry| entry.entity)
    }

    /// Changed `(source, destination)` state pairs, in send order.
    pub fn changed<'a>(
        &'a self,
        src: &'a Frame,
        dst: &'a Frame,
    ) -> impl Iterator<Item = (&'a EntityState, &'a EntityState)> + 'a {
        self.changed
            .iter()
            .map(move |entry| (&src.states()[entry.src], &dst.states()[entry.dst]))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::snapshot::registry::StateRegistry;
    use crate::snapshot::state::tests::Marker;
    use tickwire_shared::{EntityId, PrefabId, Vec2};

    fn registry() -> Arc<StateRegistry> {
        let mut registry = StateRegistry::new();
        let id = registry.register::<Marker>().unwrap();
        registry.map_prefab(PrefabId(1), id).unwrap();
        Arc::new(registry)
    }

    fn add(frame: &mut Frame, id: u16, x: f32, boost: u32) {
        let tick = frame.tick();
        let state = frame.insert_default(Entity::new(EntityId(id), PrefabId(1))).unwrap();
        state.set_tick(tick);
        let marker = state.get_mut::<Marker>().unwrap();
        marker.position = Vec2::new(x, 0.0);
        marker.boost = boost;
    }

    fn ids<'a>(states: impl Iterator<Item = &'a EntityState>) -> Vec<u16> {
        states.map(|state| state.id().0).collect()
    }

    #[test]
    fn test_created_destroyed_changed() {
        let registry = registry();
        let mut src = Frame::new(Arc::clone(&registry), 0);
        add(&mut src, 1, 0.0, 0);
        add(&mut src, 2, 0.0, 0);
        add(&mut src, 3, 0.0, 0);

        let mut dst = Frame::new(registry, 1);
        add(&mut dst, 2, 5.0, 0);
        add(&mut dst, 3, 0.0, 0);
        add(&mut dst, 4, 0.0, 0);

        let mut delta = DeltaFrame::new();
        delta.calculate(&src, &dst);

        assert_eq!(ids(delta.created(&dst)), vec![4]);
        assert_eq!(delta.destroyed().map(|e| e.id.0).collect::<Vec<_>>(), vec![1]);
        assert_eq!(
            delta.changed(&src, &dst).map(|(s, d)| (s.id().0, d.id().0)).collect::<Vec<_>>(),
            vec![(2, 2)]
        );
        assert_eq!(delta.source_tick(), 0);
    }

    #[test]
    fn test_partition_covers_both_frames() {
        let registry = registry();
        let mut src = Frame::new(Arc::clone(&registry), 10);
        let mut dst = Frame::new(registry, 14);
        for id in 1..=20u16 {
            if id % 3 != 0 {
                add(&mut src, id, f32::from(id), 0);
            }
            if id % 4 != 0 {
                let x = if id % 2 == 0 { f32::from(id) + 1.0 } else { f32::from(id) };
                add(&mut dst, id, x, 0);
            }
        }

        let mut delta = DeltaFrame::new();
        delta.calculate(&src, &dst);

        let created: BTreeSet<u16> = ids(delta.created(&dst)).into_iter().collect();
        let destroyed: BTreeSet<u16> = delta.destroyed().map(|e| e.id.0).collect();
        let changed: BTreeSet<u16> = delta.changed(&src, &dst).map(|(_, d)| d.id().0).collect();
        let unchanged: BTreeSet<u16> = dst
            .entities()
            .map(|e| e.id.0)
            .filter(|id| src.contains(EntityId(*id)) && !changed.contains(id))
            .collect();

        let dst_ids: BTreeSet<u16> = dst.entities().map(|e| e.id.0).collect();
        let src_ids: BTreeSet<u16> = src.entities().map(|e| e.id.0).collect();

        let mut union: BTreeSet<u16> = created.union(&changed).copied().collect();
        union.extend(&unchanged);
        assert_eq!(union, dst_ids);

        let still_present: BTreeSet<u16> = src_ids.intersection(&dst_ids).copied().collect();
        let mut src_union = destroyed.clone();
        src_union.extend(&still_present);
        assert_eq!(src_union, src_ids);

        assert!(created.is_disjoint(&destroyed));
        assert!(created.is_disjoint(&changed));
        assert!(destroyed.is_disjoint(&changed));
    }

    #[test]
    fn test_priority_orders_lists() {
        let registry = registry();
        let mut src = Frame::new(Arc::clone(&registry), 0);
        let mut dst = Frame::new(registry, 5);
        add(&mut dst, 1, 0.0, 1);
        add(&mut dst, 2, 0.0, 30);
        add(&mut dst, 3, 0.0, 7);
        add(&mut dst, 4, 0.0, 30);

        let mut delta = DeltaFrame::new();
        delta.calculate(&src, &dst);
        // Ties keep frame order.
        assert_eq!(ids(delta.created(&dst)), vec![2, 4, 3, 1]);

        // Older baselines age into higher priority.
        src.set_tick(0);
        add(&mut src, 10, 0.0, 0);
        let mut newer = Frame::new(Arc::clone(src.registry()), 3);
        add(&mut newer, 11, 0.0, 0);
        let mut dst = Frame::new(Arc::clone(src.registry()), 8);
        add(&mut dst, 10, 1.0, 0);
        add(&mut dst, 11, 1.0, 0);

        let mut mixed = Frame::new(Arc::clone(src.registry()), 0);
        mixed.insert_copy(src.get(EntityId(10)).unwrap()).unwrap();
        mixed.insert_copy(newer.get(EntityId(11)).unwrap()).unwrap();

        delta.calculate(&mixed, &dst);
        let order: Vec<u16> = delta.changed(&mixed, &dst).map(|(s, _)| s.id().0).collect();
        assert_eq!(order, vec![10, 11]);
        assert_eq!(delta.changed.iter().map(|c| c.priority).collect::<Vec<_>>(), vec![8, 5]);
    }

    #[test]
    fn test_identical_frames_produce_empty_delta() {
        let registry = registry();
        let mut src = Frame::new(Arc::clone(&registry), 0);
        add(&mut src, 1, 2.0, 0);
        let mut dst = Frame::new(registry, 1);
        dst.copy_from(&src).unwrap();

        let mut delta = DeltaFrame::new();
        delta.calculate(&src, &dst);
        assert!(delta.is_empty());
    }
}
