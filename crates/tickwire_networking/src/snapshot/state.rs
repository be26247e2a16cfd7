//! Replicated entity state and its shape abstraction.

use std::any::Any;
use std::fmt;

use tickwire_shared::{Entity, EntityId, PrefabId, StateId};

use crate::codec::Stream;

/// Schema of one kind of replicated entity state.
///
/// Implemented once per concrete state type and registered with a
/// [`StateRegistry`](super::StateRegistry) at startup. The default value is
/// the baseline used for entities the receiver has never seen.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Debug, Default, PartialEq)]
/// struct Crate { position: Vec2 }
///
/// impl StateShape for Crate {
///     fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool {
///         stream.exchange_delta_vec2(&mut self.position, baseline.position, -512.0, 512.0, 100.0)
///     }
///     fn has_changed(&self, baseline: &Self) -> bool {
///         self.position != baseline.position
///     }
///     fn interpolate(&mut self, src: &Self, dst: &Self, t: f32) {
///         self.position = src.position.lerp(dst.position, t);
///     }
/// }
/// ```
pub trait StateShape: Any + Clone + Default + PartialEq + fmt::Debug + Send + Sync {
    /// Base replication priority. Higher values are sent first.
    fn priority(&self) -> u32 {
        0
    }

    /// Reads or writes the fields that differ from `baseline`.
    ///
    /// A reader must reconstruct every field it doesn't receive from
    /// `baseline`. Returns false on stream failure.
    fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool;

    /// Whether `self` differs from `baseline` enough to be sent.
    fn has_changed(&self, baseline: &Self) -> bool;

    /// Sets `self` to the blend of `src` and `dst` at `t` in `[0, 1]`.
    fn interpolate(&mut self, src: &Self, dst: &Self, t: f32);
}

/// Object-safe view of a [`StateShape`], implemented for every shape.
pub trait DynShape: fmt::Debug + Send + Sync {
    /// Upcast for downcasting to the concrete shape.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete shape.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// See [`StateShape::priority`].
    fn priority(&self) -> u32;

    /// See [`StateShape::exchange_delta`].
    fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &dyn DynShape) -> bool;

    /// See [`StateShape::has_changed`].
    fn has_changed(&self, baseline: &dyn DynShape) -> bool;

    /// See [`StateShape::interpolate`].
    fn interpolate(&mut self, src: &dyn DynShape, dst: &dyn DynShape, t: f32);

    /// Overwrites `self` with `src`.
    fn copy_from(&mut self, src: &dyn DynShape);

    /// Resets to the default value.
    fn clear(&mut self);

    /// Shape-level equality.
    fn same_as(&self, other: &dyn DynShape) -> bool;
}

impl<T: StateShape> DynShape for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn priority(&self) -> u32 {
        StateShape::priority(self)
    }

    fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &dyn DynShape) -> bool {
        match baseline.as_any().downcast_ref::<T>() {
            Some(baseline) => StateShape::exchange_delta(self, stream, baseline),
            None => StateShape::exchange_delta(self, stream, &T::default()),
        }
    }

    fn has_changed(&self, baseline: &dyn DynShape) -> bool {
        baseline
            .as_any()
            .downcast_ref::<T>()
            .map_or(true, |baseline| StateShape::has_changed(self, baseline))
    }

    fn interpolate(&mut self, src: &dyn DynShape, dst: &dyn DynShape, t: f32) {
        if let (Some(src), Some(dst)) = (src.as_any().downcast_ref::<T>(), dst.as_any().downcast_ref::<T>()) {
            StateShape::interpolate(self, src, dst, t);
        }
    }

    fn copy_from(&mut self, src: &dyn DynShape) {
        if let Some(src) = src.as_any().downcast_ref::<T>() {
            self.clone_from(src);
        }
    }

    fn clear(&mut self) {
        *self = T::default();
    }

    fn same_as(&self, other: &dyn DynShape) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
}

/// One entity's replicated state, tagged with the tick it was captured at.
///
/// Instances come from a [`StateRegistry`](super::StateRegistry) pool and
/// go back to it when the owning [`Frame`](super::Frame) lets go of them.
pub struct EntityState {
    entity: Entity,
    tick: i32,
    state_id: StateId,
    shape: Box<dyn DynShape>,
}

impl fmt::Debug for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityState")
            .field("entity", &self.entity)
            .field("tick", &self.tick)
            .field("state_id", &self.state_id)
            .field("shape", &self.shape)
            .finish()
    }
}

impl EntityState {
    pub(crate) fn from_parts(state_id: StateId, shape: Box<dyn DynShape>) -> Self {
        Self {
            entity: Entity::default(),
            tick: 0,
            state_id,
            shape,
        }
    }

    pub(crate) fn into_shape(self) -> Box<dyn DynShape> {
        self.shape
    }

    /// Entity this state describes.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> Entity {
        self.entity
    }

    /// Entity id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.entity.id
    }

    /// Prefab id.
    #[inline]
    #[must_use]
    pub const fn prefab(&self) -> PrefabId {
        self.entity.prefab
    }

    pub(crate) fn set_entity(&mut self, entity: Entity) {
        self.entity = entity;
    }

    /// Tick this state was captured at.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> i32 {
        self.tick
    }

    /// Retags the capture tick.
    #[inline]
    pub fn set_tick(&mut self, tick: i32) {
        self.tick = tick;
    }

    /// Shape id. Never changes after construction.
    #[inline]
    #[must_use]
    pub const fn state_id(&self) -> StateId {
        self.state_id
    }

    /// Replication priority of the current value.
    #[inline]
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.shape.priority()
    }

    /// Type-erased shape.
    #[must_use]
    pub fn shape(&self) -> &dyn DynShape {
        self.shape.as_ref()
    }

    /// Concrete shape, if it is a `T`.
    #[must_use]
    pub fn get<T: StateShape>(&self) -> Option<&T> {
        self.shape.as_any().downcast_ref::<T>()
    }

    /// Mutable concrete shape, if it is a `T`.
    #[must_use]
    pub fn get_mut<T: StateShape>(&mut self) -> Option<&mut T> {
        self.shape.as_any_mut().downcast_mut::<T>()
    }

    /// Overwrites entity, tick and shape data with `src`.
    ///
    /// Both states must share a shape id.
    pub fn copy_from(&mut self, src: &EntityState) {
        debug_assert_eq!(self.state_id, src.state_id);
        self.entity = src.entity;
        self.tick = src.tick;
        self.shape.copy_from(src.shape.as_ref());
    }

    /// Overwrites only the shape data with `src`.
    pub fn copy_shape_from(&mut self, src: &EntityState) {
        debug_assert_eq!(self.state_id, src.state_id);
        self.shape.copy_from(src.shape.as_ref());
    }

    /// Resets to an unassigned default state.
    pub fn clear(&mut self) {
        self.entity = Entity::default();
        self.tick = 0;
        self.shape.clear();
    }

    /// Whether this state should be sent relative to `baseline`.
    #[must_use]
    pub fn has_changed(&self, baseline: &EntityState) -> bool {
        self.state_id != baseline.state_id || self.shape.has_changed(baseline.shape.as_ref())
    }

    /// Reads or writes the shape data relative to `baseline`.
    pub fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &EntityState) -> bool {
        self.shape.exchange_delta(stream, baseline.shape.as_ref())
    }

    /// Sets the shape data to the blend of `src` and `dst`.
    pub fn interpolate(&mut self, src: &EntityState, dst: &EntityState, t: f32) {
        self.shape.interpolate(src.shape.as_ref(), dst.shape.as_ref(), t);
    }

    /// Entity and shape equality, ignoring the capture tick.
    #[must_use]
    pub fn same_as(&self, other: &EntityState) -> bool {
        self.entity == other.entity && self.state_id == other.state_id && self.shape.same_as(other.shape.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::{BitReader, BitWriter};
    use tickwire_shared::Vec2;

    /// Minimal positional shape shared by the snapshot tests.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub(crate) struct Marker {
        pub position: Vec2,
        pub health: u8,
        pub boost: u32,
    }

    impl StateShape for Marker {
        fn priority(&self) -> u32 {
            self.boost
        }

        fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool {
            stream.exchange_delta_vec2(&mut self.position, baseline.position, -512.0, 512.0, 100.0)
                && stream.exchange_delta_u8(&mut self.health, baseline.health)
                && stream.exchange_delta_u32(&mut self.boost, baseline.boost)
        }

        fn has_changed(&self, baseline: &Self) -> bool {
            self != baseline
        }

        fn interpolate(&mut self, src: &Self, dst: &Self, t: f32) {
            self.position = src.position.lerp(dst.position, t);
            self.health = dst.health;
        }
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Other(u8);

    impl StateShape for Other {
        fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool {
            stream.exchange_delta_u8(&mut self.0, baseline.0)
        }

        fn has_changed(&self, baseline: &Self) -> bool {
            self.0 != baseline.0
        }

        fn interpolate(&mut self, _src: &Self, dst: &Self, _t: f32) {
            self.0 = dst.0;
        }
    }

    fn state<T: StateShape>(id: u8, value: T) -> EntityState {
        EntityState::from_parts(StateId(id), Box::new(value))
    }

    #[test]
    fn test_downcast() {
        let mut s = state(1, Marker::default());
        assert!(s.get::<Marker>().is_some());
        assert!(s.get::<Other>().is_none());
        s.get_mut::<Marker>().unwrap().health = 7;
        assert_eq!(s.get::<Marker>().unwrap().health, 7);
    }

    #[test]
    fn test_delta_against_baseline() {
        let baseline = state(
            1,
            Marker {
                position: Vec2::new(1.0, 2.0),
                health: 100,
                boost: 0,
            },
        );
        let mut sent = state(
            1,
            Marker {
                position: Vec2::new(1.0, 5.0),
                health: 90,
                boost: 0,
            },
        );
        assert!(sent.has_changed(&baseline));

        let mut buffer = [0u8; 32];
        let len = {
            let mut writer = BitWriter::new(&mut buffer);
            assert!(sent.exchange_delta(&mut writer, &baseline));
            writer.bytes_written()
        };

        let mut received = state(1, Marker::default());
        let mut reader = BitReader::new(&buffer[..len]);
        assert!(received.exchange_delta(&mut reader, &baseline));
        assert!(received.shape().same_as(sent.shape()));
    }

    #[test]
    fn test_shape_mismatch_counts_as_changed() {
        let a = state(1, Marker::default());
        let b = state(2, Other(0));
        assert!(a.has_changed(&b));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_interpolate_and_clear() {
        let src = state(
            1,
            Marker {
                position: Vec2::new(0.0, 0.0),
                health: 10,
                boost: 0,
            },
        );
        let dst = state(
            1,
            Marker {
                position: Vec2::new(10.0, 0.0),
                health: 20,
                boost: 0,
            },
        );
        let mut out = state(1, Marker::default());
        out.interpolate(&src, &dst, 0.25);
        let marker = out.get::<Marker>().unwrap();
        assert!((marker.position.x - 2.5).abs() < 1e-5);
        assert_eq!(marker.health, 20);

        out.set_tick(9);
        out.clear();
        assert_eq!(out.tick(), 0);
        assert_eq!(out.get::<Marker>(), Some(&Marker::default()));
    }
}
