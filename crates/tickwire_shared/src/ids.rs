//! # Identifiers
//!
//! Small integer handles used on the wire. Id `0` is reserved as invalid
//! for every handle type.

use std::fmt;

/// Identifier of a live entity within one world instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u16);

impl EntityId {
    /// Reserved invalid id.
    pub const INVALID: Self = Self(0);

    /// Returns true unless this is the reserved id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Spawn template selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrefabId(pub u8);

impl PrefabId {
    /// Reserved invalid id.
    pub const INVALID: Self = Self(0);

    /// Returns true unless this is the reserved id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Shape (schema) of a replicated entity state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub u8);

impl StateId {
    /// Reserved invalid id.
    pub const INVALID: Self = Self(0);

    /// Upper bound; registries never hand this id out.
    pub const MAX: Self = Self(u8::MAX);

    /// Returns true for ids a registry can hand out.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0 && self.0 != u8::MAX
    }
}

/// Entity identity plus the template it was spawned from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Entity {
    /// Entity id.
    pub id: EntityId,
    /// Template id.
    pub prefab: PrefabId,
}

impl Entity {
    /// Creates an entity handle.
    #[must_use]
    pub const fn new(id: EntityId, prefab: PrefabId) -> Self {
        Self { id, prefab }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (prefab {})", self.id, self.prefab.0)
    }
}

/// Per-direction, per-connection command sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(pub u32);

impl CommandId {
    /// Reserved invalid id; nothing has been sent or received yet.
    pub const NONE: Self = Self(0);

    /// First id a channel assigns.
    pub const FIRST: Self = Self(1);

    /// Last id a channel will ever assign.
    pub const LAST: Self = Self(u32::MAX - 1);

    /// Id following this one, or `None` past [`CommandId::LAST`].
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        if self.0 >= Self::LAST.0 {
            None
        } else {
            Some(Self(self.0 + 1))
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids() {
        assert!(!EntityId::INVALID.is_valid());
        assert!(EntityId(1).is_valid());
        assert!(!StateId(0).is_valid());
        assert!(!StateId::MAX.is_valid());
        assert!(StateId(7).is_valid());
        assert!(!PrefabId::INVALID.is_valid());
    }

    #[test]
    fn test_command_id_exhaustion() {
        assert_eq!(CommandId::FIRST.next(), Some(CommandId(2)));
        assert_eq!(CommandId(u32::MAX - 2).next(), Some(CommandId::LAST));
        assert_eq!(CommandId::LAST.next(), None);
        assert_eq!(CommandId(u32::MAX).next(), None);
    }
}
