//! Payloads of the built-in command types.

use tickwire_shared::EntityId;

use crate::codec::{Message, Stream};

/// Payload-less command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmptyMessage;

impl Message for EmptyMessage {
    fn exchange(&mut self, _stream: &mut dyn Stream) -> bool {
        true
    }
}

/// Direction of an entity/controller association.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Association {
    /// The controller now drives the entity.
    Link = 1,
    /// The controller no longer drives the entity.
    Unlink = 2,
}

impl TryFrom<u8> for Association {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Link),
            2 => Ok(Self::Unlink),
            other => Err(other),
        }
    }
}

/// An entity id plus one byte of data.
///
/// Carries [`Association`] in `data` for
/// [`CommandType::AssociateEntityWithController`](super::CommandType::AssociateEntityWithController).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityMessage {
    /// Target entity.
    pub entity: EntityId,
    /// Extra byte.
    pub data: u8,
}

impl EntityMessage {
    /// Association message for `entity`.
    #[must_use]
    pub const fn association(entity: EntityId, association: Association) -> Self {
        Self {
            entity,
            data: association as u8,
        }
    }
}

impl Message for EntityMessage {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_u16(&mut self.entity.0) && stream.exchange_delta_u8(&mut self.data, 0)
    }
}

/// Prefix of an entity command; the command-specific body follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityCommandHeader {
    /// Game-defined sub-kind.
    pub kind: u8,
    /// Sender's tick when the command was issued.
    pub local_tick: i32,
    /// Target entity.
    pub entity: EntityId,
}

impl Message for EntityCommandHeader {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_u8(&mut self.kind)
            && stream.exchange_i32(&mut self.local_tick)
            && stream.exchange_delta_u16(&mut self.entity.0, 0)
    }
}

/// Prefix of a controller command; the command-specific body follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerCommandHeader {
    /// Game-defined sub-kind.
    pub kind: u8,
}

impl Message for ControllerCommandHeader {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_u8(&mut self.kind)
    }
}

/// A controller command: header followed by its body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerCommand<M> {
    /// Sub-kind.
    pub header: ControllerCommandHeader,
    /// Command-specific body.
    pub body: M,
}

impl<M> ControllerCommand<M> {
    /// Wraps `body` with sub-kind `kind`.
    pub const fn new(kind: u8, body: M) -> Self {
        Self {
            header: ControllerCommandHeader { kind },
            body,
        }
    }
}

impl<M: Message> Message for ControllerCommand<M> {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        self.header.exchange(stream) && self.body.exchange(stream)
    }
}

/// An entity command: header followed by its body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityCommand<M> {
    /// Target, sub-kind and issue tick.
    pub header: EntityCommandHeader,
    /// Command-specific body.
    pub body: M,
}

impl<M: Message> Message for EntityCommand<M> {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        self.header.exchange(stream) && self.body.exchange(stream)
    }
}
