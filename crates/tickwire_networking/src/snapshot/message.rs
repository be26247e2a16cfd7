//! Wire encoding of a [`DeltaFrame`].
//!
//! ```text
//! tick header   source tick, delta against the packet tick
//! delta header  empty? [created? destroyed? changed?] [counts, u8 each]
//! ...
//! created       (id Δ, prefab Δ, state Δ vs default)*
//! destroyed     (id Δ)*
//! changed       (id Δ, state Δ vs baseline)*
//! ```
//!
//! Ids are delta coded against the previous entry of the same list.

use tickwire_shared::constants::MAX_ENTRIES_PER_LIST;
use tickwire_shared::{Entity, EntityId};

use super::delta::DeltaFrame;
use super::frame::Frame;
use crate::codec::{BitReader, BitWriter, Message, Stream};
use crate::error::{SnapshotError, SnapshotResult};

/// Source frame tick of a delta.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotTickHeader {
    /// Tick of the baseline frame; `0` for the empty frame.
    pub source_tick: i32,
}

impl SnapshotTickHeader {
    /// Exchanges the source tick relative to the tick of the packet.
    pub fn exchange(&mut self, stream: &mut dyn Stream, packet_tick: i32) -> bool {
        stream.exchange_delta_i32(&mut self.source_tick, packet_tick)
    }
}

/// List counts of a delta.
///
/// `None` marks a list absent from the packet. The header is written as a
/// placeholder before the lists and patched afterwards, so patching keeps
/// the presence layout and only lowers counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeltaHeader {
    /// Created entities.
    pub created: Option<u8>,
    /// Destroyed entities.
    pub destroyed: Option<u8>,
    /// Changed entities.
    pub changed: Option<u8>,
}

fn present(count: usize) -> Option<u8> {
    (count > 0).then(|| u8::try_from(count.min(MAX_ENTRIES_PER_LIST)).unwrap_or(u8::MAX))
}

impl DeltaHeader {
    /// Placeholder header for `delta`.
    #[must_use]
    pub fn for_delta(delta: &DeltaFrame) -> Self {
        Self {
            created: present(delta.created_len()),
            destroyed: present(delta.destroyed_len()),
            changed: present(delta.changed_len()),
        }
    }

    /// Same layout with the counts actually written.
    #[must_use]
    pub fn with_counts(self, created: u8, destroyed: u8, changed: u8) -> Self {
        Self {
            created: self.created.map(|_| created),
            destroyed: self.destroyed.map(|_| destroyed),
            changed: self.changed.map(|_| changed),
        }
    }

    /// Whether no list is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.created.is_none() && self.destroyed.is_none() && self.changed.is_none()
    }

    /// Created count, zero if absent.
    #[must_use]
    pub fn created_count(&self) -> u8 {
        self.created.unwrap_or(0)
    }

    /// Destroyed count, zero if absent.
    #[must_use]
    pub fn destroyed_count(&self) -> u8 {
        self.destroyed.unwrap_or(0)
    }

    /// Changed count, zero if absent.
    #[must_use]
    pub fn changed_count(&self) -> u8 {
        self.changed.unwrap_or(0)
    }
}

fn exchange_optional_count(stream: &mut dyn Stream, count: &mut Option<u8>) -> bool {
    let mut value = count.unwrap_or(0);
    let ok = stream.exchange_u8(&mut value);
    if !stream.is_writing() {
        *count = Some(value);
    }
    ok
}

impl Message for DeltaHeader {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        let mut empty = self.is_empty();
        if !stream.exchange_bool(&mut empty) {
            return false;
        }
        if empty {
            *self = Self::default();
            return true;
        }

        let mut created = self.created.is_some();
        let mut destroyed = self.destroyed.is_some();
        let mut changed = self.changed.is_some();
        if !(stream.exchange_bool(&mut created)
            && stream.exchange_bool(&mut destroyed)
            && stream.exchange_bool(&mut changed))
        {
            return false;
        }
        if !stream.is_writing() {
            self.created = None;
            self.destroyed = None;
            self.changed = None;
        }

        (!created || exchange_optional_count(stream, &mut self.created))
            && (!destroyed || exchange_optional_count(stream, &mut self.destroyed))
            && (!changed || exchange_optional_count(stream, &mut self.changed))
    }
}

/// Ends a list entry: on overflow rewinds to `mark` and reports the list
/// as finished.
fn entry_fits(writer: &mut BitWriter<'_>, mark: usize) -> bool {
    if writer.failed() {
        writer.rewind(mark);
        false
    } else {
        true
    }
}

/// Writes as much of `delta` as fits and returns `placeholder` patched with
/// the counts written.
///
/// `src` and `dst` must be the frames `delta` was calculated from. Each list
/// stops at the first entry that doesn't fit; nothing is ever half written.
///
/// # Errors
///
/// Returns a stream error for anything other than running out of space.
pub fn write_delta(
    writer: &mut BitWriter<'_>,
    delta: &DeltaFrame,
    placeholder: DeltaHeader,
    src: &Frame,
    dst: &mut Frame,
) -> SnapshotResult<DeltaHeader> {
    let registry = std::sync::Arc::clone(dst.registry());
    let mut created = 0u8;
    let mut destroyed = 0u8;
    let mut changed = 0u8;

    if !writer.failed() {
        let mut previous = Entity::default();
        for entry in delta.created.iter().take(usize::from(placeholder.created_count())) {
            let mark = writer.position();
            let state = &mut dst.states_mut()[entry.dst];
            let mut entity = state.entity();
            writer.exchange_delta_u16(&mut entity.id.0, previous.id.0);
            writer.exchange_delta_u8(&mut entity.prefab.0, previous.prefab.0);

            let baseline = registry.acquire(state.state_id(), entity)?;
            state.exchange_delta(writer, &baseline);
            registry.release(baseline);
            previous = entity;

            if !entry_fits(writer, mark) {
                break;
            }
            created += 1;
        }
    }

    if !writer.failed() {
        let mut previous = EntityId::INVALID;
        for entry in delta.destroyed.iter().take(usize::from(placeholder.destroyed_count())) {
            let mark = writer.position();
            let mut id = entry.entity.id;
            writer.exchange_delta_u16(&mut id.0, previous.0);
            previous = id;

            if !entry_fits(writer, mark) {
                break;
            }
            destroyed += 1;
        }
    }

    if !writer.failed() {
        let mut previous = EntityId::INVALID;
        for entry in delta.changed.iter().take(usize::from(placeholder.changed_count())) {
            let mark = writer.position();
            let baseline = &src.states()[entry.src];
            let state = &mut dst.states_mut()[entry.dst];
            let mut id = state.id();
            writer.exchange_delta_u16(&mut id.0, previous.0);
            state.exchange_delta(writer, baseline);
            previous = id;

            if !entry_fits(writer, mark) {
                break;
            }
            changed += 1;
        }
    }

    writer.check()?;
    Ok(placeholder.with_counts(created, destroyed, changed))
}

/// Rolls back the entries `header` didn't carry, so `dst` matches the frame
/// the receiver rebuilds from the packet.
///
/// Unsent created entities are removed, unsent destroyed ones restored and
/// unsent changes reverted, each keeping its `src` tick so its priority
/// keeps growing until it goes out.
///
/// # Errors
///
/// Fails if a destroyed entity can't be copied back into `dst`.
pub fn revert_unsent(
    delta: &DeltaFrame,
    header: &DeltaHeader,
    src: &Frame,
    dst: &mut Frame,
) -> SnapshotResult<()> {
    let created: Vec<EntityId> = delta
        .created
        .iter()
        .skip(usize::from(header.created_count()))
        .map(|entry| dst.states()[entry.dst].id())
        .collect();
    let changed: Vec<(EntityId, usize)> = delta
        .changed
        .iter()
        .skip(usize::from(header.changed_count()))
        .map(|entry| (dst.states()[entry.dst].id(), entry.src))
        .collect();

    for id in created {
        dst.remove(id);
    }
    for (id, src_index) in changed {
        if let Some(state) = dst.get_mut(id) {
            state.copy_from(&src.states()[src_index]);
        }
    }
    for entry in delta.destroyed.iter().skip(usize::from(header.destroyed_count())) {
        if let Some(state) = src.get(entry.entity.id) {
            dst.insert_copy(state)?;
        }
    }
    Ok(())
}

/// Applies a delta read from `reader` to `dst`.
///
/// `dst` must start as a copy of `src`, the baseline the sender diffed
/// against. Changed entities missing from `src` are read against a default
/// state.
///
/// # Errors
///
/// Fails on a truncated packet, an unmapped prefab, a duplicate created
/// entity, or a destroyed or changed entity that `dst` doesn't hold. `dst`
/// is left partially updated and should be discarded.
pub fn read_delta(
    reader: &mut BitReader<'_>,
    header: &DeltaHeader,
    src: &Frame,
    dst: &mut Frame,
) -> SnapshotResult<()> {
    let registry = std::sync::Arc::clone(dst.registry());

    let mut previous = Entity::default();
    for _ in 0..header.created_count() {
        let mut entity = Entity::default();
        reader.exchange_delta_u16(&mut entity.id.0, previous.id.0);
        reader.exchange_delta_u8(&mut entity.prefab.0, previous.prefab.0);
        reader.check()?;

        let state = dst.insert_default(entity)?;
        let baseline = registry.acquire(state.state_id(), entity)?;
        state.exchange_delta(reader, &baseline);
        registry.release(baseline);
        reader.check()?;
        previous = entity;
    }

    let mut previous = EntityId::INVALID;
    for _ in 0..header.destroyed_count() {
        let mut id = EntityId::INVALID;
        reader.exchange_delta_u16(&mut id.0, previous.0);
        reader.check()?;
        if !dst.remove(id) {
            return Err(SnapshotError::UnknownEntity(id));
        }
        previous = id;
    }

    let mut previous = EntityId::INVALID;
    for _ in 0..header.changed_count() {
        let mut id = EntityId::INVALID;
        reader.exchange_delta_u16(&mut id.0, previous.0);
        reader.check()?;

        let state = dst.get_mut(id).ok_or(SnapshotError::UnknownEntity(id))?;
        match src.get(id) {
            Some(baseline) => {
                state.exchange_delta(reader, baseline);
            }
            None => {
                let baseline = registry.acquire(state.state_id(), state.entity())?;
                state.exchange_delta(reader, &baseline);
                registry.release(baseline);
            }
        }
        reader.check()?;
        previous = id;
    }

    Ok(())
}
