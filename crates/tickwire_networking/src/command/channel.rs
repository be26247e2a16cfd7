//! Per-connection command queues and their wire encoding.

use tickwire_core::CircularBuffer;
use tickwire_shared::{CommandId, CommandSettings};

use super::{Command, CommandDisposition, CommandType};
use crate::codec::{BitReader, BitWriter, Message, Stream};
use crate::error::{CommandError, CommandResult, StreamError};

/// Receives command dispositions as the channel produces them.
pub trait CommandSink {
    /// Called once per command per terminal disposition.
    fn on_command(&mut self, command: &Command, disposition: CommandDisposition);
}

impl<F> CommandSink for F
where
    F: FnMut(&Command, CommandDisposition),
{
    fn on_command(&mut self, command: &Command, disposition: CommandDisposition) {
        self(command, disposition);
    }
}

/// Number of commands that follow in the packet.
///
/// Written as a placeholder first and patched once the commands are in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandHeader {
    /// Commands in this packet.
    pub count: u8,
}

impl Message for CommandHeader {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_u8(&mut self.count)
    }
}

/// Command channel counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandStats {
    /// Commands queued for sending.
    pub sent: u64,
    /// Sent commands acknowledged.
    pub acked: u64,
    /// Sent commands evicted before acknowledgement.
    pub dropped: u64,
    /// Commands received and queued for processing.
    pub received: u64,
    /// Received commands discarded as already seen.
    pub duplicates: u64,
    /// Received commands evicted before processing.
    pub overflowed: u64,
    /// Received commands of an unknown type.
    pub unknown: u64,
}

/// Outgoing and incoming command queues of one connection.
///
/// # Example
///
/// ```rust,ignore
/// let mut channel = CommandChannel::new(&settings.commands);
/// let id = channel.send(CommandType::SpawnPlayer, &mut EmptyMessage, &mut sink)?;
///
/// // Every outgoing packet:
/// let count = channel.write_commands(&mut writer);
///
/// // Every incoming packet:
/// channel.ack(remote_ack, &mut sink);
/// channel.read_commands(&mut reader, header)?;
///
/// // Every tick:
/// channel.process_commands(&mut sink);
/// ```
#[derive(Debug)]
pub struct CommandChannel {
    /// Largest serialized payload.
    max_command_size: usize,
    /// Commands written into a single packet.
    max_commands_in_packet: usize,
    /// Next id to assign.
    next_id: CommandId,
    /// Highest id the remote end acknowledged.
    last_ack_id: CommandId,
    /// Highest id received from the remote end.
    last_recv_id: CommandId,
    /// Sent commands awaiting acknowledgement.
    outgoing: CircularBuffer<Command>,
    /// Received commands awaiting processing.
    incoming: CircularBuffer<Command>,
    /// Payload serialization buffer.
    scratch: Vec<u8>,
    /// Counters.
    stats: CommandStats,
}

impl CommandChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new(settings: &CommandSettings) -> Self {
        Self {
            max_command_size: settings.max_command_size,
            max_commands_in_packet: settings.max_commands_in_packet.min(usize::from(u8::MAX)),
            next_id: CommandId::FIRST,
            last_ack_id: CommandId::NONE,
            last_recv_id: CommandId::NONE,
            outgoing: CircularBuffer::new(settings.max_commands_in_queue),
            incoming: CircularBuffer::new(settings.max_commands_in_queue),
            scratch: vec![0u8; settings.max_command_size],
            stats: CommandStats::default(),
        }
    }

    /// Highest command id received; sent back to the remote end as the ack.
    #[inline]
    #[must_use]
    pub const fn last_recv_command_id(&self) -> CommandId {
        self.last_recv_id
    }

    /// Highest id the remote end acknowledged.
    #[inline]
    #[must_use]
    pub const fn last_ack_command_id(&self) -> CommandId {
        self.last_ack_id
    }

    /// Sent commands awaiting acknowledgement.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outgoing.len()
    }

    /// Received commands awaiting [`CommandChannel::process_commands`].
    #[inline]
    #[must_use]
    pub fn received(&self) -> usize {
        self.incoming.len()
    }

    /// Counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &CommandStats {
        &self.stats
    }

    /// Queues a command for sending and returns its id.
    ///
    /// If the queue is full, the oldest unacknowledged command is evicted
    /// and reported to `sink` as [`CommandDisposition::Dropped`] before the
    /// new one is stored.
    ///
    /// # Errors
    ///
    /// Fails without assigning an id or touching the queue if the id space
    /// is exhausted or the payload doesn't serialize within the size limit.
    pub fn send(
        &mut self,
        command_type: CommandType,
        payload: &mut dyn Message,
        sink: &mut dyn CommandSink,
    ) -> CommandResult<CommandId> {
        if self.next_id > CommandId::LAST {
            tracing::error!("Command id space exhausted");
            return Err(CommandError::IdSpaceExhausted);
        }

        let data = {
            let mut writer = BitWriter::new(&mut self.scratch);
            payload.exchange(&mut writer);
            match writer.error() {
                Some(error) if error.is_overflow() => {
                    return Err(CommandError::CommandTooLarge {
                        command_type: command_type as u8,
                        max: self.max_command_size,
                    });
                }
                Some(error) => return Err(CommandError::Stream(error.clone())),
                None => writer.as_slice().to_vec(),
            }
        };

        let id = self.next_id;
        self.next_id = CommandId(id.0 + 1);

        if self.outgoing.is_full() {
            if let Some(evicted) = self.outgoing.pop_front() {
                tracing::debug!("Command {} ({:?}) dropped before ack", evicted.id, evicted.command_type);
                self.stats.dropped += 1;
                sink.on_command(&evicted, CommandDisposition::Dropped);
            }
        }

        let _ = self.outgoing.push_back(Command {
            id,
            command_type,
            payload: data,
        });
        self.stats.sent += 1;
        Ok(id)
    }

    /// Writes as many buffered commands as fit, oldest first, and returns
    /// how many were written.
    ///
    /// Only the first command carries its id; the rest follow at +1 each.
    /// A command that doesn't fit is rewound completely and ends the batch.
    pub fn write_commands(&self, writer: &mut BitWriter<'_>) -> u8 {
        if writer.failed() || self.outgoing.is_empty() {
            return 0;
        }

        let max = self.outgoing.len().min(self.max_commands_in_packet);
        let mut written = 0u8;
        for (index, command) in self.outgoing.iter().take(max).enumerate() {
            let mark = writer.position();

            if index == 0 {
                let mut id = command.id.0;
                writer.exchange_delta_u32(&mut id, 1);
            }

            let mut command_type = command.command_type as u8;
            let mut length = i32::try_from(command.payload.len()).unwrap_or(i32::MAX);
            writer.exchange_delta_u8(&mut command_type, 0);
            writer.exchange_delta_i32(&mut length, 0);
            writer.write_bytes(&command.payload);

            if writer.failed() {
                writer.rewind(mark);
                break;
            }
            written += 1;
        }
        written
    }

    /// Reads `header.count` commands, keeping those newer than anything
    /// received before.
    ///
    /// # Errors
    ///
    /// Returns a stream error if the packet is truncated and
    /// [`CommandError::CommandTooLarge`] for an impossible payload length.
    /// Commands read before the failure are kept.
    pub fn read_commands(&mut self, reader: &mut BitReader<'_>, header: CommandHeader) -> CommandResult<()> {
        reader.check()?;

        let mut id = 0u32;
        for index in 0..header.count {
            if index == 0 {
                reader.exchange_delta_u32(&mut id, 1);
            }

            let mut command_type = 0u8;
            let mut length = 0i32;
            reader.exchange_delta_u8(&mut command_type, 0);
            reader.exchange_delta_i32(&mut length, 0);
            reader.check()?;

            let length = usize::try_from(length)
                .ok()
                .filter(|&len| len <= self.max_command_size)
                .ok_or(CommandError::CommandTooLarge {
                    command_type,
                    max: self.max_command_size,
                })?;

            let mut payload = vec![0u8; length];
            if !reader.read_bytes(&mut payload) {
                return Err(reader.check().err().unwrap_or(StreamError::Overflow {
                    position: reader.position(),
                    requested: length * 8,
                    capacity: reader.capacity(),
                })
                .into());
            }

            let command_id = CommandId(id);
            id = id.wrapping_add(1);

            if command_id <= self.last_recv_id {
                self.stats.duplicates += 1;
                continue;
            }
            self.last_recv_id = command_id;

            let Ok(command_type) = CommandType::try_from(command_type) else {
                tracing::warn!("Discarding {} of unknown type {}", command_id, command_type);
                self.stats.unknown += 1;
                continue;
            };

            self.stats.received += 1;
            let evicted = self.incoming.push_back(Command {
                id: command_id,
                command_type,
                payload,
            });
            if let Some(evicted) = evicted {
                tracing::warn!("Receive queue full, discarding unprocessed {}", evicted.id);
                self.stats.overflowed += 1;
            }
        }
        Ok(())
    }

    /// Applies an acknowledgement from the remote end.
    ///
    /// The ack is clamped to the highest id ever sent and ignored unless it
    /// advances. Every buffered command up to it is reported as
    /// [`CommandDisposition::Acked`] in ascending id order, then removed.
    pub fn ack(&mut self, ack: CommandId, sink: &mut dyn CommandSink) {
        let highest_sent = CommandId(self.next_id.0 - 1);
        let ack = ack.min(highest_sent);
        if ack <= self.last_ack_id {
            return;
        }

        let count = self.outgoing.iter().take_while(|command| command.id <= ack).count();
        for command in self.outgoing.drain_front(count) {
            self.stats.acked += 1;
            sink.on_command(&command, CommandDisposition::Acked);
        }
        self.last_ack_id = ack;
    }

    /// Reports every received command as [`CommandDisposition::Received`],
    /// oldest first, and empties the receive queue.
    pub fn process_commands(&mut self, sink: &mut dyn CommandSink) {
        for command in self.incoming.drain() {
            tracing::debug!("Received {} ({:?})", command.id, command.command_type);
            sink.on_command(&command, CommandDisposition::Received);
        }
    }

    /// Drops every queued command in both directions without reporting them.
    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TextMessage;

    fn settings(queue: usize, per_packet: usize) -> CommandSettings {
        CommandSettings {
            max_command_size: 64,
            max_commands_in_queue: queue,
            max_commands_in_packet: per_packet,
        }
    }

    fn text(value: &str) -> TextMessage {
        TextMessage {
            text: value.to_owned(),
        }
    }

    /// Writes one packet worth of commands and returns the bytes plus count.
    fn transmit(channel: &CommandChannel, capacity: usize) -> (Vec<u8>, CommandHeader) {
        let mut buffer = vec![0u8; capacity];
        let mut writer = BitWriter::new(&mut buffer);
        let count = channel.write_commands(&mut writer);
        let len = writer.bytes_written();
        buffer.truncate(len);
        (buffer, CommandHeader { count })
    }

    #[test]
    fn test_send_assigns_increasing_ids() {
        let mut channel = CommandChannel::new(&settings(8, 8));
        let mut sink = |_: &Command, _: CommandDisposition| {};

        let first = channel.send(CommandType::SpawnPlayer, &mut text("a"), &mut sink).unwrap();
        let second = channel.send(CommandType::SpawnPlayer, &mut text("b"), &mut sink).unwrap();
        assert_eq!(first, CommandId(1));
        assert_eq!(second, CommandId(2));
        assert_eq!(channel.pending(), 2);
    }

    #[test]
    fn test_full_queue_drops_oldest_once() {
        let mut channel = CommandChannel::new(&settings(2, 8));
        let mut events = Vec::new();
        let mut sink = |c: &Command, d: CommandDisposition| events.push((c.id, d));

        for name in ["a", "b", "c", "d"] {
            channel.send(CommandType::EntityCommand, &mut text(name), &mut sink).unwrap();
        }

        assert_eq!(
            events,
            vec![
                (CommandId(1), CommandDisposition::Dropped),
                (CommandId(2), CommandDisposition::Dropped)
            ]
        );
        assert_eq!(channel.pending(), 2);
        assert_eq!(channel.stats().dropped, 2);
    }

    #[test]
    fn test_oversized_command_rejected_without_side_effects() {
        let mut channel = CommandChannel::new(&settings(4, 4));
        let mut sink = |_: &Command, _: CommandDisposition| {};

        let err = channel
            .send(CommandType::ControllerCommand, &mut text(&"x".repeat(100)), &mut sink)
            .unwrap_err();
        assert!(matches!(err, CommandError::CommandTooLarge { .. }));
        assert_eq!(channel.pending(), 0);

        let id = channel.send(CommandType::ControllerCommand, &mut text("ok"), &mut sink).unwrap();
        assert_eq!(id, CommandId(1));
    }

    #[test]
    fn test_id_space_exhaustion() {
        let mut channel = CommandChannel::new(&settings(4, 4));
        channel.next_id = CommandId::LAST;
        let mut sink = |_: &Command, _: CommandDisposition| {};

        assert_eq!(
            channel.send(CommandType::SpawnPlayer, &mut text(""), &mut sink),
            Ok(CommandId::LAST)
        );
        assert_eq!(
            channel.send(CommandType::SpawnPlayer, &mut text(""), &mut sink),
            Err(CommandError::IdSpaceExhausted)
        );
        assert_eq!(channel.pending(), 1);
    }

    #[test]
    fn test_ack_prefix_in_order() {
        let mut channel = CommandChannel::new(&settings(8, 8));
        let mut events = Vec::new();
        {
            let mut sink = |c: &Command, d: CommandDisposition| events.push((c.id, d));
            for _ in 0..5 {
                channel.send(CommandType::SpawnPlayer, &mut text("p"), &mut sink).unwrap();
            }
            channel.ack(CommandId(3), &mut sink);
            // Stale and repeated acks are ignored.
            channel.ack(CommandId(2), &mut sink);
            channel.ack(CommandId(3), &mut sink);
        }

        let acked: Vec<_> = events.iter().map(|(id, _)| id.0).collect();
        assert_eq!(acked, vec![1, 2, 3]);
        assert!(events.iter().all(|(_, d)| *d == CommandDisposition::Acked));
        assert_eq!(channel.pending(), 2);
        assert_eq!(channel.last_ack_command_id(), CommandId(3));
    }

    #[test]
    fn test_ack_clamped_to_highest_sent() {
        let mut channel = CommandChannel::new(&settings(8, 8));
        let mut count = 0;
        let mut sink = |_: &Command, _: CommandDisposition| count += 1;
        channel.send(CommandType::SpawnPlayer, &mut text("p"), &mut sink).unwrap();
        channel.send(CommandType::SpawnPlayer, &mut text("q"), &mut sink).unwrap();

        channel.ack(CommandId(1000), &mut sink);
        assert_eq!(channel.last_ack_command_id(), CommandId(2));
        assert_eq!(channel.pending(), 0);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_round_trip_and_duplicates_discarded() {
        let mut sender = CommandChannel::new(&settings(8, 8));
        let mut receiver = CommandChannel::new(&settings(8, 8));
        let mut nothing = |_: &Command, _: CommandDisposition| {};

        sender.send(CommandType::SpawnPlayer, &mut text("one"), &mut nothing).unwrap();
        sender.send(CommandType::EntityCommand, &mut text("two"), &mut nothing).unwrap();

        let (bytes, header) = transmit(&sender, 256);
        assert_eq!(header.count, 2);

        // Same packet delivered twice.
        for _ in 0..2 {
            let mut reader = BitReader::new(&bytes);
            receiver.read_commands(&mut reader, header).unwrap();
        }
        assert_eq!(receiver.received(), 2);
        assert_eq!(receiver.last_recv_command_id(), CommandId(2));
        assert_eq!(receiver.stats().duplicates, 2);

        let mut received = Vec::new();
        receiver.process_commands(&mut |c: &Command, d: CommandDisposition| {
            let mut message = TextMessage::default();
            crate::codec::unpack(&mut message, &c.payload).unwrap();
            received.push((c.id.0, c.command_type, message.text, d));
        });
        assert_eq!(
            received,
            vec![
                (1, CommandType::SpawnPlayer, "one".to_owned(), CommandDisposition::Received),
                (2, CommandType::EntityCommand, "two".to_owned(), CommandDisposition::Received),
            ]
        );
        assert_eq!(receiver.received(), 0);
    }

    #[test]
    fn test_write_stops_at_command_boundary() {
        let mut sender = CommandChannel::new(&settings(8, 8));
        let mut nothing = |_: &Command, _: CommandDisposition| {};
        for _ in 0..4 {
            sender.send(CommandType::SpawnPlayer, &mut text("0123456789"), &mut nothing).unwrap();
        }

        // Each command is ~12 bytes of payload; 30 bytes fit two.
        let (bytes, header) = transmit(&sender, 30);
        assert_eq!(header.count, 2);

        let mut receiver = CommandChannel::new(&settings(8, 8));
        let mut reader = BitReader::new(&bytes);
        receiver.read_commands(&mut reader, header).unwrap();
        assert_eq!(receiver.received(), 2);
    }

    #[test]
    fn test_per_packet_limit() {
        let mut sender = CommandChannel::new(&settings(8, 3));
        let mut nothing = |_: &Command, _: CommandDisposition| {};
        for _ in 0..5 {
            sender.send(CommandType::SpawnPlayer, &mut text(""), &mut nothing).unwrap();
        }
        let (_, header) = transmit(&sender, 256);
        assert_eq!(header.count, 3);
    }

    #[test]
    fn test_truncated_packet_is_error() {
        let mut sender = CommandChannel::new(&settings(8, 8));
        let mut nothing = |_: &Command, _: CommandDisposition| {};
        sender.send(CommandType::SpawnPlayer, &mut text("payload"), &mut nothing).unwrap();
        let (bytes, header) = transmit(&sender, 64);

        let mut receiver = CommandChannel::new(&settings(8, 8));
        let mut reader = BitReader::new(&bytes[..3]);
        assert!(receiver.read_commands(&mut reader, header).is_err());
        assert_eq!(receiver.received(), 0);
        assert_eq!(receiver.last_recv_command_id(), CommandId::NONE);
    }

    #[test]
    fn test_clear_is_silent() {
        let mut channel = CommandChannel::new(&settings(4, 4));
        let mut calls = 0;
        let mut sink = |_: &Command, _: CommandDisposition| calls += 1;
        channel.send(CommandType::SpawnPlayer, &mut text("a"), &mut sink).unwrap();
        channel.clear();
        channel.process_commands(&mut sink);
        channel.ack(CommandId(1), &mut sink);
        assert_eq!(calls, 0);
        assert_eq!(channel.pending(), 0);
    }
}
