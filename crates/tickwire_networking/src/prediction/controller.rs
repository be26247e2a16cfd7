//! Input/result exchange between a client controller and its server twin.

use std::fmt;

use tickwire_core::CircularBuffer;
use tickwire_shared::constants::MAX_ENTRIES_PER_LIST;
use tickwire_shared::{CommandId, ControllerSettings, EntityId};

use crate::codec::{BitReader, BitWriter, Message, Stream};
use crate::command::{CommandDisposition, ControllerCommandHeader};
use crate::error::{CommandResult, StreamResult};

/// Per-tick control input.
pub trait ControllerInput: Clone + Default + fmt::Debug + Send {
    /// Reads or writes the input against `baseline`.
    fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool;

    /// Whether the input differs from `baseline`.
    fn has_changed(&self, baseline: &Self) -> bool;
}

/// Controller state after simulating one input.
pub trait ControllerResult: Clone + Default + fmt::Debug + Send {
    /// Divergence from a predicted result; `0` when in sync.
    fn is_out_of_sync(&self, predicted: &Self) -> i32;

    /// Reads or writes the full result.
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool;
}

/// Game-specific half of a controller.
///
/// The same predictor type runs on both ends: the client produces inputs
/// and simulates them ahead of the server, the server simulates what the
/// client sent and reports the outcome.
pub trait Predictor: Send {
    /// Control input.
    type Input: ControllerInput;
    /// Simulation outcome.
    type Result: ControllerResult;

    /// Samples the input for a client tick.
    fn client_tick(&mut self, tick: i32) -> Self::Input;

    /// Server-side work after the tick's input was simulated.
    fn server_tick(&mut self, _tick: i32) {}

    /// Applies `input` and returns the resulting state.
    fn simulate(&mut self, input: &Self::Input, tick: i32) -> Self::Result;

    /// Overwrites local state with an authoritative result.
    fn reset_state(&mut self, result: &Self::Result);

    /// The controller started driving `entity`.
    fn on_entity_associated(&mut self, _entity: EntityId) {}

    /// The controller stopped driving `entity`.
    fn on_entity_deassociated(&mut self, _entity: EntityId) {}

    /// A controller command reached a disposition. The reader is positioned
    /// after the command header.
    ///
    /// # Errors
    ///
    /// A failure is logged by the caller and otherwise ignored.
    fn on_controller_command(
        &mut self,
        _header: ControllerCommandHeader,
        _id: CommandId,
        _disposition: CommandDisposition,
        _reader: &mut BitReader<'_>,
    ) -> CommandResult<()> {
        Ok(())
    }
}

/// Number of inputs in a client packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputHeader {
    /// Inputs that follow.
    pub count: u8,
}

impl Message for InputHeader {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_u8(&mut self.count)
    }
}

/// Input acknowledgement in a server packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResultHeader {
    /// Newest input tick the server has received.
    pub tick: i32,
    /// Whether the simulated result follows. Dropped when the packet is full.
    pub included: bool,
}

impl Default for ResultHeader {
    fn default() -> Self {
        Self {
            tick: -1,
            included: false,
        }
    }
}

impl Message for ResultHeader {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_i32(&mut self.tick) && stream.exchange_bool(&mut self.included)
    }
}

/// Input tagged with its tick and the result of simulating it.
#[derive(Clone, Debug, Default)]
struct InputRecord<I, R> {
    tick: i32,
    input: I,
    result: R,
}

/// Controller counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Server results that disagreed with the prediction.
    pub mispredictions: u64,
    /// Inputs re-simulated after a misprediction.
    pub replayed: u64,
    /// Server ticks that reused the previous input.
    pub repeated_inputs: u64,
    /// Inputs evicted from a full buffer.
    pub overflowed: u64,
}

/// Per-connection controller as seen by the connection.
///
/// Erases the predictor's input and result types so connections can hold
/// any controller.
pub trait DynController: Send {
    /// Client tick: sample, simulate and buffer an input.
    fn client_tick(&mut self, tick: i32);

    /// Server tick: simulate the input for `tick`, or repeat the last one.
    fn server_tick(&mut self, tick: i32);

    /// Placeholder input header.
    fn input_header(&self) -> InputHeader;

    /// Writes unacknowledged inputs as long as they fit and returns how many
    /// were written.
    fn write_inputs(&self, writer: &mut BitWriter<'_>) -> u8;

    /// Reads the inputs announced by `header`.
    ///
    /// # Errors
    ///
    /// Returns the stream error of a truncated packet.
    fn read_inputs(&mut self, reader: &mut BitReader<'_>, header: InputHeader) -> StreamResult<()>;

    /// Placeholder result header.
    fn result_header(&self) -> ResultHeader;

    /// Writes the last simulated result if it fits and returns whether it
    /// was written.
    fn write_result(&mut self, writer: &mut BitWriter<'_>, header: &ResultHeader) -> bool;

    /// Reads the result announced by `header` and reconciles with it.
    ///
    /// # Errors
    ///
    /// Returns the stream error of a truncated packet.
    fn read_result(&mut self, reader: &mut BitReader<'_>, header: &ResultHeader) -> StreamResult<()>;

    /// Starts driving `entity`. False if it already was.
    fn associate(&mut self, entity: EntityId) -> bool;

    /// Stops driving `entity`. False if it wasn't.
    fn deassociate(&mut self, entity: EntityId) -> bool;

    /// Driven entities.
    fn associated(&self) -> &[EntityId];

    /// Forwards a controller command to the predictor.
    ///
    /// # Errors
    ///
    /// Propagates the predictor's failure.
    fn on_controller_command(
        &mut self,
        header: ControllerCommandHeader,
        id: CommandId,
        disposition: CommandDisposition,
        reader: &mut BitReader<'_>,
    ) -> CommandResult<()>;

    /// Counters.
    fn stats(&self) -> ControllerStats;

    /// Forgets buffered inputs and acknowledgement state.
    fn reset(&mut self);
}

/// Buffers inputs for prediction on the client and for simulation on the
/// server, and reconciles client predictions with server results.
///
/// ```text
/// client                                  server
///   client_tick: input ─► simulate ─► [t, input, result]*
///   write_inputs (after acked tick) ───►  read_inputs ─► [t, input]*
///                                         server_tick(t): simulate input@t
///   read_result ◄──────────────────────── write_result (last processed)
///     mismatch? reset + replay newer
/// ```
pub struct Controller<P: Predictor> {
    predictor: P,
    inputs: CircularBuffer<InputRecord<P::Input, P::Result>>,
    /// Client: newest input tick the server confirmed.
    acked_input_tick: i32,
    /// Server: newest input tick received.
    max_recv_input_tick: i32,
    /// Server: input simulated on the last tick, repeated when none arrives.
    last_processed: InputRecord<P::Input, P::Result>,
    associated: Vec<EntityId>,
    stats: ControllerStats,
}

impl<P: Predictor> fmt::Debug for Controller<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("inputs", &self.inputs.len())
            .field("acked_input_tick", &self.acked_input_tick)
            .field("max_recv_input_tick", &self.max_recv_input_tick)
            .field("associated", &self.associated)
            .finish_non_exhaustive()
    }
}

impl<P: Predictor> Controller<P> {
    fn with_capacity(predictor: P, capacity: usize) -> Self {
        Self {
            predictor,
            inputs: CircularBuffer::new(capacity.max(1)),
            acked_input_tick: -1,
            max_recv_input_tick: -1,
            last_processed: InputRecord::default(),
            associated: Vec::new(),
            stats: ControllerStats::default(),
        }
    }

    /// Client-side controller.
    #[must_use]
    pub fn client(predictor: P, settings: &ControllerSettings) -> Self {
        Self::with_capacity(predictor, settings.client_input_buffer_size)
    }

    /// Server-side controller.
    #[must_use]
    pub fn server(predictor: P, settings: &ControllerSettings) -> Self {
        Self::with_capacity(predictor, settings.server_input_buffer_size)
    }

    /// Game-specific half.
    #[must_use]
    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    /// Mutable game-specific half.
    pub fn predictor_mut(&mut self) -> &mut P {
        &mut self.predictor
    }

    /// Buffered inputs.
    #[must_use]
    pub fn pending_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Ticks of the buffered inputs, oldest first.
    pub fn pending_ticks(&self) -> impl Iterator<Item = i32> + '_ {
        self.inputs.iter().map(|record| record.tick)
    }

    /// Newest input tick the server confirmed.
    #[must_use]
    pub const fn acked_input_tick(&self) -> i32 {
        self.acked_input_tick
    }

    /// Newest input tick received from the client.
    #[must_use]
    pub const fn max_recv_input_tick(&self) -> i32 {
        self.max_recv_input_tick
    }

    fn push(&mut self, record: InputRecord<P::Input, P::Result>) {
        if let Some(evicted) = self.inputs.push_back(record) {
            tracing::trace!("Input for tick {} evicted", evicted.tick);
            self.stats.overflowed += 1;
        }
    }

    fn find_input(&self, tick: i32) -> Option<usize> {
        self.inputs.iter().position(|record| record.tick == tick)
    }

    /// Drops confirmed inputs and replays newer ones if the server's result
    /// for `tick` disagrees with the prediction.
    fn confirm(&mut self, tick: i32, result: &P::Result) {
        let Some(index) = self.find_input(tick) else {
            tracing::debug!("No buffered input for confirmed tick {}", tick);
            return;
        };

        let error = self
            .inputs
            .get(index)
            .map_or(0, |record| result.is_out_of_sync(&record.result));
        if error != 0 {
            tracing::debug!("Controller out of sync at tick {} (error {}), replaying", tick, error);
            self.stats.mispredictions += 1;
            self.predictor.reset_state(result);
            for record in self.inputs.iter_mut().skip(index + 1) {
                record.result = self.predictor.simulate(&record.input, record.tick);
                self.stats.replayed += 1;
            }
        }

        self.inputs.drain_front(index + 1).for_each(drop);
    }
}

impl<P: Predictor> DynController for Controller<P> {
    fn client_tick(&mut self, tick: i32) {
        let input = self.predictor.client_tick(tick);
        let result = self.predictor.simulate(&input, tick);
        self.push(InputRecord { tick, input, result });
    }

    fn server_tick(&mut self, tick: i32) {
        while self.inputs.front().is_some_and(|record| record.tick < tick) {
            self.inputs.pop_front();
        }

        let mut current = match self.find_input(tick).and_then(|index| self.inputs.get(index)) {
            Some(record) => record.clone(),
            None => {
                self.stats.repeated_inputs += 1;
                self.last_processed.clone()
            }
        };
        current.tick = tick;
        current.result = self.predictor.simulate(&current.input, tick);
        self.last_processed = current;

        self.predictor.server_tick(tick);
    }

    fn input_header(&self) -> InputHeader {
        InputHeader {
            count: u8::try_from(self.inputs.len()).unwrap_or(u8::MAX),
        }
    }

    fn write_inputs(&self, writer: &mut BitWriter<'_>) -> u8 {
        if writer.failed() || self.inputs.is_empty() {
            return 0;
        }

        let start = self.find_input(self.acked_input_tick).map_or(0, |index| index + 1);
        let mut previous = P::Input::default();
        let mut sent = 0u8;
        for (offset, record) in self.inputs.iter().skip(start).enumerate() {
            let mark = writer.position();

            if offset == 0 {
                let mut tick = record.tick;
                writer.exchange_i32(&mut tick);
            }

            let mut input = record.input.clone();
            let mut changed = input.has_changed(&previous);
            writer.exchange_bool(&mut changed);
            if changed {
                input.exchange_delta(writer, &previous);
            }

            if writer.failed() {
                writer.rewind(mark);
                break;
            }
            previous = input;
            sent += 1;
            if usize::from(sent) >= MAX_ENTRIES_PER_LIST {
                break;
            }
        }
        sent
    }

    fn read_inputs(&mut self, reader: &mut BitReader<'_>, header: InputHeader) -> StreamResult<()> {
        let mut first_tick = 0i32;
        let mut previous = P::Input::default();
        for offset in 0..header.count {
            if offset == 0 {
                reader.exchange_i32(&mut first_tick);
            }

            let mut changed = false;
            reader.exchange_bool(&mut changed);
            let mut input = previous.clone();
            if changed {
                input.exchange_delta(reader, &previous);
            }
            reader.check()?;

            let tick = first_tick.wrapping_add(i32::from(offset));
            if tick > self.max_recv_input_tick {
                self.push(InputRecord {
                    tick,
                    input: input.clone(),
                    result: P::Result::default(),
                });
                self.max_recv_input_tick = tick;
            }
            previous = input;
        }
        Ok(())
    }

    fn result_header(&self) -> ResultHeader {
        ResultHeader {
            tick: self.max_recv_input_tick,
            included: false,
        }
    }

    fn write_result(&mut self, writer: &mut BitWriter<'_>, header: &ResultHeader) -> bool {
        if writer.failed() {
            return false;
        }

        let mark = writer.position();
        let mut tick = self.last_processed.tick;
        writer.exchange_delta_i32(&mut tick, header.tick);
        self.last_processed.result.exchange(writer);
        if writer.failed() {
            writer.rewind(mark);
            return false;
        }
        true
    }

    fn read_result(&mut self, reader: &mut BitReader<'_>, header: &ResultHeader) -> StreamResult<()> {
        self.acked_input_tick = header.tick;
        if !header.included {
            return Ok(());
        }

        let mut tick = 0i32;
        reader.exchange_delta_i32(&mut tick, header.tick);
        let mut result = P::Result::default();
        result.exchange(reader);
        reader.check()?;

        self.last_processed.tick = tick;
        self.confirm(tick, &result);
        Ok(())
    }

    fn associate(&mut self, entity: EntityId) -> bool {
        if self.associated.contains(&entity) {
            tracing::warn!("Entity {} already associated with controller", entity);
            return false;
        }
        self.associated.push(entity);
        self.predictor.on_entity_associated(entity);
        tracing::debug!("Entity {} associated with controller", entity);
        true
    }

    fn deassociate(&mut self, entity: EntityId) -> bool {
        let Some(index) = self.associated.iter().position(|id| *id == entity) else {
            tracing::warn!("Entity {} not associated with controller", entity);
            return false;
        };
        self.associated.remove(index);
        self.predictor.on_entity_deassociated(entity);
        tracing::debug!("Entity {} deassociated from controller", entity);
        true
    }

    fn associated(&self) -> &[EntityId] {
        &self.associated
    }

    fn on_controller_command(
        &mut self,
        header: ControllerCommandHeader,
        id: CommandId,
        disposition: CommandDisposition,
        reader: &mut BitReader<'_>,
    ) -> CommandResult<()> {
        self.predictor.on_controller_command(header, id, disposition, reader)
    }

    fn stats(&self) -> ControllerStats {
        self.stats
    }

    fn reset(&mut self) {
        self.inputs.clear();
        self.acked_input_tick = -1;
        self.max_recv_input_tick = -1;
        self.last_processed = InputRecord::default();
    }
}
