//! # Exchange Streams
//!
//! One serialization routine per type, shared by both directions.
//!
//! A [`Stream`] is either writing (values flow from the `&mut` into the
//! buffer) or reading (values flow from the buffer into the `&mut`). State
//! shapes, command payloads and headers implement a single `exchange`
//! function over `&mut dyn Stream` instead of a writer/reader pair.
//!
//! ```rust,ignore
//! fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
//!     stream.exchange_u8(&mut self.kind)
//!         && stream.exchange_i32(&mut self.tick)
//!         && stream.exchange_delta_u16(&mut self.entity, 0)
//! }
//! ```
//!
//! Delta exchanges write the difference to a baseline through the
//! compression model; readers add it back onto the baseline they hold.

use tickwire_shared::{Vec2, Vec3};

use super::bitstream::{
    unzigzag16, unzigzag32, unzigzag64, zigzag16, zigzag32, zigzag64, BitReader, BitWriter,
};
use super::compression::MODEL;
use crate::error::{StreamError, StreamResult};

/// Direction-agnostic bit stream.
pub trait Stream {
    /// True for writers.
    fn is_writing(&self) -> bool;

    /// Bit cursor.
    fn bit_position(&self) -> usize;

    /// Moves the cursor back to `position` and forgets an overflow.
    fn rewind(&mut self, position: usize);

    /// First failure since the last rewind.
    fn error(&self) -> Option<&StreamError>;

    /// Records a protocol error.
    fn fail(&mut self, error: StreamError);

    /// Exchanges the low `bits` bits of `value`.
    fn exchange_bits(&mut self, value: &mut u64, bits: u32) -> bool;

    /// Exchanges a value through the bucketed compression model.
    fn exchange_compressed(&mut self, value: &mut u32) -> bool;

    /// Exchanges a value in the fewest bits covering `[min, max]`.
    fn exchange_ranged(&mut self, value: &mut i64, min: i64, max: i64) -> bool;

    /// Exchanges a float quantized to `precision` steps per unit.
    fn exchange_quantized(&mut self, value: &mut f32, min: f32, max: f32, precision: f32) -> bool;

    /// Exchanges an ASCII string of at most 255 characters.
    fn exchange_string(&mut self, value: &mut String) -> bool;

    /// Exchanges raw bytes. A reader resizes `value` to `len`.
    fn exchange_bytes(&mut self, value: &mut Vec<u8>, len: usize) -> bool;

    /// True if any operation failed since the last rewind.
    fn failed(&self) -> bool {
        self.error().is_some()
    }

    /// Ok unless an operation failed.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure.
    fn check(&self) -> StreamResult<()> {
        self.error().cloned().map_or(Ok(()), Err)
    }

    /// Exchanges a single bit.
    fn exchange_bool(&mut self, value: &mut bool) -> bool {
        let mut bits = u64::from(*value);
        let ok = self.exchange_bits(&mut bits, 1);
        *value = bits != 0;
        ok
    }

    /// Exchanges 8 raw bits.
    fn exchange_u8(&mut self, value: &mut u8) -> bool {
        let mut bits = u64::from(*value);
        let ok = self.exchange_bits(&mut bits, 8);
        *value = bits as u8;
        ok
    }

    /// Exchanges 16 raw bits.
    fn exchange_u16(&mut self, value: &mut u16) -> bool {
        let mut bits = u64::from(*value);
        let ok = self.exchange_bits(&mut bits, 16);
        *value = bits as u16;
        ok
    }

    /// Exchanges 32 raw bits.
    fn exchange_u32(&mut self, value: &mut u32) -> bool {
        let mut bits = u64::from(*value);
        let ok = self.exchange_bits(&mut bits, 32);
        *value = bits as u32;
        ok
    }

    /// Exchanges 64 raw bits.
    fn exchange_u64(&mut self, value: &mut u64) -> bool {
        self.exchange_bits(value, 64)
    }

    /// Exchanges a zig-zagged 16-bit value.
    fn exchange_i16(&mut self, value: &mut i16) -> bool {
        let mut bits = u64::from(zigzag16(*value));
        let ok = self.exchange_bits(&mut bits, 16);
        *value = unzigzag16(bits as u16);
        ok
    }

    /// Exchanges a zig-zagged 32-bit value.
    fn exchange_i32(&mut self, value: &mut i32) -> bool {
        let mut bits = u64::from(zigzag32(*value));
        let ok = self.exchange_bits(&mut bits, 32);
        *value = unzigzag32(bits as u32);
        ok
    }

    /// Exchanges a zig-zagged 64-bit value.
    fn exchange_i64(&mut self, value: &mut i64) -> bool {
        let mut bits = zigzag64(*value);
        let ok = self.exchange_bits(&mut bits, 64);
        *value = unzigzag64(bits);
        ok
    }

    /// Exchanges the raw 32-bit pattern of a float.
    fn exchange_f32(&mut self, value: &mut f32) -> bool {
        let mut bits = u64::from(value.to_bits());
        let ok = self.exchange_bits(&mut bits, 32);
        *value = f32::from_bits(bits as u32);
        ok
    }

    /// Exchanges a signed difference through the compression model.
    fn exchange_delta(&mut self, delta: &mut i32) -> bool {
        let mut encoded = zigzag32(*delta);
        let ok = self.exchange_compressed(&mut encoded);
        *delta = unzigzag32(encoded);
        ok
    }

    /// Exchanges `value` as a difference to `baseline`.
    fn exchange_delta_u8(&mut self, value: &mut u8, baseline: u8) -> bool {
        let mut delta = i32::from(*value) - i32::from(baseline);
        let ok = self.exchange_delta(&mut delta);
        if !self.is_writing() {
            *value = (i32::from(baseline) + delta) as u8;
        }
        ok
    }

    /// Exchanges `value` as a difference to `baseline`.
    fn exchange_delta_u16(&mut self, value: &mut u16, baseline: u16) -> bool {
        let mut delta = i32::from(*value) - i32::from(baseline);
        let ok = self.exchange_delta(&mut delta);
        if !self.is_writing() {
            *value = (i32::from(baseline) + delta) as u16;
        }
        ok
    }

    /// Exchanges `value` as a difference to `baseline`.
    fn exchange_delta_i16(&mut self, value: &mut i16, baseline: i16) -> bool {
        let mut delta = i32::from(*value) - i32::from(baseline);
        let ok = self.exchange_delta(&mut delta);
        if !self.is_writing() {
            *value = (i32::from(baseline) + delta) as i16;
        }
        ok
    }

    /// Exchanges `value` as a wrapping difference to `baseline`.
    fn exchange_delta_i32(&mut self, value: &mut i32, baseline: i32) -> bool {
        let mut delta = value.wrapping_sub(baseline);
        let ok = self.exchange_delta(&mut delta);
        if !self.is_writing() {
            *value = baseline.wrapping_add(delta);
        }
        ok
    }

    /// Exchanges `value` as a wrapping difference to `baseline`.
    fn exchange_delta_u32(&mut self, value: &mut u32, baseline: u32) -> bool {
        let mut delta = value.wrapping_sub(baseline) as i32;
        let ok = self.exchange_delta(&mut delta);
        if !self.is_writing() {
            *value = baseline.wrapping_add(delta as u32);
        }
        ok
    }

    /// Exchanges `value` as a difference to `baseline`.
    ///
    /// The difference travels as 32 bits; larger jumps are truncated.
    fn exchange_delta_i64(&mut self, value: &mut i64, baseline: i64) -> bool {
        let mut delta = value.wrapping_sub(baseline) as i32;
        let ok = self.exchange_delta(&mut delta);
        if !self.is_writing() {
            *value = baseline.wrapping_add(i64::from(delta));
        }
        ok
    }

    /// Exchanges a quantized float only if it moved more than one
    /// quantization step away from `baseline`.
    ///
    /// A reader that sees the unchanged bit restores `baseline`.
    fn exchange_delta_f32(
        &mut self,
        value: &mut f32,
        baseline: f32,
        min: f32,
        max: f32,
        precision: f32,
    ) -> bool {
        let mut changed = (*value - baseline).abs() > 1.0 / precision;
        if !self.exchange_bool(&mut changed) {
            return false;
        }
        if changed {
            self.exchange_quantized(value, min, max, precision)
        } else {
            if !self.is_writing() {
                *value = baseline;
            }
            true
        }
    }

    /// Exchanges both components quantized over the same range.
    fn exchange_vec2(&mut self, value: &mut Vec2, min: f32, max: f32, precision: f32) -> bool {
        self.exchange_quantized(&mut value.x, min, max, precision)
            && self.exchange_quantized(&mut value.y, min, max, precision)
    }

    /// Exchanges every component quantized over the same range.
    fn exchange_vec3(&mut self, value: &mut Vec3, min: f32, max: f32, precision: f32) -> bool {
        self.exchange_quantized(&mut value.x, min, max, precision)
            && self.exchange_quantized(&mut value.y, min, max, precision)
            && self.exchange_quantized(&mut value.z, min, max, precision)
    }

    /// Per-component [`Stream::exchange_delta_f32`].
    fn exchange_delta_vec2(
        &mut self,
        value: &mut Vec2,
        baseline: Vec2,
        min: f32,
        max: f32,
        precision: f32,
    ) -> bool {
        self.exchange_delta_f32(&mut value.x, baseline.x, min, max, precision)
            && self.exchange_delta_f32(&mut value.y, baseline.y, min, max, precision)
    }

    /// Per-component [`Stream::exchange_delta_f32`].
    fn exchange_delta_vec3(
        &mut self,
        value: &mut Vec3,
        baseline: Vec3,
        min: f32,
        max: f32,
        precision: f32,
    ) -> bool {
        self.exchange_delta_f32(&mut value.x, baseline.x, min, max, precision)
            && self.exchange_delta_f32(&mut value.y, baseline.y, min, max, precision)
            && self.exchange_delta_f32(&mut value.z, baseline.z, min, max, precision)
    }
}

impl Stream for BitWriter<'_> {
    fn is_writing(&self) -> bool {
        true
    }

    fn bit_position(&self) -> usize {
        self.position()
    }

    fn rewind(&mut self, position: usize) {
        BitWriter::rewind(self, position);
    }

    fn error(&self) -> Option<&StreamError> {
        BitWriter::error(self)
    }

    fn fail(&mut self, error: StreamError) {
        BitWriter::fail(self, error);
    }

    fn exchange_bits(&mut self, value: &mut u64, bits: u32) -> bool {
        self.write_bits(*value, bits)
    }

    fn exchange_compressed(&mut self, value: &mut u32) -> bool {
        MODEL.write(self, *value)
    }

    fn exchange_ranged(&mut self, value: &mut i64, min: i64, max: i64) -> bool {
        self.write_ranged(*value, min, max)
    }

    fn exchange_quantized(&mut self, value: &mut f32, min: f32, max: f32, precision: f32) -> bool {
        self.write_quantized(*value, min, max, precision)
    }

    fn exchange_string(&mut self, value: &mut String) -> bool {
        self.write_string(value)
    }

    fn exchange_bytes(&mut self, value: &mut Vec<u8>, len: usize) -> bool {
        let len = len.min(value.len());
        self.write_bytes(&value[..len])
    }
}

impl Stream for BitReader<'_> {
    fn is_writing(&self) -> bool {
        false
    }

    fn bit_position(&self) -> usize {
        self.position()
    }

    fn rewind(&mut self, position: usize) {
        BitReader::rewind(self, position);
    }

    fn error(&self) -> Option<&StreamError> {
        BitReader::error(self)
    }

    fn fail(&mut self, error: StreamError) {
        BitReader::fail(self, error);
    }

    fn exchange_bits(&mut self, value: &mut u64, bits: u32) -> bool {
        *value = self.read_bits(bits);
        !self.failed()
    }

    fn exchange_compressed(&mut self, value: &mut u32) -> bool {
        *value = MODEL.read(self);
        !self.failed()
    }

    fn exchange_ranged(&mut self, value: &mut i64, min: i64, max: i64) -> bool {
        *value = self.read_ranged(min, max);
        !self.failed()
    }

    fn exchange_quantized(&mut self, value: &mut f32, min: f32, max: f32, precision: f32) -> bool {
        *value = self.read_quantized(min, max, precision);
        !self.failed()
    }

    fn exchange_string(&mut self, value: &mut String) -> bool {
        *value = self.read_string();
        !self.failed()
    }

    fn exchange_bytes(&mut self, value: &mut Vec<u8>, len: usize) -> bool {
        value.clear();
        value.resize(len, 0);
        if self.read_bytes(value) {
            true
        } else {
            value.clear();
            false
        }
    }
}
