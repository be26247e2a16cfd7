//! # Bit Stream
//!
//! Bit-addressable writer and reader over a fixed byte buffer.
//!
//! ## Layout
//!
//! Values are packed little-endian within bytes: bit 0 of a value lands in
//! the lowest free bit of the first touched byte.
//!
//! ```text
//! write_bits(0b101, 3); write_bits(0b11, 2);
//!
//! byte 0:  . . . 1 1 1 0 1
//!                └┬┘ └─┬─┘
//!               0b11  0b101
//! ```
//!
//! ## Failure
//!
//! Every operation checks capacity first. An operation that doesn't fit
//! records [`StreamError::Overflow`], touches nothing and, for reads,
//! yields zero. Callers rewind to the last complete boundary to recover.
//! Protocol errors (out-of-range values, oversized strings) are sticky and
//! survive a rewind.

use tickwire_shared::constants::MAX_STRING_LENGTH;

use crate::error::{StreamError, StreamResult};

/// Bits needed to represent every value in `0..=range`.
///
/// Equals `floor(log2(range)) + 1`, and `0` for an empty range.
#[inline]
#[must_use]
pub const fn required_bits(range: u64) -> u32 {
    64 - range.leading_zeros()
}

/// Zig-zag maps signed values to unsigned so small magnitudes stay small.
#[inline]
#[must_use]
pub const fn zigzag16(value: i16) -> u16 {
    ((value << 1) ^ (value >> 15)) as u16
}

/// Inverse of [`zigzag16`].
#[inline]
#[must_use]
pub const fn unzigzag16(value: u16) -> i16 {
    ((value >> 1) as i16) ^ -((value & 1) as i16)
}

/// Zig-zag for 32-bit values.
#[inline]
#[must_use]
pub const fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag32`].
#[inline]
#[must_use]
pub const fn unzigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Zig-zag for 64-bit values.
#[inline]
#[must_use]
pub const fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag64`].
#[inline]
#[must_use]
pub const fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[inline]
const fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Bit width of a quantized float over `[min, max]` at `precision` steps per unit.
#[must_use]
pub fn quantized_bits(min: f32, max: f32, precision: f32) -> u32 {
    required_bits(u64::from(((max - min) * precision + 0.5) as u32))
}

/// Clamps `value` into range and scales it to the nearest quantization step.
#[must_use]
pub fn quantize(value: f32, min: f32, max: f32, precision: f32, bits: u32) -> u64 {
    let value = clamp_f32(value, min, max);
    u64::from(((value - min) * precision + 0.5) as u32) & mask(bits)
}

/// Reverses [`quantize`], clamping the result into range.
#[must_use]
pub fn dequantize(data: u64, min: f32, max: f32, precision: f32) -> f32 {
    clamp_f32(data as f32 / precision + min, min, max)
}

/// How a ranged integer is laid out on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RangeLayout {
    /// Both bounds share a sign: the magnitude is written.
    Magnitude { negative: bool, bits: u32 },
    /// Bounds straddle zero: `value - min` is written.
    Offset { bits: u32 },
}

impl RangeLayout {
    fn new(min: i64, max: i64) -> Self {
        if (min >= 0 && max > 0) || (min < 0 && max <= 0) {
            let widest = min.unsigned_abs().max(max.unsigned_abs());
            Self::Magnitude {
                negative: min < 0,
                bits: required_bits(widest),
            }
        } else {
            Self::Offset {
                bits: required_bits(max.wrapping_sub(min) as u64),
            }
        }
    }
}

/// Sets `slot` to `error` unless a protocol error is already recorded.
fn record(slot: &mut Option<StreamError>, error: StreamError) {
    match slot {
        Some(existing) if !existing.is_overflow() => {}
        _ => *slot = Some(error),
    }
}

/// Bit-level writer over a caller-owned buffer.
///
/// # Example
///
/// ```rust,ignore
/// let mut buffer = [0u8; 64];
/// let mut writer = BitWriter::new(&mut buffer);
///
/// writer.write_bits(5, 3);
/// writer.write_ranged(-2, -10, 10);
/// assert!(!writer.failed());
/// let bytes = writer.as_slice();
/// ```
#[derive(Debug)]
pub struct BitWriter<'a> {
    /// Output buffer; its length is the capacity.
    buffer: &'a mut [u8],
    /// Bit cursor.
    position: usize,
    /// First failure since the last rewind.
    error: Option<StreamError>,
}

impl<'a> BitWriter<'a> {
    /// Creates a writer at bit 0 of `buffer`.
    #[must_use]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            error: None,
        }
    }

    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bit cursor.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bits left before the buffer is full.
    #[inline]
    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.position)
    }

    /// Bytes touched so far.
    #[inline]
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.position.div_ceil(8)
    }

    /// The written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.bytes_written().min(self.buffer.len())]
    }

    /// Returns true if any operation failed since the last rewind.
    #[inline]
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// First failure since the last rewind.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    /// Ok unless an operation failed.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure.
    pub fn check(&self) -> StreamResult<()> {
        self.error.clone().map_or(Ok(()), Err)
    }

    /// Moves the cursor without touching the failure state.
    ///
    /// Used to patch a header written earlier, then return to the end.
    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Moves the cursor back to `position` and forgets an overflow.
    ///
    /// Protocol errors stay recorded.
    pub fn rewind(&mut self, position: usize) {
        self.position = position;
        if self.error.as_ref().is_some_and(StreamError::is_overflow) {
            self.error = None;
        }
    }

    /// Records a protocol error.
    pub fn fail(&mut self, error: StreamError) {
        record(&mut self.error, error);
    }

    fn reserve(&mut self, bits: usize) -> bool {
        if self.position + bits > self.buffer.len() * 8 {
            record(
                &mut self.error,
                StreamError::Overflow {
                    position: self.position,
                    requested: bits,
                    capacity: self.buffer.len(),
                },
            );
            return false;
        }
        true
    }

    /// Writes the low `bits` bits of `value`. A zero-bit write is a no-op.
    pub fn write_bits(&mut self, value: u64, bits: u32) -> bool {
        if bits > 64 {
            self.fail(StreamError::InvalidBitCount(bits));
            return false;
        }
        if !self.reserve(bits as usize) {
            return false;
        }
        self.put(value & mask(bits), bits);
        true
    }

    /// Writes without a capacity check; callers reserve first.
    fn put(&mut self, mut value: u64, bits: u32) {
        let mut remaining = bits;
        while remaining > 0 {
            let byte = self.position >> 3;
            let offset = (self.position & 7) as u32;
            let take = (8 - offset).min(remaining);
            let chunk_mask = ((1u16 << take) - 1) as u8;
            let chunk = (value as u8) & chunk_mask;

            self.buffer[byte] = (self.buffer[byte] & !(chunk_mask << offset)) | (chunk << offset);

            value >>= take;
            remaining -= take;
            self.position += take as usize;
        }
    }

    /// Writes a single bit.
    pub fn write_bool(&mut self, value: bool) -> bool {
        self.write_bits(u64::from(value), 1)
    }

    /// Writes `value` in the fewest bits covering `[min, max]`.
    ///
    /// Records [`StreamError::ValueOutOfRange`] if the value or the range is invalid.
    pub fn write_ranged(&mut self, value: i64, min: i64, max: i64) -> bool {
        if max < min || value < min || value > max {
            self.fail(StreamError::ValueOutOfRange { value, min, max });
            return false;
        }
        match RangeLayout::new(min, max) {
            RangeLayout::Magnitude { bits, .. } => self.write_bits(value.unsigned_abs(), bits),
            RangeLayout::Offset { bits } => self.write_bits(value.wrapping_sub(min) as u64, bits),
        }
    }

    /// Writes a float quantized to `precision` steps per unit over `[min, max]`.
    pub fn write_quantized(&mut self, value: f32, min: f32, max: f32, precision: f32) -> bool {
        let bits = quantized_bits(min, max, precision);
        self.write_bits(quantize(value, min, max, precision, bits), bits)
    }

    /// Writes raw bytes, eight bits each.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if !self.reserve(bytes.len() * 8) {
            return false;
        }
        for &byte in bytes {
            self.put(u64::from(byte), 8);
        }
        true
    }

    /// Writes an ASCII string behind a 16-bit length.
    ///
    /// Lengths above 255 are rejected even though the field is 16 bits wide.
    pub fn write_string(&mut self, value: &str) -> bool {
        if value.len() > MAX_STRING_LENGTH {
            self.fail(StreamError::StringTooLong {
                length: value.len(),
                max: MAX_STRING_LENGTH,
            });
            return false;
        }
        if !value.is_ascii() {
            self.fail(StreamError::NonAsciiString);
            return false;
        }
        if !self.reserve(16 + value.len() * 8) {
            return false;
        }
        self.put(value.len() as u64, 16);
        for &byte in value.as_bytes() {
            self.put(u64::from(byte), 8);
        }
        true
    }
}

/// Bit-level reader over a received buffer.
#[derive(Debug)]
pub struct BitReader<'a> {
    /// Input buffer; its length is the capacity.
    buffer: &'a [u8],
    /// Bit cursor.
    position: usize,
    /// First failure since the last rewind.
    error: Option<StreamError>,
}

impl<'a> BitReader<'a> {
    /// Creates a reader at bit 0 of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            error: None,
        }
    }

    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bit cursor.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bits left to read.
    #[inline]
    #[must_use]
    pub const fn remaining_bits(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.position)
    }

    /// Returns true if any operation failed since the last rewind.
    #[inline]
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// First failure since the last rewind.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    /// Ok unless an operation failed.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure.
    pub fn check(&self) -> StreamResult<()> {
        self.error.clone().map_or(Ok(()), Err)
    }

    /// Moves the cursor without touching the failure state.
    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Moves the cursor back to `position` and forgets an overflow.
    pub fn rewind(&mut self, position: usize) {
        self.position = position;
        if self.error.as_ref().is_some_and(StreamError::is_overflow) {
            self.error = None;
        }
    }

    /// Records a protocol error.
    pub fn fail(&mut self, error: StreamError) {
        record(&mut self.error, error);
    }

    fn reserve(&mut self, bits: usize) -> bool {
        if self.position + bits > self.buffer.len() * 8 {
            record(
                &mut self.error,
                StreamError::Overflow {
                    position: self.position,
                    requested: bits,
                    capacity: self.buffer.len(),
                },
            );
            return false;
        }
        true
    }

    /// Reads without a capacity check; bytes past the end read as zero.
    fn take(&mut self, bits: u32) -> u64 {
        let value = self.peek_bits(bits);
        self.position += bits as usize;
        value
    }

    /// Reads `bits` bits at the cursor without consuming them.
    ///
    /// Bits past the end of the buffer read as zero and no failure is
    /// recorded.
    #[must_use]
    pub fn peek_bits(&self, bits: u32) -> u64 {
        let bits = bits.min(64);
        let mut value = 0u64;
        let mut position = self.position;
        let mut shift = 0u32;
        while shift < bits {
            let byte = self.buffer.get(position >> 3).copied().unwrap_or(0);
            let offset = (position & 7) as u32;
            let take = (8 - offset).min(bits - shift);
            let chunk = (byte >> offset) & (((1u16 << take) - 1) as u8);

            value |= u64::from(chunk) << shift;
            shift += take;
            position += take as usize;
        }
        value
    }

    /// Reads `bits` bits. Returns zero and records an overflow if they
    /// aren't there. A zero-bit read is a no-op returning zero.
    pub fn read_bits(&mut self, bits: u32) -> u64 {
        if bits > 64 {
            self.fail(StreamError::InvalidBitCount(bits));
            return 0;
        }
        if !self.reserve(bits as usize) {
            return 0;
        }
        self.take(bits)
    }

    /// Reads a single bit.
    pub fn read_bool(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    /// Reads a value written by [`BitWriter::write_ranged`] with the same bounds.
    ///
    /// A decoded value outside the range records [`StreamError::ValueOutOfRange`]
    /// and yields `min`.
    pub fn read_ranged(&mut self, min: i64, max: i64) -> i64 {
        if max < min {
            self.fail(StreamError::ValueOutOfRange { value: min, min, max });
            return min;
        }
        let value = match RangeLayout::new(min, max) {
            RangeLayout::Magnitude { negative, bits } => {
                let magnitude = self.read_bits(bits) as i64;
                if negative {
                    magnitude.wrapping_neg()
                } else {
                    magnitude
                }
            }
            RangeLayout::Offset { bits } => min.wrapping_add(self.read_bits(bits) as i64),
        };
        if self.failed() {
            return min;
        }
        if value < min || value > max {
            self.fail(StreamError::ValueOutOfRange { value, min, max });
            return min;
        }
        value
    }

    /// Reads a float written by [`BitWriter::write_quantized`] with the same parameters.
    pub fn read_quantized(&mut self, min: f32, max: f32, precision: f32) -> f32 {
        let bits = quantized_bits(min, max, precision);
        let data = self.read_bits(bits);
        dequantize(data, min, max, precision)
    }

    /// Fills `out` with raw bytes. Leaves `out` untouched on overflow.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> bool {
        if !self.reserve(out.len() * 8) {
            return false;
        }
        for byte in out.iter_mut() {
            *byte = self.take(8) as u8;
        }
        true
    }

    /// Reads an ASCII string written by [`BitWriter::write_string`].
    ///
    /// Returns an empty string on failure.
    pub fn read_string(&mut self) -> String {
        let start = self.position;
        let length = self.read_bits(16) as usize;
        if self.failed() {
            return String::new();
        }
        if length > MAX_STRING_LENGTH {
            self.fail(StreamError::StringTooLong {
                length,
                max: MAX_STRING_LENGTH,
            });
            return String::new();
        }
        if !self.reserve(length * 8) {
            self.position = start;
            return String::new();
        }

        let bytes: Vec<u8> = (0..length).map(|_| self.take(8) as u8).collect();
        if !bytes.is_ascii() {
            self.fail(StreamError::NonAsciiString);
            return String::new();
        }
        bytes.into_iter().map(char::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout_little_endian() {
        let mut buffer = [0u8; 2];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(writer.write_bits(0b101, 3));
        assert!(writer.write_bits(0b11, 2));
        assert!(writer.write_bits(0x1FF, 9));
        assert_eq!(writer.position(), 14);
        assert_eq!(writer.bytes_written(), 2);

        assert_eq!(buffer[0], 0b1111_1101);
        assert_eq!(buffer[1], 0b0011_1111);
    }

    #[test]
    fn test_bits_round_trip_all_widths() {
        let mut buffer = [0u8; 600];
        let mut writer = BitWriter::new(&mut buffer);
        for bits in 0..=64u32 {
            writer.write_bits(u64::MAX ^ u64::from(bits), bits);
        }
        assert!(!writer.failed());
        let written = writer.bytes_written();

        let mut reader = BitReader::new(&buffer[..written]);
        for bits in 0..=64u32 {
            assert_eq!(reader.read_bits(bits), (u64::MAX ^ u64::from(bits)) & mask(bits));
        }
        assert!(!reader.failed());
    }

    #[test]
    fn test_overflow_leaves_stream_untouched() {
        let mut buffer = [0xAAu8; 2];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(writer.write_bits(0b1, 10));
        let before = writer.position();

        assert!(!writer.write_bits(u64::MAX, 7));
        assert!(writer.failed());
        assert!(writer.error().is_some_and(StreamError::is_overflow));
        assert_eq!(writer.position(), before);

        // Remaining six bits still usable after a rewind.
        writer.rewind(before);
        assert!(!writer.failed());
        assert!(writer.write_bits(0, 6));
        assert_eq!(buffer[1], 0b0000_0000);
    }

    #[test]
    fn test_overflow_at_every_width() {
        for bits in 1..=64u32 {
            let capacity = ((bits as usize) - 1) / 8;
            let mut buffer = vec![0x55u8; capacity];
            let mut writer = BitWriter::new(&mut buffer);
            assert!(!writer.write_bits(u64::MAX, bits));
            assert_eq!(writer.position(), 0);
            assert!(buffer.iter().all(|&b| b == 0x55));

            let mut reader = BitReader::new(&buffer);
            assert_eq!(reader.read_bits(bits), 0);
            assert!(reader.failed());
            assert_eq!(reader.position(), 0);
        }
    }

    #[test]
    fn test_zero_bit_operations_are_noops() {
        let mut buffer = [0u8; 0];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(writer.write_bits(123, 0));
        assert!(!writer.failed());

        let mut reader = BitReader::new(&buffer);
        assert_eq!(reader.read_bits(0), 0);
        assert!(!reader.failed());
    }

    #[test]
    fn test_invalid_bit_count() {
        let mut buffer = [0u8; 16];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(!writer.write_bits(1, 65));
        assert_eq!(writer.error(), Some(&StreamError::InvalidBitCount(65)));
    }

    #[test]
    fn test_required_bits() {
        assert_eq!(required_bits(0), 0);
        assert_eq!(required_bits(1), 1);
        assert_eq!(required_bits(2), 2);
        assert_eq!(required_bits(255), 8);
        assert_eq!(required_bits(256), 9);
        assert_eq!(required_bits(u64::MAX), 64);
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag32(0), 0);
        assert_eq!(zigzag32(-1), 1);
        assert_eq!(zigzag32(1), 2);
        assert_eq!(zigzag32(-2), 3);
        for v in [i32::MIN, -1000, -1, 0, 1, 77, i32::MAX] {
            assert_eq!(unzigzag32(zigzag32(v)), v);
        }
        for v in [i16::MIN, -3, 0, 3, i16::MAX] {
            assert_eq!(unzigzag16(zigzag16(v)), v);
        }
        for v in [i64::MIN, -5, 0, 5, i64::MAX] {
            assert_eq!(unzigzag64(zigzag64(v)), v);
        }
    }

    #[test]
    fn test_ranged_layouts() {
        let cases: [(i64, i64, i64); 8] = [
            (0, 0, 10),
            (10, 0, 10),
            (-5, -10, 10),
            (10, -10, 10),
            (-10, -10, -1),
            (-1, -10, -1),
            (150, 100, 200),
            (0, 0, 0),
        ];

        let mut buffer = [0u8; 64];
        let mut writer = BitWriter::new(&mut buffer);
        for &(value, min, max) in &cases {
            assert!(writer.write_ranged(value, min, max), "{value} in [{min}, {max}]");
        }
        let written = writer.bytes_written();

        let mut reader = BitReader::new(&buffer[..written]);
        for &(value, min, max) in &cases {
            assert_eq!(reader.read_ranged(min, max), value);
        }
        assert!(!reader.failed());
    }

    #[test]
    fn test_ranged_width() {
        let mut buffer = [0u8; 8];
        let mut writer = BitWriter::new(&mut buffer);
        writer.write_ranged(3, -4, 4);
        assert_eq!(writer.position(), 4);
        writer.write_ranged(7, 0, 7);
        assert_eq!(writer.position(), 7);
    }

    #[test]
    fn test_ranged_out_of_range_is_sticky() {
        let mut buffer = [0u8; 8];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(!writer.write_ranged(11, 0, 10));
        assert_eq!(writer.position(), 0);

        writer.rewind(0);
        assert!(matches!(writer.error(), Some(StreamError::ValueOutOfRange { .. })));
        assert!(writer.check().is_err());
    }

    #[test]
    fn test_quantized_error_bounded() {
        let precision = 1000.0;
        let values = [-100.0f32, -99.9995, -12.345, 0.0, 0.0004, 33.3333, 99.999, 100.0];

        let mut buffer = [0u8; 64];
        let mut writer = BitWriter::new(&mut buffer);
        for &v in &values {
            writer.write_quantized(v, -100.0, 100.0, precision);
        }
        let written = writer.bytes_written();

        let mut reader = BitReader::new(&buffer[..written]);
        for &v in &values {
            let decoded = reader.read_quantized(-100.0, 100.0, precision);
            assert!((decoded - v).abs() <= 1.0 / precision, "{v} -> {decoded}");
        }
    }

    #[test]
    fn test_quantized_clamps() {
        let mut buffer = [0u8; 8];
        let mut writer = BitWriter::new(&mut buffer);
        writer.write_quantized(500.0, 0.0, 10.0, 10.0);
        writer.write_quantized(-500.0, 0.0, 10.0, 10.0);
        let written = writer.bytes_written();

        let mut reader = BitReader::new(&buffer[..written]);
        assert!((reader.read_quantized(0.0, 10.0, 10.0) - 10.0).abs() < 1e-6);
        assert!(reader.read_quantized(0.0, 10.0, 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_string_round_trip() {
        let mut buffer = [0u8; 64];
        let mut writer = BitWriter::new(&mut buffer);
        writer.write_bool(true);
        assert!(writer.write_string("Name:arena"));
        let written = writer.bytes_written();

        let mut reader = BitReader::new(&buffer[..written]);
        assert!(reader.read_bool());
        assert_eq!(reader.read_string(), "Name:arena");
    }

    #[test]
    fn test_string_limits() {
        let mut buffer = [0u8; 512];
        let mut writer = BitWriter::new(&mut buffer);

        let long = "x".repeat(256);
        assert!(!writer.write_string(&long));
        assert!(matches!(writer.error(), Some(StreamError::StringTooLong { length: 256, .. })));

        let mut buffer = [0u8; 512];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(writer.write_string(&"y".repeat(255)));

        let mut buffer = [0u8; 16];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(!writer.write_string("héllo"));
        assert_eq!(writer.error(), Some(&StreamError::NonAsciiString));
    }

    #[test]
    fn test_string_overflow_atomic() {
        let mut buffer = [0u8; 4];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(!writer.write_string("abcd"));
        assert_eq!(writer.position(), 0);
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut buffer = [0u8; 8];
        let mut writer = BitWriter::new(&mut buffer);
        writer.write_bits(1, 3);
        assert!(writer.write_bytes(&[0xDE, 0xAD, 0xBE]));
        let written = writer.bytes_written();

        let mut reader = BitReader::new(&buffer[..written]);
        assert_eq!(reader.read_bits(3), 1);
        let mut out = [0u8; 3];
        assert!(reader.read_bytes(&mut out));
        assert_eq!(out, [0xDE, 0xAD, 0xBE]);

        let mut too_many = [0u8; 4];
        assert!(!reader.read_bytes(&mut too_many));
        assert_eq!(too_many, [0; 4]);
    }

    #[test]
    fn test_peek_zero_fills() {
        let buffer = [0b1010_0000u8];
        let mut reader = BitReader::new(&buffer);
        reader.set_position(5);
        assert_eq!(reader.peek_bits(6), 0b101);
        assert!(!reader.failed());
        assert_eq!(reader.position(), 5);
    }
}
