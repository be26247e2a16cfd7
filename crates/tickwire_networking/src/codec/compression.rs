//! # Compression Model
//!
//! Static bucketed universal code for unsigned 32-bit integers.
//!
//! The value range is split into 16 magnitude buckets. Each bucket has a
//! canonical prefix code (2 to 6 bits) followed by a fixed-width offset:
//!
//! ```text
//! bucket  offset      width  code length
//!   0     0           0      2
//!   1     1           0      3
//!   2     2           1      3
//!   ...
//!  15     153392480   32     6
//! ```
//!
//! Codes are stored bit-reversed so they can be written and peeked as plain
//! little-endian fields; decoding is a single lookup in a 64-entry table.
//! The table is built at compile time and never changes, so both ends of a
//! connection always agree on it.

use super::bitstream::{BitReader, BitWriter};

/// Number of magnitude buckets.
pub const BUCKET_COUNT: usize = 16;

/// Longest prefix code, in bits.
pub const MAX_CODE_LENGTH: u32 = 6;

/// Prefix code length per bucket. Kraft sum is exactly one.
const SYMBOL_LENGTHS: [u32; BUCKET_COUNT] = [2, 3, 3, 3, 4, 4, 4, 5, 5, 5, 6, 6, 6, 6, 6, 6];

/// Offset width per bucket.
const BUCKET_SIZES: [u32; BUCKET_COUNT] = [0, 0, 1, 2, 3, 4, 6, 8, 10, 12, 15, 18, 21, 24, 27, 32];

/// First value of each bucket; `offset[b + 1] = offset[b] + 2^size[b]`.
const BUCKET_OFFSETS: [u32; BUCKET_COUNT] = [
    0, 1, 2, 4, 8, 16, 32, 96, 352, 1376, 5472, 38240, 300384, 2397536, 19174752, 153392480,
];

/// Lowest bucket a value with `n` leading zeros can fall into.
/// At most one step up is needed to find the real bucket.
const FIRST_BUCKET_CANDIDATE: [u8; 33] = [
    15, 15, 15, 15, 14, 14, 14, 13, 13, 13, 12, 12, 12, 11, 11, 11, 10, 10, 10, 9, 9, 8, 8, 7, 7,
    6, 5, 4, 3, 2, 1, 1, 0,
];

const DECODE_TABLE_SIZE: usize = 1 << MAX_CODE_LENGTH;

/// Decoded symbol for one peeked bit pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct DecodeEntry {
    /// Bucket index.
    symbol: u8,
    /// True length of the code.
    length: u8,
}

/// Canonical prefix code tables for the bucket alphabet.
#[derive(Debug)]
pub struct CompressionModel {
    /// Bit-reversed code per bucket.
    codes: [u32; BUCKET_COUNT],
    /// Peeked bits to `(bucket, code length)`.
    decode: [DecodeEntry; DECODE_TABLE_SIZE],
}

/// Process-wide model, built at compile time.
pub static MODEL: CompressionModel = CompressionModel::build();

impl CompressionModel {
    /// Builds the canonical code and its decode table.
    #[must_use]
    pub const fn build() -> Self {
        let mut codes = [0u32; BUCKET_COUNT];
        let mut decode = [DecodeEntry { symbol: 0, length: 0 }; DECODE_TABLE_SIZE];

        let mut next_code = 0u32;
        let mut length = 1u32;
        while length <= MAX_CODE_LENGTH {
            let mut symbol = 0;
            while symbol < BUCKET_COUNT {
                if SYMBOL_LENGTHS[symbol] == length {
                    let reversed = next_code.reverse_bits() >> (32 - length);
                    codes[symbol] = reversed;

                    // Every pattern whose low `length` bits match maps here.
                    let mut fill = reversed as usize;
                    while fill < DECODE_TABLE_SIZE {
                        decode[fill] = DecodeEntry {
                            symbol: symbol as u8,
                            length: length as u8,
                        };
                        fill += 1 << length;
                    }
                    next_code += 1;
                }
                symbol += 1;
            }
            next_code <<= 1;
            length += 1;
        }

        Self { codes, decode }
    }

    /// Bucket holding `value`.
    #[inline]
    #[must_use]
    pub const fn bucket(value: u32) -> usize {
        let candidate = FIRST_BUCKET_CANDIDATE[value.leading_zeros() as usize] as usize;
        if candidate + 1 < BUCKET_COUNT && value >= BUCKET_OFFSETS[candidate + 1] {
            candidate + 1
        } else {
            candidate
        }
    }

    /// Bits needed to encode `value`.
    #[must_use]
    pub const fn encoded_bits(value: u32) -> u32 {
        let bucket = Self::bucket(value);
        SYMBOL_LENGTHS[bucket] + BUCKET_SIZES[bucket]
    }

    /// Writes `value` as a prefix code plus offset.
    ///
    /// Either both parts land or, on overflow, neither does.
    pub fn write(&self, writer: &mut BitWriter<'_>, value: u32) -> bool {
        let bucket = Self::bucket(value);
        let code_bits = SYMBOL_LENGTHS[bucket];
        let tail_bits = BUCKET_SIZES[bucket];
        let combined = u64::from(self.codes[bucket])
            | (u64::from(value - BUCKET_OFFSETS[bucket]) << code_bits);

        writer.write_bits(combined, code_bits + tail_bits)
    }

    /// Reads a value written by [`CompressionModel::write`].
    ///
    /// Returns zero and records an overflow if the code or its offset runs
    /// past the buffer.
    pub fn read(&self, reader: &mut BitReader<'_>) -> u32 {
        let start = reader.position();
        let peeked = reader.peek_bits(MAX_CODE_LENGTH) as usize;
        let entry = self.decode[peeked];
        let bucket = entry.symbol as usize;

        // Consume exactly the code, then the offset.
        let code = reader.read_bits(u32::from(entry.length));
        let tail = reader.read_bits(BUCKET_SIZES[bucket]);
        if reader.failed() {
            reader.set_position(start);
            return 0;
        }
        debug_assert_eq!(code as u32, self.codes[bucket]);

        BUCKET_OFFSETS[bucket].wrapping_add(tail as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[u32]) {
        let mut buffer = vec![0u8; values.len() * 5 + 8];
        let mut writer = BitWriter::new(&mut buffer);
        for &v in values {
            assert!(MODEL.write(&mut writer, v), "write {v}");
        }
        let written = writer.bytes_written();

        let mut reader = BitReader::new(&buffer[..written]);
        for &v in values {
            assert_eq!(MODEL.read(&mut reader), v);
        }
        assert!(!reader.failed());
    }

    #[test]
    fn test_offsets_are_contiguous() {
        for b in 0..BUCKET_COUNT - 1 {
            assert_eq!(
                u64::from(BUCKET_OFFSETS[b]) + (1u64 << BUCKET_SIZES[b]),
                u64::from(BUCKET_OFFSETS[b + 1])
            );
        }
        // The last bucket covers the remainder of the u32 range.
        assert!(u64::from(BUCKET_OFFSETS[15]) + (1u64 << 32) > u64::from(u32::MAX));
    }

    #[test]
    fn test_kraft_sum_is_one() {
        let sum: u32 = SYMBOL_LENGTHS.iter().map(|&l| 1u32 << (MAX_CODE_LENGTH - l)).sum();
        assert_eq!(sum, 1 << MAX_CODE_LENGTH);
    }

    #[test]
    fn test_decode_table_fully_populated() {
        for (pattern, entry) in MODEL.decode.iter().enumerate() {
            assert!(entry.length >= 2, "pattern {pattern:06b} unmapped");
            let code = MODEL.codes[entry.symbol as usize] as usize;
            assert_eq!(pattern & ((1 << entry.length) - 1), code);
        }
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(CompressionModel::bucket(0), 0);
        assert_eq!(CompressionModel::bucket(1), 1);
        for b in 1..BUCKET_COUNT {
            let offset = BUCKET_OFFSETS[b];
            assert_eq!(CompressionModel::bucket(offset), b);
            assert_eq!(CompressionModel::bucket(offset - 1), b - 1);
        }
        assert_eq!(CompressionModel::bucket(u32::MAX), 15);
    }

    #[test]
    fn test_bucket_contains_value() {
        let mut value = 1u32;
        while value < u32::MAX / 3 {
            for v in [value - 1, value, value + 1] {
                let b = CompressionModel::bucket(v);
                assert!(v >= BUCKET_OFFSETS[b]);
                assert!(u64::from(v - BUCKET_OFFSETS[b]) < (1u64 << BUCKET_SIZES[b]));
            }
            value = value * 3 + 1;
        }
    }

    #[test]
    fn test_small_values_are_short() {
        assert_eq!(CompressionModel::encoded_bits(0), 2);
        assert_eq!(CompressionModel::encoded_bits(1), 3);
        assert_eq!(CompressionModel::encoded_bits(2), 4);
        assert_eq!(CompressionModel::encoded_bits(u32::MAX), 38);
    }

    #[test]
    fn test_round_trip() {
        let mut values: Vec<u32> = (0..2000).collect();
        values.extend(BUCKET_OFFSETS.iter().flat_map(|&o| [o, o.saturating_sub(1), o + 1]));
        values.extend([u32::MAX, u32::MAX - 1, 1 << 31, 0x1234_5678]);
        round_trip(&values);
    }

    #[test]
    fn test_overflow_rewinds() {
        let mut buffer = [0u8; 2];
        let mut writer = BitWriter::new(&mut buffer);
        assert!(!MODEL.write(&mut writer, 1_000_000));
        assert_eq!(writer.position(), 0);

        // 300384 needs 6 + 21 bits; only 16 are present.
        let mut buffer = [0u8; 8];
        let mut writer = BitWriter::new(&mut buffer);
        MODEL.write(&mut writer, 300_384);
        let mut reader = BitReader::new(&buffer[..2]);
        assert_eq!(MODEL.read(&mut reader), 0);
        assert!(reader.failed());
        assert_eq!(reader.position(), 0);
    }
}
