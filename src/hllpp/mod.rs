// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Bucketed HyperLogLog++ sketch for cardinality estimation.
//!
//! One [`HyperLogLogPlusPlus`] instance tracks an unbounded number of
//! independent counting contexts ("buckets", e.g. one per aggregation group).
//! Each bucket starts in a low-memory linear counting phase and upgrades to
//! HyperLogLog registers once its distinct-value count crosses a threshold;
//! the transition is one-way. All growable storage is routed through a
//! [`crate::memory::MemoryAccountant`] so one query cannot exhaust memory.
//!
//! # Precision
//!
//! Precision `p` in [4, 18] fixes `m = 2^p` registers per bucket, trading
//! memory (`m` bytes per upgraded bucket) against accuracy (relative error
//! about `1.04 / sqrt(m)`). Two sketches can only be merged when their
//! precisions match.
//!
//! # Encoded hashes
//!
//! While a bucket is in the linear counting phase, each 64-bit hash is packed
//! into a nonzero 32-bit value carrying the top 25 index bits and, when those
//! cannot reproduce it, the register run length. The packed form decodes into
//! `(register index, run length)` at the sketch's precision, so upgrading a
//! bucket replays its stored values without touching the original hashes.
//! `0` never encodes a hash and marks an empty table slot.

use std::hash::Hash;

mod bit_array;
mod estimator;
mod linear_counting;
mod register_bank;
mod serialization;
mod sketch;

pub use linear_counting::HashesIterator;
pub use register_bank::RunLenIterator;
pub use sketch::HyperLogLogPlusPlus;
pub use sketch::HyperLogLogPlusPlusBuilder;

/// Smallest supported precision.
pub const MIN_PRECISION: u32 = 4;
/// Largest supported precision.
pub const MAX_PRECISION: u32 = 18;
/// Precision used when callers express no preference.
pub const DEFAULT_PRECISION: u32 = 14;

/// Load factor at which linear counting tables grow and above which a bucket
/// upgrades.
const MAX_LOAD_FACTOR: f64 = 0.75;

/// Precision of the index kept inside an encoded hash. Must exceed
/// [`MAX_PRECISION`] so any supported precision can decode from it.
const ENCODING_PRECISION: u32 = 25;

/// Per-bucket counting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    LinearCounting = 0,
    HyperLogLog = 1,
}

/// Expected register memory in bytes for one bucket at `precision`.
pub fn memory_usage(precision: u32) -> u64 {
    assert!(
        (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
        "precision must be in [{MIN_PRECISION}, {MAX_PRECISION}], got {precision}"
    );
    1u64 << precision
}

/// Smallest precision whose linear counting table can hold `count` entries at
/// the maximum load factor. Monotonic nondecreasing in `count`, clamped to
/// `[MIN_PRECISION, MAX_PRECISION]`.
pub fn precision_from_threshold(count: u64) -> u32 {
    let entries = count.saturating_mul(4).div_ceil(3);
    let table_bytes = entries.saturating_mul(size_of::<u32>() as u64);
    let bits = 64 - table_bytes.leading_zeros();
    bits.clamp(MIN_PRECISION, MAX_PRECISION)
}

/// Hash an arbitrary value the way the convenience update path does.
///
/// Exposed so callers that pre-hash on their side can stay byte-compatible
/// with [`HyperLogLogPlusPlus::update`].
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    crate::hash::hash64(value)
}

/// Register index of a raw hash: its top `precision` bits.
#[inline]
fn register_index(hash: u64, precision: u32) -> u32 {
    (hash >> (64 - precision)) as u32
}

/// Run length of a raw hash at `precision`: leading zeros of the remaining
/// bits plus one, saturating when every remaining bit is zero.
#[inline]
fn run_len(hash: u64, precision: u32) -> u8 {
    ((hash << precision).leading_zeros().min(64 - precision) + 1) as u8
}

/// Pack a raw hash into its nonzero 32-bit linear counting form.
///
/// The top [`ENCODING_PRECISION`] bits of the hash always survive. When the
/// bits between `precision` and [`ENCODING_PRECISION`] are all zero the run
/// length cannot be recovered from the index alone, so it is materialized in
/// the low bits and flagged:
///
/// - flag 1: `index << 7 | run_len_at_25 << 1 | 1`
/// - flag 0: `index << 1`
#[inline]
fn encode_hash(hash: u64, precision: u32) -> u32 {
    let index = register_index(hash, ENCODING_PRECISION);
    let low_mask = (1u32 << (ENCODING_PRECISION - precision)) - 1;
    if index & low_mask == 0 {
        (index << 7) | (u32::from(run_len(hash, ENCODING_PRECISION)) << 1) | 1
    } else {
        index << 1
    }
}

/// Register index at `precision` of an encoded value.
#[inline]
fn decode_index(encoded: u32, precision: u32) -> u32 {
    let index = if encoded & 1 == 1 {
        encoded >> 7
    } else {
        encoded >> 1
    };
    index >> (ENCODING_PRECISION - precision)
}

/// Run length at `precision` of an encoded value.
#[inline]
fn decode_run_len(encoded: u32, precision: u32) -> u8 {
    if encoded & 1 == 1 {
        (((encoded >> 1) & 0x3F) + (ENCODING_PRECISION - precision)) as u8
    } else {
        // The bits between `precision` and the encoding precision are known
        // nonzero; left-align them and count.
        let index = u64::from(encoded >> 1);
        let aligned = index << (64 - ENCODING_PRECISION + precision);
        (aligned.leading_zeros() + 1) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage() {
        assert_eq!(memory_usage(10), 1024);
        assert_eq!(memory_usage(18), 262144);
    }

    #[test]
    fn test_precision_from_threshold_clamped_and_monotonic() {
        let low = precision_from_threshold(100);
        let high = precision_from_threshold(100_000);
        assert!(low <= high);
        assert!((MIN_PRECISION..=MAX_PRECISION).contains(&low));
        assert!((MIN_PRECISION..=MAX_PRECISION).contains(&high));
        assert_eq!(precision_from_threshold(0), MIN_PRECISION);
        assert_eq!(precision_from_threshold(u64::MAX), MAX_PRECISION);

        let mut last = 0;
        for count in [0, 1, 10, 100, 1_000, 10_000, 100_000, 1_000_000] {
            let precision = precision_from_threshold(count);
            assert!(precision >= last);
            last = precision;
        }
    }

    #[test]
    fn test_precision_from_threshold_sizing() {
        // 100 entries need ceil(100 / 0.75) * 4 = 536 bytes, 10 bits.
        assert_eq!(precision_from_threshold(100), 10);
    }

    #[test]
    fn test_encode_never_zero() {
        for precision in [MIN_PRECISION, 10, 14, MAX_PRECISION] {
            for hash in [0u64, 1, 0x8000_0000_0000_0000, u64::MAX, 0x1234_5678_9ABC_DEF0] {
                assert_ne!(encode_hash(hash, precision), 0);
            }
        }
    }

    #[test]
    fn test_encode_decode_matches_direct() {
        // Pseudo-random walk over the hash space; decoding an encoded hash
        // must agree with decoding the raw hash at every precision.
        let mut hash = 0x9E37_79B9_7F4A_7C15u64;
        for precision in [MIN_PRECISION, 7, 10, 14, MAX_PRECISION] {
            for _ in 0..1000 {
                hash = hash
                    .wrapping_mul(0x5851_F42D_4C95_7F2D)
                    .wrapping_add(0x1405_7B7E_F767_814F);
                let encoded = encode_hash(hash, precision);
                assert_ne!(encoded, 0);
                assert_eq!(
                    decode_index(encoded, precision),
                    register_index(hash, precision),
                    "index mismatch for hash {hash:#x} at precision {precision}"
                );
                assert_eq!(
                    decode_run_len(encoded, precision),
                    run_len(hash, precision),
                    "run length mismatch for hash {hash:#x} at precision {precision}"
                );
            }
        }
    }

    #[test]
    fn test_encode_decode_sparse_index_zone() {
        // Hashes whose bits between the precision and the encoding precision
        // are all zero exercise the flagged arm.
        for precision in [MIN_PRECISION, 14, MAX_PRECISION] {
            for hash in [0u64, 1, 0xF000_0000_0000_0001, 0xFFFF_FF80_0000_0000] {
                let masked = hash & !(((1u64 << (ENCODING_PRECISION - precision)) - 1)
                    << (64 - ENCODING_PRECISION));
                let encoded = encode_hash(masked, precision);
                assert_eq!(encoded & 1, 1);
                assert_eq!(decode_index(encoded, precision), register_index(masked, precision));
                assert_eq!(decode_run_len(encoded, precision), run_len(masked, precision));
            }
        }
    }

    #[test]
    fn test_run_len_saturates() {
        assert_eq!(run_len(0, 14), 64 - 14 + 1);
        assert_eq!(run_len(u64::MAX, 14), 1);
    }
}
