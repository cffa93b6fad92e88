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

//! Binary wire format for exchanging one bucket between instances.
//!
//! # Payload layout
//!
//! | Field | Encoding |
//! |---|---|
//! | precision | LEB128 varint |
//! | algorithm | 1 byte: 0 = linear counting, 1 = HyperLogLog |
//! | linear counting body | LEB128 varint count, then count nonzero `u32` encoded values, little endian |
//! | HyperLogLog body | exactly `2^precision` register bytes in register order |
//!
//! Trailing bytes, truncation, zero encoded values, an unknown algorithm
//! byte, or an out-of-range precision are all malformed.

use std::sync::Arc;

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::hllpp::Algorithm;
use crate::hllpp::HyperLogLogPlusPlus;
use crate::hllpp::MAX_PRECISION;
use crate::hllpp::MIN_PRECISION;
use crate::memory::MemoryAccountant;

pub(super) const ALGORITHM_LINEAR_COUNTING: u8 = 0;
pub(super) const ALGORITHM_HYPERLOGLOG: u8 = 1;

/// Decoded precision and algorithm leading every payload.
pub(super) struct WireHeader {
    pub precision: u32,
    pub algorithm: Algorithm,
}

/// Read and validate the payload header, leaving `slice` positioned at the
/// algorithm-specific body.
pub(super) fn read_header(slice: &mut SketchSlice<'_>) -> Result<WireHeader, Error> {
    let precision = slice
        .read_varint_u64()
        .map_err(|e| malformed("failed to read precision").set_source(e))?;
    if !(u64::from(MIN_PRECISION)..=u64::from(MAX_PRECISION)).contains(&precision) {
        return Err(malformed("precision out of range").with_context("precision", precision));
    }
    let algorithm = match slice
        .read_u8()
        .map_err(|e| malformed("failed to read algorithm").set_source(e))?
    {
        ALGORITHM_LINEAR_COUNTING => Algorithm::LinearCounting,
        ALGORITHM_HYPERLOGLOG => Algorithm::HyperLogLog,
        other => {
            return Err(malformed("unknown algorithm byte").with_context("algorithm", other));
        }
    };
    Ok(WireHeader {
        precision: precision as u32,
        algorithm,
    })
}

/// Validate a linear counting body length against the bytes actually present.
pub(super) fn check_body_length(slice: &SketchSlice<'_>, count: u64) -> Result<(), Error> {
    let expected = count
        .checked_mul(size_of::<u32>() as u64)
        .ok_or_else(|| malformed("value count overflows").with_context("count", count))?;
    if slice.remaining() as u64 != expected {
        return Err(malformed("payload length does not match value count")
            .with_context("count", count)
            .with_context("remaining_bytes", slice.remaining()));
    }
    Ok(())
}

pub(super) fn malformed(message: &str) -> Error {
    Error::new(ErrorKind::MalformedDeserializeData, message)
}

impl HyperLogLogPlusPlus {
    /// Serialize one bucket's state into the wire format `combine` consumes.
    pub fn serialize(&self, bucket: u64) -> Vec<u8> {
        let mut bytes = SketchBytes::with_capacity(16);
        bytes.write_varint_u64(u64::from(self.precision));
        if self.flags.get(bucket) {
            bytes.write_u8(ALGORITHM_HYPERLOGLOG);
            for code in self.hll.run_lens(bucket) {
                bytes.write_u8(code);
            }
        } else {
            bytes.write_u8(ALGORITHM_LINEAR_COUNTING);
            let values = self.lc.values(bucket);
            bytes.write_varint_u64(u64::from(values.size()));
            for encoded in values {
                bytes.write_u32_le(encoded);
            }
        }
        bytes.into_bytes()
    }

    /// Deserialize a payload into a fresh single-bucket sketch (the foreign
    /// state lands in bucket 0), charging its storage to `accountant`.
    pub fn deserialize(
        payload: &[u8],
        accountant: Arc<dyn MemoryAccountant>,
    ) -> Result<Self, Error> {
        let mut slice = SketchSlice::new(payload);
        let header = read_header(&mut slice)?;
        let mut sketch = Self::builder()
            .precision(header.precision)
            .accountant(accountant)
            .build()?;
        match header.algorithm {
            Algorithm::LinearCounting => {
                let count = slice
                    .read_varint_u64()
                    .map_err(|e| malformed("failed to read value count").set_source(e))?;
                check_body_length(&slice, count)?;
                for _ in 0..count {
                    let encoded = slice
                        .read_u32_le()
                        .map_err(|e| malformed("failed to read encoded value").set_source(e))?;
                    if encoded == 0 {
                        return Err(malformed("zero encoded value"));
                    }
                    sketch.collect_encoded(0, encoded)?;
                }
            }
            Algorithm::HyperLogLog => {
                let m = 1usize << header.precision;
                if slice.remaining() != m {
                    return Err(malformed("register payload length mismatch")
                        .with_context("expected_bytes", m)
                        .with_context("remaining_bytes", slice.remaining()));
                }
                sketch.hll.ensure_capacity(1)?;
                sketch.flags.ensure_capacity(1)?;
                let mut registers = vec![0u8; m];
                slice
                    .read_exact(&mut registers)
                    .map_err(|e| malformed("failed to read registers").set_source(e))?;
                for (register, code) in registers.iter().enumerate() {
                    sketch.hll.add_run_len(0, register as u32, *code);
                }
                sketch.flags.set(0);
            }
        }
        Ok(sketch)
    }
}
