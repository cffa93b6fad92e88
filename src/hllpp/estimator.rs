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

//! Cardinality estimation over the iterators the sketch core exposes.
//!
//! The linear counting estimate follows the occupancy formula over the 2^25
//! encoding space. The HyperLogLog estimate is the standard harmonic-mean
//! formula with the published alpha constants and the small-range correction
//! that falls back to linear counting over empty registers; with 64-bit
//! hashes no large-range correction applies.

use crate::hllpp::ENCODING_PRECISION;
use crate::hllpp::HashesIterator;
use crate::hllpp::RunLenIterator;

/// Estimate for a bucket still in the linear counting phase.
pub(crate) fn linear_counting_estimate(values: HashesIterator<'_>) -> u64 {
    let size = values.size();
    if size == 0 {
        return 0;
    }
    let m = (1u64 << ENCODING_PRECISION) as f64;
    let empty = m - f64::from(size);
    (m * (m / empty).ln()).round() as u64
}

/// Estimate for a bucket in the HyperLogLog phase.
pub(crate) fn hyperloglog_estimate(precision: u32, run_lens: RunLenIterator<'_>) -> u64 {
    let m = (1u64 << precision) as f64;
    let mut harmonic_sum = 0.0;
    let mut zero_registers = 0u64;
    for code in run_lens {
        harmonic_sum += inv_pow2(code);
        if code == 0 {
            zero_registers += 1;
        }
    }
    let raw = alpha(precision) * m * m / harmonic_sum;
    let estimate = if raw <= 2.5 * m && zero_registers > 0 {
        // Small-range correction: linear counting over empty registers.
        m * (m / zero_registers as f64).ln()
    } else {
        raw
    };
    estimate.round() as u64
}

/// Bias correction constant from the original HyperLogLog analysis.
fn alpha(precision: u32) -> f64 {
    match precision {
        4 => 0.673,
        5 => 0.697,
        6 => 0.709,
        _ => {
            let m = (1u64 << precision) as f64;
            0.7213 / (1.0 + 1.079 / m)
        }
    }
}

/// Compute 1 / 2^code.
#[inline]
fn inv_pow2(code: u8) -> f64 {
    if code <= 63 {
        1.0 / (1u64 << code) as f64
    } else {
        f64::exp2(-f64::from(code))
    }
}
