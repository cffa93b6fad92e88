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

//! HyperLogLog phase: a flat byte array of run-length registers.
//!
//! Every bucket owns a contiguous region of `m = 2^precision` registers.
//! Registers hold the maximum run-length code ever observed and only move
//! upward, except for [`RegisterBank::reset`] which zeroes one bucket's region
//! right before a replay.

use std::sync::Arc;

use crate::error::Error;
use crate::hllpp::decode_index;
use crate::hllpp::decode_run_len;
use crate::hllpp::register_index;
use crate::hllpp::run_len;
use crate::memory::MemoryAccountant;

pub(crate) struct RegisterBank {
    precision: u32,
    accountant: Arc<dyn MemoryAccountant>,
    run_lens: Vec<u8>,
}

impl RegisterBank {
    pub fn new(
        precision: u32,
        accountant: Arc<dyn MemoryAccountant>,
        initial_buckets: u64,
    ) -> Result<Self, Error> {
        let bytes = initial_buckets << precision;
        accountant.reserve(bytes)?;
        Ok(Self {
            precision,
            accountant,
            run_lens: vec![0u8; bytes as usize],
        })
    }

    /// Buckets the backing array currently addresses.
    pub fn num_buckets(&self) -> u64 {
        (self.run_lens.len() as u64) >> self.precision
    }

    /// Grow so that `num_buckets` buckets are addressable. Doubling growth,
    /// never shrinks; existing registers are preserved and new ones are zero.
    /// On a rejected reservation nothing changes.
    pub fn ensure_capacity(&mut self, num_buckets: u64) -> Result<(), Error> {
        if num_buckets <= self.num_buckets() {
            return Ok(());
        }
        let mut new_buckets = self.num_buckets().max(1);
        while new_buckets < num_buckets {
            new_buckets *= 2;
        }
        let new_bytes = new_buckets << self.precision;
        let grow_bytes = new_bytes - self.run_lens.len() as u64;
        self.accountant.reserve(grow_bytes)?;
        self.run_lens.resize(new_bytes as usize, 0);
        Ok(())
    }

    /// Decode a raw 64-bit hash and keep the register max.
    pub fn collect(&mut self, bucket: u64, hash: u64) {
        self.add_run_len(
            bucket,
            register_index(hash, self.precision),
            run_len(hash, self.precision),
        );
    }

    /// Same as [`RegisterBank::collect`] but from a linear-counting encoded
    /// value, used when replaying a cell or a wire payload.
    pub fn collect_encoded(&mut self, bucket: u64, encoded: u32) {
        self.add_run_len(
            bucket,
            decode_index(encoded, self.precision),
            decode_run_len(encoded, self.precision),
        );
    }

    pub fn add_run_len(&mut self, bucket: u64, register: u32, code: u8) {
        let index = ((bucket << self.precision) + u64::from(register)) as usize;
        if code > self.run_lens[index] {
            self.run_lens[index] = code;
        }
    }

    /// Zero-fill exactly the bucket's register region. Only used immediately
    /// before a full replay.
    pub fn reset(&mut self, bucket: u64) {
        let start = (bucket << self.precision) as usize;
        let end = start + (1usize << self.precision);
        self.run_lens[start..end].fill(0);
    }

    /// Iterate the bucket's `m` registers in register-index order. Single
    /// pass.
    pub fn run_lens(&self, bucket: u64) -> RunLenIterator<'_> {
        let start = (bucket << self.precision) as usize;
        let end = start + (1usize << self.precision);
        RunLenIterator {
            iter: self.run_lens[start..end].iter(),
        }
    }

    /// Release the backing array. Safe to call more than once.
    pub fn close(&mut self) {
        let bytes = self.run_lens.len() as u64;
        if bytes > 0 {
            self.accountant.release(bytes);
        }
        self.run_lens = Vec::new();
    }
}

impl Drop for RegisterBank {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lazy sequence of one bucket's register run lengths, exactly `m` items.
pub struct RunLenIterator<'a> {
    iter: std::slice::Iter<'a, u8>,
}

impl Iterator for RunLenIterator<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.iter.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl ExactSizeIterator for RunLenIterator<'_> {}
