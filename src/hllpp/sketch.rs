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

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::codec::SketchSlice;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::hash::hash64;
use crate::hllpp::Algorithm;
use crate::hllpp::DEFAULT_PRECISION;
use crate::hllpp::MAX_PRECISION;
use crate::hllpp::MIN_PRECISION;
use crate::hllpp::bit_array::BitArray;
use crate::hllpp::encode_hash;
use crate::hllpp::estimator;
use crate::hllpp::linear_counting::LinearCounting;
use crate::hllpp::register_bank::RegisterBank;
use crate::hllpp::serialization;
use crate::memory::MemoryAccountant;
use crate::memory::Reservation;
use crate::memory::UnboundedAccountant;

/// Adaptive cardinality estimator over many independent buckets.
///
/// Each bucket counts distinct 64-bit hashes, starting in a compact linear
/// counting phase and upgrading to HyperLogLog registers once it outgrows its
/// threshold. The instance is single-owner: the caller guarantees that no two
/// operations run concurrently on it.
///
/// # Examples
///
/// ```
/// # use bucketsketch::hllpp::HyperLogLogPlusPlus;
/// let mut sketch = HyperLogLogPlusPlus::builder().precision(14).build().unwrap();
/// sketch.update(0, "apple").unwrap();
/// sketch.update(0, "banana").unwrap();
/// sketch.update(0, "apple").unwrap();
/// assert_eq!(sketch.cardinality(0), 2);
/// ```
pub struct HyperLogLogPlusPlus {
    pub(super) precision: u32,
    pub(super) accountant: Arc<dyn MemoryAccountant>,
    pub(super) flags: BitArray,
    pub(super) hll: RegisterBank,
    pub(super) lc: LinearCounting,
}

impl HyperLogLogPlusPlus {
    /// Create a new builder.
    ///
    /// # Examples
    ///
    /// ```
    /// # use bucketsketch::hllpp::HyperLogLogPlusPlus;
    /// let sketch = HyperLogLogPlusPlus::builder().precision(12).build().unwrap();
    /// assert_eq!(sketch.precision(), 12);
    /// ```
    pub fn builder() -> HyperLogLogPlusPlusBuilder {
        HyperLogLogPlusPlusBuilder::default()
    }

    /// The precision this sketch was built with.
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// The counting phase the bucket is currently in. Buckets never collected
    /// into report [`Algorithm::LinearCounting`].
    pub fn algorithm(&self, bucket: u64) -> Algorithm {
        if self.flags.get(bucket) {
            Algorithm::HyperLogLog
        } else {
            Algorithm::LinearCounting
        }
    }

    /// Hash `value` and collect it into `bucket`.
    pub fn update<T: Hash + ?Sized>(&mut self, bucket: u64, value: &T) -> Result<(), Error> {
        self.collect(bucket, hash64(value))
    }

    /// Collect one 64-bit hash into `bucket`, upgrading the bucket to
    /// HyperLogLog when its linear counting table outgrows the threshold.
    pub fn collect(&mut self, bucket: u64, hash: u64) -> Result<(), Error> {
        if self.flags.get(bucket) {
            self.hll.ensure_capacity(bucket + 1)?;
            self.hll.collect(bucket, hash);
        } else {
            let size = self.lc.add_encoded(bucket, encode_hash(hash, self.precision))?;
            if size > self.lc.threshold() {
                self.upgrade_to_hll(bucket)?;
            }
        }
        Ok(())
    }

    /// Collect an already-encoded value through the same phase dispatch and
    /// upgrade check as [`HyperLogLogPlusPlus::collect`].
    pub(super) fn collect_encoded(&mut self, bucket: u64, encoded: u32) -> Result<(), Error> {
        if self.flags.get(bucket) {
            self.hll.ensure_capacity(bucket + 1)?;
            self.hll.collect_encoded(bucket, encoded);
        } else {
            let size = self.lc.add_encoded(bucket, encoded)?;
            if size > self.lc.threshold() {
                self.upgrade_to_hll(bucket)?;
            }
        }
        Ok(())
    }

    /// Replay the bucket's linear counting values into its register region
    /// and flip the flag. The transition is one-way.
    fn upgrade_to_hll(&mut self, bucket: u64) -> Result<(), Error> {
        // All fallible growth happens before the replay, so a rejected
        // reservation leaves the bucket fully in linear counting. The cell is
        // read-only while it drains; its memory goes back at the very end.
        self.hll.ensure_capacity(bucket + 1)?;
        self.flags.ensure_capacity(bucket + 1)?;
        self.hll.reset(bucket);
        for encoded in self.lc.values(bucket) {
            self.hll.collect_encoded(bucket, encoded);
        }
        self.flags.set(bucket);
        self.lc.close_bucket(bucket);
        Ok(())
    }

    /// Estimated number of distinct hashes collected into `bucket`.
    pub fn cardinality(&self, bucket: u64) -> u64 {
        if self.flags.get(bucket) {
            estimator::hyperloglog_estimate(self.precision, self.hll.run_lens(bucket))
        } else {
            estimator::linear_counting_estimate(self.lc.values(bucket))
        }
    }

    /// Merge `other`'s state for `other_bucket` into `this_bucket`.
    ///
    /// A linear counting source replays through the same path as `collect`,
    /// so `this_bucket` may upgrade mid-replay. A HyperLogLog source first
    /// upgrades `this_bucket` (replaying any local linear counting values),
    /// then takes the element-wise register max.
    pub fn merge(
        &mut self,
        this_bucket: u64,
        other: &Self,
        other_bucket: u64,
    ) -> Result<(), Error> {
        if self.precision != other.precision {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                "cannot merge sketches with different precisions",
            )
            .with_context("this_precision", self.precision)
            .with_context("other_precision", other.precision));
        }
        // Reserve register space up front even when the merge stays in linear
        // counting; a later collect may need it.
        self.hll.ensure_capacity(this_bucket + 1)?;
        if other.flags.get(other_bucket) {
            if !self.flags.get(this_bucket) {
                self.upgrade_to_hll(this_bucket)?;
            }
            for (register, code) in other.hll.run_lens(other_bucket).enumerate() {
                self.hll.add_run_len(this_bucket, register as u32, code);
            }
        } else {
            for encoded in other.lc.values(other_bucket) {
                self.collect_encoded(this_bucket, encoded)?;
            }
        }
        Ok(())
    }

    /// Merge a serialized foreign bucket into `bucket`.
    ///
    /// When both sides are in the linear counting phase at the same
    /// precision, the payload's values are decoded into an accounted scratch
    /// buffer and fed through the collect/upgrade logic; the feed switches to
    /// the register bank the instant the bucket upgrades. Any other
    /// combination deserializes the payload into a temporary estimator and
    /// merges it. A malformed payload detected before the feed leaves the
    /// bucket untouched; mid-feed failures are best effort.
    pub fn combine(&mut self, bucket: u64, payload: &[u8]) -> Result<(), Error> {
        let mut slice = SketchSlice::new(payload);
        let header = serialization::read_header(&mut slice)?;
        if header.algorithm == Algorithm::LinearCounting
            && !self.flags.get(bucket)
            && header.precision == self.precision
        {
            let count = slice
                .read_varint_u64()
                .map_err(|e| serialization::malformed("failed to read value count").set_source(e))?;
            serialization::check_body_length(&slice, count)?;
            let _scratch = Reservation::try_new(&self.accountant, count * 4)?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let encoded = slice.read_u32_le().map_err(|e| {
                    serialization::malformed("failed to read encoded value").set_source(e)
                })?;
                if encoded == 0 {
                    return Err(serialization::malformed("zero encoded value"));
                }
                values.push(encoded);
            }
            for encoded in values {
                self.collect_encoded(bucket, encoded)?;
            }
            Ok(())
        } else {
            let other = Self::deserialize(payload, Arc::clone(&self.accountant))?;
            self.merge(bucket, &other, 0)
        }
    }

    /// Release every memory reservation this sketch holds. Further use of the
    /// sketch is undefined in the sense that buckets read as empty; calling
    /// `close` again releases nothing twice.
    pub fn close(&mut self) {
        self.lc.close();
        self.hll.close();
        self.flags.close();
    }
}

impl fmt::Debug for HyperLogLogPlusPlus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperLogLogPlusPlus")
            .field("precision", &self.precision)
            .field("register_buckets", &self.hll.num_buckets())
            .finish_non_exhaustive()
    }
}

/// Builder for [`HyperLogLogPlusPlus`].
pub struct HyperLogLogPlusPlusBuilder {
    precision: u32,
    accountant: Arc<dyn MemoryAccountant>,
    initial_buckets: u64,
}

impl Default for HyperLogLogPlusPlusBuilder {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            accountant: Arc::new(UnboundedAccountant),
            initial_buckets: 0,
        }
    }
}

impl HyperLogLogPlusPlusBuilder {
    /// Set the precision.
    ///
    /// # Panics
    ///
    /// If `precision` is not in `[MIN_PRECISION, MAX_PRECISION]`.
    pub fn precision(mut self, precision: u32) -> Self {
        assert!(
            (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
            "precision must be in [{MIN_PRECISION}, {MAX_PRECISION}], got {precision}"
        );
        self.precision = precision;
        self
    }

    /// Set the memory accountant charged for all growable storage. Defaults
    /// to an unbounded accountant.
    pub fn accountant(mut self, accountant: Arc<dyn MemoryAccountant>) -> Self {
        self.accountant = accountant;
        self
    }

    /// Pre-size the register bank for an expected number of buckets.
    pub fn initial_buckets(mut self, buckets: u64) -> Self {
        self.initial_buckets = buckets;
        self
    }

    /// Build the sketch, reserving any pre-sized storage.
    pub fn build(self) -> Result<HyperLogLogPlusPlus, Error> {
        let hll = RegisterBank::new(
            self.precision,
            Arc::clone(&self.accountant),
            self.initial_buckets,
        )?;
        Ok(HyperLogLogPlusPlus {
            precision: self.precision,
            flags: BitArray::new(Arc::clone(&self.accountant)),
            hll,
            lc: LinearCounting::new(self.precision, Arc::clone(&self.accountant)),
            accountant: self.accountant,
        })
    }
}
