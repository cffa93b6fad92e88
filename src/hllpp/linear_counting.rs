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

//! Linear counting phase: one small open-addressed hash table per bucket.
//!
//! A bucket stays in this phase while its distinct-value count is small.
//! Tables store the 32-bit encoded form of each hash, use linear probing with
//! `0` as the empty-slot sentinel, and double in capacity at 75% load. All
//! table allocations go through the memory accountant.

use std::sync::Arc;

use crate::error::Error;
use crate::hllpp::MAX_LOAD_FACTOR;
use crate::memory::MemoryAccountant;

/// Largest initial table capacity; tables for high precisions start here and
/// double on demand instead of allocating their worst case up front.
const MAX_INITIAL_CAPACITY: u32 = 32;

/// One bucket's table of distinct encoded hash values.
struct Cell {
    table: Vec<u32>,
    size: u32,
}

impl Cell {
    fn with_capacity(capacity: u32) -> Self {
        Self {
            table: vec![0u32; capacity as usize],
            size: 0,
        }
    }

    fn capacity(&self) -> u32 {
        self.table.len() as u32
    }

    fn table_bytes(&self) -> u64 {
        (self.table.len() * size_of::<u32>()) as u64
    }

    /// Probe linearly from `encoded & mask`; duplicates do not change the
    /// size. The caller guarantees a free slot exists.
    fn insert(&mut self, encoded: u32) -> u32 {
        let mask = self.capacity() - 1;
        let mut slot = (encoded & mask) as usize;
        loop {
            let value = self.table[slot];
            if value == 0 {
                self.table[slot] = encoded;
                self.size += 1;
                return self.size;
            }
            if value == encoded {
                return self.size;
            }
            slot = (slot + 1) & mask as usize;
        }
    }

    pub fn values(&self) -> HashesIterator<'_> {
        HashesIterator {
            iter: self.table.iter(),
            size: self.size,
        }
    }
}

/// Linear counting state for every bucket still in the phase; buckets that
/// never collected, or that upgraded, hold no cell.
pub(crate) struct LinearCounting {
    precision: u32,
    threshold: u32,
    accountant: Arc<dyn MemoryAccountant>,
    cells: Vec<Option<Cell>>,
}

impl LinearCounting {
    pub fn new(precision: u32, accountant: Arc<dyn MemoryAccountant>) -> Self {
        let capacity_cap = (1u32 << precision) / 4;
        Self {
            precision,
            threshold: (f64::from(capacity_cap) * MAX_LOAD_FACTOR) as u32,
            accountant,
            cells: Vec::new(),
        }
    }

    /// Size above which a bucket must leave the linear counting phase.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Add one encoded value to the bucket's cell, creating or growing the
    /// cell first when needed, and return the cell's size after insertion.
    ///
    /// # Panics
    ///
    /// Panics if `encoded` is `0`, which is reserved as the empty-slot
    /// sentinel.
    pub fn add_encoded(&mut self, bucket: u64, encoded: u32) -> Result<u32, Error> {
        assert!(encoded != 0, "0 is reserved for empty slots");
        self.ensure_cells(bucket + 1)?;
        let slot = bucket as usize;
        match &self.cells[slot] {
            None => {
                let capacity = ((1u32 << self.precision) / 4).min(MAX_INITIAL_CAPACITY);
                self.accountant
                    .reserve((capacity as usize * size_of::<u32>()) as u64)?;
                self.cells[slot] = Some(Cell::with_capacity(capacity));
            }
            Some(cell) => {
                // Grow before inserting the triggering value so that a free
                // slot always exists.
                if cell.size > cell.capacity() / 4 * 3 {
                    self.grow(slot)?;
                }
            }
        }
        match &mut self.cells[slot] {
            Some(cell) => Ok(cell.insert(encoded)),
            None => unreachable!("cell exists after creation"),
        }
    }

    /// Rehash the cell at `slot` into a table of twice the capacity.
    fn grow(&mut self, slot: usize) -> Result<(), Error> {
        let old_capacity = match &self.cells[slot] {
            Some(cell) => cell.capacity(),
            None => unreachable!("grow on absent cell"),
        };
        let new_capacity = old_capacity * 2;
        self.accountant
            .reserve((new_capacity as usize * size_of::<u32>()) as u64)?;
        // Reservation held; from here no step can fail.
        let mut new_cell = Cell::with_capacity(new_capacity);
        if let Some(old_cell) = self.cells[slot].take() {
            for encoded in old_cell.values() {
                new_cell.insert(encoded);
            }
            self.accountant.release(old_cell.table_bytes());
        }
        self.cells[slot] = Some(new_cell);
        Ok(())
    }

    /// Iterate the bucket's distinct encoded values. Single pass, not
    /// restartable; empty when the bucket has no cell.
    pub fn values(&self, bucket: u64) -> HashesIterator<'_> {
        match self.cell(bucket) {
            Some(cell) => cell.values(),
            None => HashesIterator::empty(),
        }
    }

    /// Release the bucket's cell, if any; a no-op otherwise.
    pub fn close_bucket(&mut self, bucket: u64) {
        let taken = self
            .cells
            .get_mut(bucket as usize)
            .and_then(|slot| slot.take());
        if let Some(cell) = taken {
            self.accountant.release(cell.table_bytes());
        }
    }

    /// Release every cell and the cell directory. Safe to call more than
    /// once.
    pub fn close(&mut self) {
        for slot in self.cells.iter_mut() {
            if let Some(cell) = slot.take() {
                self.accountant.release(cell.table_bytes());
            }
        }
        let directory_bytes = (self.cells.len() * size_of::<Option<Cell>>()) as u64;
        if directory_bytes > 0 {
            self.accountant.release(directory_bytes);
        }
        self.cells = Vec::new();
    }

    fn cell(&self, bucket: u64) -> Option<&Cell> {
        self.cells.get(bucket as usize).and_then(Option::as_ref)
    }

    /// Grow the cell directory so `buckets` slots exist. Doubling growth,
    /// accounted; nothing changes on a rejected reservation.
    fn ensure_cells(&mut self, buckets: u64) -> Result<(), Error> {
        let needed = buckets as usize;
        if needed <= self.cells.len() {
            return Ok(());
        }
        let mut new_len = self.cells.len().max(1);
        while new_len < needed {
            new_len *= 2;
        }
        let grow_bytes = ((new_len - self.cells.len()) * size_of::<Option<Cell>>()) as u64;
        self.accountant.reserve(grow_bytes)?;
        self.cells.resize_with(new_len, || None);
        Ok(())
    }
}

impl Drop for LinearCounting {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lazy sequence of one bucket's distinct encoded values.
///
/// The total count is known up front via [`HashesIterator::size`]; iteration
/// itself is a single pass over the cell's table.
pub struct HashesIterator<'a> {
    iter: std::slice::Iter<'a, u32>,
    size: u32,
}

impl HashesIterator<'_> {
    /// Number of values the full pass will produce.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub(crate) fn empty() -> HashesIterator<'static> {
        HashesIterator {
            iter: [].iter(),
            size: 0,
        }
    }
}

impl Iterator for HashesIterator<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.iter.by_ref().copied().find(|value| *value != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BoundedAccountant;
    use crate::memory::UnboundedAccountant;

    fn unbounded() -> Arc<dyn MemoryAccountant> {
        Arc::new(UnboundedAccountant)
    }

    #[test]
    fn test_add_deduplicates() {
        let mut lc = LinearCounting::new(14, unbounded());
        assert_eq!(lc.add_encoded(0, 42).unwrap(), 1);
        assert_eq!(lc.add_encoded(0, 42).unwrap(), 1);
        assert_eq!(lc.add_encoded(0, 43).unwrap(), 2);
        assert_eq!(lc.values(0).size(), 2);
    }

    #[test]
    fn test_values_iterates_distinct() {
        let mut lc = LinearCounting::new(14, unbounded());
        for encoded in 1..=100u32 {
            lc.add_encoded(7, encoded).unwrap();
        }
        let values = lc.values(7);
        assert_eq!(values.size(), 100);
        let mut seen: Vec<u32> = values.collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=100u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_absent_bucket_is_empty() {
        let lc = LinearCounting::new(14, unbounded());
        assert_eq!(lc.values(3).size(), 0);
        assert_eq!(lc.values(3).count(), 0);
    }

    #[test]
    fn test_growth_keeps_all_values() {
        let mut lc = LinearCounting::new(14, unbounded());
        // Collisions on the low bits force probing across growth.
        for i in 0..500u32 {
            lc.add_encoded(0, i * 64 + 1).unwrap();
        }
        assert_eq!(lc.values(0).size(), 500);
        assert_eq!(lc.values(0).count(), 500);
    }

    #[test]
    fn test_threshold_value() {
        let lc = LinearCounting::new(14, unbounded());
        assert_eq!(lc.threshold(), 3072);
    }

    #[test]
    fn test_rejected_first_cell_leaves_no_state() {
        // Enough for the cell directory, not for the first table.
        let accountant = Arc::new(BoundedAccountant::new(100));
        let mut lc = LinearCounting::new(14, accountant.clone());
        let err = lc.add_encoded(0, 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MemoryLimitExceeded);
        assert_eq!(lc.values(0).size(), 0);
        lc.close();
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    fn test_close_bucket_releases_one_cell() {
        let accountant = Arc::new(BoundedAccountant::new(1 << 16));
        let mut lc = LinearCounting::new(14, accountant.clone());
        lc.add_encoded(0, 11).unwrap();
        lc.add_encoded(1, 12).unwrap();
        let with_two_cells = accountant.used();
        lc.close_bucket(0);
        assert!(accountant.used() < with_two_cells);
        assert_eq!(lc.values(0).size(), 0);
        assert_eq!(lc.values(1).size(), 1);
        // Closing an empty bucket is a no-op.
        let after = accountant.used();
        lc.close_bucket(0);
        lc.close_bucket(500);
        assert_eq!(accountant.used(), after);
    }

    #[test]
    fn test_close_releases_everything() {
        let accountant = Arc::new(BoundedAccountant::new(1 << 20));
        let mut lc = LinearCounting::new(14, accountant.clone());
        for bucket in 0..10u64 {
            for encoded in 1..=200u32 {
                lc.add_encoded(bucket, encoded).unwrap();
            }
        }
        assert!(accountant.used() > 0);
        lc.close();
        assert_eq!(accountant.used(), 0);
        lc.close();
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    #[should_panic(expected = "0 is reserved")]
    fn test_zero_is_rejected() {
        let mut lc = LinearCounting::new(14, unbounded());
        let _ = lc.add_encoded(0, 0);
    }
}
