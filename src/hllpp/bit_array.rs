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

//! Growable bit array holding one algorithm flag per bucket.

use std::sync::Arc;

use crate::error::Error;
use crate::memory::MemoryAccountant;

/// One bit per bucket; an unset bit (including any bit past the end of the
/// allocated words) reads as `false`. Bits are only ever set, never cleared.
pub(crate) struct BitArray {
    accountant: Arc<dyn MemoryAccountant>,
    words: Vec<u64>,
}

impl BitArray {
    pub fn new(accountant: Arc<dyn MemoryAccountant>) -> Self {
        Self {
            accountant,
            words: Vec::new(),
        }
    }

    pub fn get(&self, index: u64) -> bool {
        match self.words.get((index >> 6) as usize) {
            Some(word) => word & (1u64 << (index & 0x3F)) != 0,
            None => false,
        }
    }

    /// Grow so that bit `bits - 1` is addressable. Doubling growth, newly
    /// exposed bits are zero. On a rejected reservation nothing changes.
    pub fn ensure_capacity(&mut self, bits: u64) -> Result<(), Error> {
        let needed_words = bits.div_ceil(64) as usize;
        if needed_words <= self.words.len() {
            return Ok(());
        }
        let mut new_words = self.words.len().max(1);
        while new_words < needed_words {
            new_words *= 2;
        }
        let grow_bytes = ((new_words - self.words.len()) * size_of::<u64>()) as u64;
        self.accountant.reserve(grow_bytes)?;
        self.words.resize(new_words, 0);
        Ok(())
    }

    /// Set bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if the bit has not been made addressable via
    /// [`BitArray::ensure_capacity`].
    pub fn set(&mut self, index: u64) {
        self.words[(index >> 6) as usize] |= 1u64 << (index & 0x3F);
    }

    /// Release every reservation. Safe to call more than once.
    pub fn close(&mut self) {
        let bytes = (self.words.len() * size_of::<u64>()) as u64;
        if bytes > 0 {
            self.accountant.release(bytes);
        }
        self.words = Vec::new();
    }
}

impl Drop for BitArray {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BoundedAccountant;
    use crate::memory::UnboundedAccountant;

    #[test]
    fn test_get_past_end_is_false() {
        let bits = BitArray::new(Arc::new(UnboundedAccountant));
        assert!(!bits.get(0));
        assert!(!bits.get(1 << 40));
    }

    #[test]
    fn test_set_and_get() {
        let mut bits = BitArray::new(Arc::new(UnboundedAccountant));
        bits.ensure_capacity(200).unwrap();
        bits.set(0);
        bits.set(63);
        bits.set(64);
        bits.set(199);
        assert!(bits.get(0));
        assert!(bits.get(63));
        assert!(bits.get(64));
        assert!(bits.get(199));
        assert!(!bits.get(1));
        assert!(!bits.get(198));
    }

    #[test]
    fn test_rejected_growth_leaves_state() {
        let accountant = Arc::new(BoundedAccountant::new(8));
        let mut bits = BitArray::new(accountant.clone());
        bits.ensure_capacity(64).unwrap();
        bits.set(3);
        assert!(bits.ensure_capacity(65).is_err());
        assert!(bits.get(3));
        assert_eq!(accountant.used(), 8);
    }

    #[test]
    fn test_close_releases_and_is_idempotent() {
        let accountant = Arc::new(BoundedAccountant::new(64));
        let mut bits = BitArray::new(accountant.clone());
        bits.ensure_capacity(512).unwrap();
        assert_eq!(accountant.used(), 64);
        bits.close();
        assert_eq!(accountant.used(), 0);
        bits.close();
        assert_eq!(accountant.used(), 0);
    }
}
