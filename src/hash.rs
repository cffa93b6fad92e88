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

//! Value hashing for the convenience update path.
//!
//! The sketch core consumes 64-bit hashes; callers that start from raw values
//! go through MurmurHash3 x64_128 here. The seed is fixed so that every
//! instance of the crate hashes a value identically.

use std::hash::Hash;
use std::hash::Hasher;

const DEFAULT_SEED: u32 = 9001;

/// Hash an arbitrary value down to the 64 bits the sketch core consumes.
pub(crate) fn hash64<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = mur3::Hasher128::with_seed(DEFAULT_SEED);
    value.hash(&mut hasher);
    let (lo, _hi) = hasher.finish128();
    lo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_across_calls() {
        assert_eq!(hash64("apple"), hash64("apple"));
        assert_ne!(hash64("apple"), hash64("banana"));
    }

    #[test]
    fn test_integers_spread() {
        // Sequential keys must not produce sequential hashes.
        let a = hash64(&1u64);
        let b = hash64(&2u64);
        assert_ne!(a.wrapping_add(1), b);
    }
}
