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

//! Probabilistic distinct counting for aggregation engines.
//!
//! The crate centers on [`hllpp::HyperLogLogPlusPlus`], an adaptive sketch
//! that answers "how many distinct values were seen" for many independent
//! buckets at once, in bounded memory charged to a pluggable
//! [`memory::MemoryAccountant`]. Buckets start cheap (linear counting) and
//! upgrade to HyperLogLog registers as they grow; sketches merge in-process
//! and combine from compact wire payloads produced by other instances.
//!
//! ```
//! use bucketsketch::hllpp::HyperLogLogPlusPlus;
//!
//! let mut sketch = HyperLogLogPlusPlus::builder().precision(14).build().unwrap();
//! for group in 0..4u64 {
//!     for value in 0..100u64 {
//!         sketch.update(group, &(group, value)).unwrap();
//!     }
//! }
//! assert_eq!(sketch.cardinality(2), 100);
//! ```

pub mod error;
pub mod hllpp;
pub mod memory;

mod codec;
mod hash;
