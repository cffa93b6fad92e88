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

//! Memory accounting for growable sketch storage.
//!
//! Every allocation a sketch makes is preceded by a [`MemoryAccountant::reserve`]
//! call and paired with a [`MemoryAccountant::release`] when the storage is
//! replaced or freed. The accountant may reject a reservation, in which case
//! the caller must leave its structures exactly as they were before the
//! attempt. One accountant handle is typically shared by all sketches of a
//! single query so that their combined footprint stays under one budget.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::error::Error;
use crate::error::ErrorKind;

/// Tracks and limits the bytes held by sketch storage.
pub trait MemoryAccountant: Send + Sync {
    /// Reserve `bytes` ahead of an allocation.
    ///
    /// Returns [`ErrorKind::MemoryLimitExceeded`] when the reservation would
    /// push usage over the accountant's budget. On error nothing is recorded.
    fn reserve(&self, bytes: u64) -> Result<(), Error>;

    /// Give back a previous reservation of `bytes`.
    fn release(&self, bytes: u64);
}

/// Accountant that never rejects a reservation.
#[derive(Debug, Default)]
pub struct UnboundedAccountant;

impl MemoryAccountant for UnboundedAccountant {
    fn reserve(&self, _bytes: u64) -> Result<(), Error> {
        Ok(())
    }

    fn release(&self, _bytes: u64) {}
}

/// Accountant enforcing a fixed byte budget shared by every holder of the
/// handle.
#[derive(Debug)]
pub struct BoundedAccountant {
    limit: u64,
    used: AtomicU64,
}

impl BoundedAccountant {
    /// Create an accountant with a budget of `limit` bytes.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// The configured budget in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl MemoryAccountant for BoundedAccountant {
    fn reserve(&self, bytes: u64) -> Result<(), Error> {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let new_used = used.saturating_add(bytes);
            if new_used > self.limit {
                return Err(Error::new(
                    ErrorKind::MemoryLimitExceeded,
                    "memory budget exhausted",
                )
                .with_context("requested_bytes", bytes)
                .with_context("used_bytes", used)
                .with_context("limit_bytes", self.limit));
            }
            match self
                .used
                .compare_exchange_weak(used, new_used, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(current) => used = current,
            }
        }
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

/// A scoped reservation, released when dropped.
///
/// Used for scratch buffers whose lifetime is a single operation, so the
/// release runs on every exit path.
pub struct Reservation {
    accountant: Arc<dyn MemoryAccountant>,
    bytes: u64,
}

impl Reservation {
    /// Reserve `bytes`, returning a guard that releases them on drop.
    pub fn try_new(accountant: &Arc<dyn MemoryAccountant>, bytes: u64) -> Result<Self, Error> {
        accountant.reserve(bytes)?;
        Ok(Self {
            accountant: Arc::clone(accountant),
            bytes,
        })
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.accountant.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_rejects_over_budget() {
        let accountant = BoundedAccountant::new(100);
        accountant.reserve(60).unwrap();
        let err = accountant.reserve(41).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryLimitExceeded);
        // A failed reservation records nothing.
        assert_eq!(accountant.used(), 60);
        accountant.reserve(40).unwrap();
        assert_eq!(accountant.used(), 100);
    }

    #[test]
    fn test_release_restores_budget() {
        let accountant = BoundedAccountant::new(64);
        accountant.reserve(64).unwrap();
        accountant.release(64);
        assert_eq!(accountant.used(), 0);
        accountant.reserve(64).unwrap();
    }

    #[test]
    fn test_reservation_guard_releases_on_drop() {
        let accountant: Arc<dyn MemoryAccountant> = Arc::new(BoundedAccountant::new(32));
        {
            let _guard = Reservation::try_new(&accountant, 32).unwrap();
            assert!(accountant.reserve(1).is_err());
        }
        accountant.reserve(32).unwrap();
    }

    #[test]
    fn test_over_release_saturates() {
        let accountant = BoundedAccountant::new(10);
        accountant.reserve(5).unwrap();
        accountant.release(50);
        assert_eq!(accountant.used(), 0);
    }
}
