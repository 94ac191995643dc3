//! Per-pair async locks
//!
//! Work on one position is serialized by its pair address while unrelated
//! pairs proceed concurrently. A pair's lock is dropped from the table once
//! its last holder releases it and nobody is waiting.

use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct PairLocks {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

/// Exclusive access to one pair, released on drop
pub struct PairGuard<'a> {
    locks: &'a PairLocks,
    pair: Address,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `pair`
    pub async fn lock(&self, pair: Address) -> PairGuard<'_> {
        let lock = self.locks.entry(pair).or_default().clone();
        let guard = lock.lock_owned().await;
        PairGuard {
            locks: self,
            pair,
            guard: Some(guard),
        }
    }

    /// Exclusive access to `pair` if nobody holds it right now
    pub fn try_lock(&self, pair: Address) -> Option<PairGuard<'_>> {
        let lock = self.locks.entry(pair).or_default().clone();
        let guard = lock.try_lock_owned().ok();
        if guard.is_none() {
            return None;
        }
        Some(PairGuard {
            locks: self,
            pair,
            guard,
        })
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the table holds the only reference once nobody holds or awaits the lock
        self.locks
            .locks
            .remove_if(&self.pair, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_pair_is_exclusive() {
        let locks = PairLocks::new();
        let pair = Address::repeat_byte(0x01);

        let guard = locks.lock(pair).await;
        assert!(locks.try_lock(pair).is_none());
        assert!(locks.try_lock(Address::repeat_byte(0x02)).is_some());

        drop(guard);
        assert!(locks.try_lock(pair).is_some());
    }

    #[tokio::test]
    async fn test_released_locks_leave_the_table() {
        let locks = Arc::new(PairLocks::new());
        for byte in 1..=50u8 {
            let _guard = locks.lock(Address::repeat_byte(byte)).await;
        }
        assert!(locks.locks.is_empty());

        // a waiter keeps the entry alive until it is done
        let pair = Address::repeat_byte(0x01);
        let guard = locks.lock(pair).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(pair).await;
            })
        };
        tokio::task::yield_now().await;
        drop(guard);
        assert_eq!(locks.locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.locks.is_empty());
    }
}
