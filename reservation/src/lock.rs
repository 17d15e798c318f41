use std::sync::Arc;
use std::time::Duration;

use abi::{Error, SlotKey};
use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockTable = Arc<DashMap<SlotKey, Arc<AsyncMutex<()>>>>;

/// One async mutex per slot, created on demand.
///
/// The table is sharded, so acquiring or releasing one slot never waits on the
/// bookkeeping of an unrelated one. An entry is dropped once nobody holds or
/// waits on it.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlotLocks {
    table: LockTable,
}

/// Proof that the caller is inside the critical section of one slot.
///
/// Only this crate can create one, which is what keeps occupancy reads from
/// happening outside the lock.
#[derive(Debug)]
pub struct SlotGuard {
    slot: SlotKey,
    table: LockTable,
    lock: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl SlotGuard {
    pub fn slot(&self) -> &SlotKey {
        &self.slot
    }
}

impl SlotLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for the slot's lock for at most `timeout`.
    ///
    /// On timeout nothing stays acquired and `Error::Timeout` is returned.
    pub(crate) async fn acquire(&self, slot: &SlotKey, timeout: Duration) -> Result<SlotGuard, Error> {
        let lock = self.table.entry(slot.clone()).or_default().clone();

        match tokio::time::timeout(timeout, lock.clone().lock_owned()).await {
            Ok(held) => Ok(SlotGuard {
                slot: slot.clone(),
                table: self.table.clone(),
                lock,
                held: Some(held),
            }),
            Err(_) => {
                debug!(slot = %slot, ?timeout, "gave up waiting for slot lock");
                forget_if_idle(&self.table, slot, &lock);
                Err(Error::Timeout(slot.clone()))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        drop(self.held.take());
        forget_if_idle(&self.table, &self.slot, &self.lock);
    }
}

// `handle` is the caller's own clone; with the table's copy that makes two.
// Any other reference is a holder or a waiter. New waiters clone under the
// same shard lock that `remove_if` holds, so the count cannot change mid-check.
fn forget_if_idle(table: &LockTable, slot: &SlotKey, handle: &Arc<AsyncMutex<()>>) {
    table.remove_if(slot, |_, current| {
        Arc::ptr_eq(current, handle) && Arc::strong_count(handle) <= 2
    });
}
