use abi::{Error, SlotKey};
use tracing::debug;

use crate::{SlotGuard, SlotTransaction};

/// Occupancy of one slot, read inside that slot's critical section.
///
/// Construction needs the held [`SlotGuard`] and the open transaction, so
/// there is no way to take this reading outside the lock.
pub(crate) struct CapacityOracle<'a> {
    slot: &'a SlotKey,
    txn: &'a mut dyn SlotTransaction,
}

impl<'a> CapacityOracle<'a> {
    pub(crate) fn within(guard: &'a SlotGuard, txn: &'a mut dyn SlotTransaction) -> Self {
        Self {
            slot: guard.slot(),
            txn,
        }
    }

    pub(crate) async fn occupancy(&mut self) -> Result<u32, Error> {
        let occupancy = self.txn.occupancy().await?;
        debug!(slot = %self.slot, occupancy, "occupancy read");
        Ok(occupancy)
    }
}
