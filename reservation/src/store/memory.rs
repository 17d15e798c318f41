use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use abi::{Error, ReservationId, ReservationRecord, ReservationStatus, ResourceConfig, SlotKey};
use async_trait::async_trait;

use super::{ReservationStore, ResourceCatalog, SlotTransaction};
use crate::SlotGuard;

#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<ReservationId, ReservationRecord>,
    by_slot: HashMap<SlotKey, Vec<ReservationId>>,
}

impl Records {
    fn confirmed_in(&self, slot: &SlotKey) -> impl Iterator<Item = &ReservationRecord> {
        self.by_slot
            .get(slot)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .filter(|r| r.is_confirmed())
    }
}

/// Single-writer, process-local store.
///
/// Every write goes through one mutex and the admission path holds the slot
/// lock across read and write, so occupancy checks are linearizable per slot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<Records>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record ever committed, in no particular order.
    pub fn records(&self) -> Vec<ReservationRecord> {
        lock(&self.records).by_id.values().cloned().collect()
    }
}

fn lock(records: &Mutex<Records>) -> MutexGuard<'_, Records> {
    records
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MemorySlotTransaction {
    records: Arc<Mutex<Records>>,
    slot: SlotKey,
    pending: Option<ReservationRecord>,
}

#[async_trait]
impl SlotTransaction for MemorySlotTransaction {
    async fn occupancy(&mut self) -> Result<u32, Error> {
        let count = lock(&self.records).confirmed_in(&self.slot).count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn insert(&mut self, record: ReservationRecord) -> Result<ReservationRecord, Error> {
        if record.slot_key() != self.slot {
            return Err(Error::StorageUnavailable(format!(
                "record for {} written inside the scope of {}",
                record.slot_key(),
                self.slot
            )));
        }
        let duplicate = self
            .pending
            .iter()
            .chain(lock(&self.records).confirmed_in(&self.slot))
            .any(|r| r.user_id == record.user_id);
        if duplicate {
            return Err(Error::DuplicateReservation {
                user_id: record.user_id,
                slot: self.slot.clone(),
            });
        }
        self.pending = Some(record.clone());
        Ok(record)
    }

    async fn commit(&mut self) -> Result<(), Error> {
        if let Some(record) = self.pending.take() {
            let mut records = lock(&self.records);
            records
                .by_slot
                .entry(self.slot.clone())
                .or_default()
                .push(record.id);
            records.by_id.insert(record.id, record);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Error> {
        self.pending = None;
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn begin(
        &self,
        guard: &SlotGuard,
        _timeout: Duration,
    ) -> Result<Box<dyn SlotTransaction>, Error> {
        Ok(Box::new(MemorySlotTransaction {
            records: self.records.clone(),
            slot: guard.slot().clone(),
            pending: None,
        }))
    }

    async fn get(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
        lock(&self.records)
            .by_id
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn cancel(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
        let mut records = lock(&self.records);
        match records.by_id.get_mut(&id) {
            Some(record) if record.is_confirmed() => {
                record.status = ReservationStatus::Cancelled;
                Ok(record.clone())
            }
            _ => Err(Error::NotFound),
        }
    }
}

/// Capacities fixed at startup, usually from the `resources` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    capacities: HashMap<String, u32>,
}

impl StaticCatalog {
    pub fn new(resources: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            capacities: resources.into_iter().collect(),
        }
    }

    pub fn from_config(resources: &[ResourceConfig]) -> Self {
        Self::new(resources.iter().map(|r| (r.id.clone(), r.capacity)))
    }
}

#[async_trait]
impl ResourceCatalog for StaticCatalog {
    async fn capacity(&self, resource_id: &str) -> Result<Option<u32>, Error> {
        Ok(self.capacities.get(resource_id).copied())
    }
}
