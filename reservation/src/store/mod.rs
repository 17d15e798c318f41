mod memory;
mod postgres;

use std::time::Duration;

use abi::{Error, ReservationId, ReservationRecord};
use async_trait::async_trait;

use crate::SlotGuard;

pub use memory::{InMemoryStore, StaticCatalog};
pub use postgres::PgStore;

/// Durable home of reservation records.
///
/// Writes for a slot only happen through a [`SlotTransaction`], which can only
/// be opened while holding that slot's [`SlotGuard`].
#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    /// Open a write scope for the slot held by `guard`.
    ///
    /// `timeout` bounds any waiting the backend does before the scope is open,
    /// such as checking out a connection or taking a storage-side lock.
    /// Running out of it is `Error::Timeout`.
    async fn begin(
        &self,
        guard: &SlotGuard,
        timeout: Duration,
    ) -> Result<Box<dyn SlotTransaction>, Error>;
    /// get reservation by id
    async fn get(&self, id: ReservationId) -> Result<ReservationRecord, Error>;
    /// move a confirmed reservation to cancelled; anything else is `NotFound`
    async fn cancel(&self, id: ReservationId) -> Result<ReservationRecord, Error>;
}

/// Read-then-write scope for a single slot. Dropping it without `commit` keeps nothing.
#[async_trait]
pub trait SlotTransaction: Send {
    /// Confirmed records for the slot, as seen inside this scope.
    async fn occupancy(&mut self) -> Result<u32, Error>;
    /// Insert a confirmed record. A second confirmed record for the same
    /// caller and slot is `DuplicateReservation`.
    async fn insert(&mut self, record: ReservationRecord) -> Result<ReservationRecord, Error>;
    async fn commit(&mut self) -> Result<(), Error>;
    /// Discard everything written in this scope and release storage-side locks now.
    async fn rollback(&mut self) -> Result<(), Error>;
}

/// Authoritative capacity per resource.
#[async_trait]
pub trait ResourceCatalog: Send + Sync + 'static {
    async fn capacity(&self, resource_id: &str) -> Result<Option<u32>, Error>;
}
