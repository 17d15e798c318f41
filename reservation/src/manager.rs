use std::sync::Arc;
use std::time::Duration;

use abi::{Error, ReservationId, ReservationRecord, ReservationRequest, SlotKey};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::oracle::CapacityOracle;
use crate::{
    ReservationManager, ReservationStore, ResourceCatalog, Rsvp, SlotGuard, SlotLocks, SlotTransaction,
};

#[async_trait]
impl Rsvp for ReservationManager {
    async fn reserve(&self, rsvp: ReservationRequest) -> Result<ReservationRecord, Error> {
        let result = self.admit(&rsvp).await;
        match &result {
            Ok(record) => info!(
                id = %record.id,
                user_id = %record.user_id,
                resource_id = %record.resource_id,
                date = %record.date,
                time = %record.time,
                "reservation committed"
            ),
            Err(e @ (Error::CapacityExceeded { .. } | Error::DuplicateReservation { .. })) => {
                warn!(user_id = %rsvp.user_id, error = %e, "reservation rejected")
            }
            Err(e @ (Error::StorageUnavailable(_) | Error::Timeout(_))) => {
                error!(user_id = %rsvp.user_id, error = %e, "reservation failed")
            }
            Err(_) => {}
        }
        result
    }

    async fn cancel(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
        let rsvp = self.store.cancel(id).await?;
        info!(id = %rsvp.id, slot = %rsvp.slot_key(), "reservation cancelled");
        Ok(rsvp)
    }

    async fn get(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
        self.store.get(id).await
    }
}

impl ReservationManager {
    pub fn new(
        store: impl ReservationStore,
        catalog: impl ResourceCatalog,
        lock_timeout: Duration,
    ) -> Self {
        Self::from_shared(Arc::new(store), Arc::new(catalog), lock_timeout)
    }

    pub fn from_shared(
        store: Arc<dyn ReservationStore>,
        catalog: Arc<dyn ResourceCatalog>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            locks: SlotLocks::new(),
            lock_timeout,
        }
    }

    async fn admit(&self, rsvp: &ReservationRequest) -> Result<ReservationRecord, Error> {
        let slot = rsvp.validate()?;
        let capacity = self
            .catalog
            .capacity(&slot.resource_id)
            .await?
            .ok_or_else(|| Error::UnknownResource(slot.resource_id.clone()))?;

        // critical section: read and write under the same slot lock and transaction
        let started = Instant::now();
        let guard = self.locks.acquire(&slot, self.lock_timeout).await?;
        let remaining = self
            .lock_timeout
            .saturating_sub(started.elapsed())
            .max(Duration::from_millis(1));
        let mut txn = self.store.begin(&guard, remaining).await?;

        let written = Self::write(&guard, txn.as_mut(), rsvp, &slot, capacity).await;
        let record = match written {
            Ok(record) => record,
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(slot = %slot, error = %rollback, "rollback failed");
                }
                return Err(e);
            }
        };
        txn.commit().await?;
        drop(guard);

        Ok(record)
    }

    async fn write(
        guard: &SlotGuard,
        txn: &mut dyn SlotTransaction,
        rsvp: &ReservationRequest,
        slot: &SlotKey,
        capacity: u32,
    ) -> Result<ReservationRecord, Error> {
        let occupancy = CapacityOracle::within(guard, &mut *txn).occupancy().await?;
        if occupancy >= capacity {
            return Err(Error::CapacityExceeded {
                slot: slot.clone(),
                occupancy,
                capacity,
            });
        }

        txn.insert(ReservationRecord::confirmed(rsvp, slot)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStore, StaticCatalog};
    use abi::{ReservationRequestBuilder, ReservationStatus};

    fn manager_with(capacity: u32) -> (ReservationManager, InMemoryStore) {
        let store = InMemoryStore::new();
        let catalog = StaticCatalog::new([("court-a".to_string(), capacity)]);
        let manager = ReservationManager::new(store.clone(), catalog, Duration::from_secs(5));
        (manager, store)
    }

    fn request(user: &str) -> ReservationRequest {
        ReservationRequestBuilder::default()
            .user_id(user)
            .resource_id("court-a")
            .date("2025-06-01")
            .time("18:00")
            .duration_minutes(60)
            .party_size(2)
            .build()
            .unwrap()
    }

    fn slot() -> SlotKey {
        request("x").validate().unwrap()
    }

    #[tokio::test]
    async fn reserve_should_work_for_valid_request() {
        let (manager, store) = manager_with(3);
        let rsvp = manager.reserve(request("alice")).await.unwrap();

        assert_eq!(rsvp.status, ReservationStatus::Confirmed);
        assert_eq!(rsvp.user_id, "alice");
        assert_eq!(rsvp.units, 1);
        assert_eq!(manager.get(rsvp.id).await.unwrap(), rsvp);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn invalid_request_should_be_rejected_before_any_write() {
        let (manager, store) = manager_with(3);
        let mut rsvp = request("alice");
        rsvp.party_size = 0;

        let err = manager.reserve(rsvp).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn unknown_resource_should_be_rejected() {
        let (manager, _) = manager_with(3);
        let mut rsvp = request("alice");
        rsvp.resource_id = "court-z".into();

        assert_eq!(
            manager.reserve(rsvp).await.unwrap_err(),
            Error::UnknownResource("court-z".into())
        );
    }

    #[tokio::test]
    async fn full_slot_should_reject_with_details() {
        let (manager, store) = manager_with(1);
        manager.reserve(request("alice")).await.unwrap();

        let err = manager.reserve(request("bob")).await.unwrap_err();
        assert_eq!(
            err,
            Error::CapacityExceeded {
                slot: slot(),
                occupancy: 1,
                capacity: 1
            }
        );
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn same_caller_twice_should_be_duplicate() {
        let (manager, store) = manager_with(3);
        manager.reserve(request("alice")).await.unwrap();

        let err = manager.reserve(request("alice")).await.unwrap_err();
        assert_eq!(
            err,
            Error::DuplicateReservation {
                user_id: "alice".into(),
                slot: slot()
            }
        );
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicates_should_commit_once() {
        let (manager, _) = manager_with(3);
        let a = manager.clone();
        let b = manager.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { a.reserve(request("alice")).await }),
            tokio::spawn(async move { b.reserve(request("alice")).await })
        );
        let results = [r1.unwrap(), r2.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(Error::DuplicateReservation { .. })))
                .count(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn capacity_should_hold_under_concurrent_load() {
        for _ in 0..20 {
            let (manager, store) = manager_with(3);
            let handles: Vec<_> = (0..50)
                .map(|i| {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.reserve(request(&format!("user-{i}"))).await })
                })
                .collect();

            let results: Vec<_> = futures::future::join_all(handles)
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .collect();

            let committed = results.iter().filter(|r| r.is_ok()).count();
            let rejected = results
                .iter()
                .filter(|r| matches!(r, Err(Error::CapacityExceeded { capacity: 3, .. })))
                .count();
            assert_eq!(committed, 3);
            assert_eq!(rejected, 47);
            assert_eq!(store.records().len(), 3);
        }
    }

    #[tokio::test]
    async fn cancel_should_free_a_unit_without_deleting() {
        let (manager, store) = manager_with(3);
        let mut committed = Vec::new();
        for user in ["alice", "bob", "carol"] {
            committed.push(manager.reserve(request(user)).await.unwrap());
        }
        assert!(matches!(
            manager.reserve(request("dave")).await,
            Err(Error::CapacityExceeded { occupancy: 3, .. })
        ));

        let cancelled = manager.cancel(committed[1].id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(manager.cancel(committed[1].id).await.unwrap_err(), Error::NotFound);

        manager.reserve(request("erin")).await.unwrap();
        assert_eq!(store.records().len(), 5 - 1);
        assert_eq!(
            manager.get(committed[1].id).await.unwrap().status,
            ReservationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn cancelled_caller_should_be_able_to_book_again() {
        let (manager, _) = manager_with(3);
        let first = manager.reserve(request("alice")).await.unwrap();
        manager.cancel(first.id).await.unwrap();

        let second = manager.reserve(request("alice")).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn get_unknown_id_should_be_not_found() {
        let (manager, _) = manager_with(3);
        assert_eq!(
            manager.get(uuid::Uuid::new_v4()).await.unwrap_err(),
            Error::NotFound
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl ReservationStore for BrokenStore {
        async fn begin(
            &self,
            _guard: &SlotGuard,
            _timeout: Duration,
        ) -> Result<Box<dyn SlotTransaction>, Error> {
            Err(Error::StorageUnavailable("connection refused".into()))
        }

        async fn get(&self, _id: ReservationId) -> Result<ReservationRecord, Error> {
            Err(Error::StorageUnavailable("connection refused".into()))
        }

        async fn cancel(&self, _id: ReservationId) -> Result<ReservationRecord, Error> {
            Err(Error::StorageUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn storage_fault_should_be_retriable() {
        let catalog = StaticCatalog::new([("court-a".to_string(), 3)]);
        let manager = ReservationManager::new(BrokenStore, catalog, Duration::from_secs(1));

        let err = manager.reserve(request("alice")).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn waiting_too_long_for_the_slot_should_time_out() {
        let catalog = StaticCatalog::new([("court-a".to_string(), 3)]);
        let manager =
            ReservationManager::new(InMemoryStore::new(), catalog, Duration::from_millis(20));

        let held = manager
            .locks
            .acquire(&slot(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = manager.reserve(request("alice")).await.unwrap_err();
        assert_eq!(err, Error::Timeout(slot()));
        drop(held);

        manager.reserve(request("alice")).await.unwrap();
    }

    /// Remembers the wait budget each `begin` was given.
    #[derive(Clone, Default)]
    struct BudgetRecordingStore {
        inner: InMemoryStore,
        budgets: Arc<std::sync::Mutex<Vec<Duration>>>,
    }

    #[async_trait]
    impl ReservationStore for BudgetRecordingStore {
        async fn begin(
            &self,
            guard: &SlotGuard,
            timeout: Duration,
        ) -> Result<Box<dyn SlotTransaction>, Error> {
            self.budgets.lock().unwrap().push(timeout);
            self.inner.begin(guard, timeout).await
        }

        async fn get(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
            self.inner.get(id).await
        }

        async fn cancel(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
            self.inner.cancel(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_should_only_get_what_is_left_of_the_lock_budget() {
        let store = BudgetRecordingStore::default();
        let catalog = StaticCatalog::new([("court-a".to_string(), 3)]);
        let manager = ReservationManager::new(store.clone(), catalog, Duration::from_secs(1));

        let held = manager
            .locks
            .acquire(&slot(), Duration::from_secs(1))
            .await
            .unwrap();
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.reserve(request("alice")).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(held);
        waiter.await.unwrap().unwrap();

        let budgets = store.budgets.lock().unwrap().clone();
        assert_eq!(budgets.len(), 1);
        assert!(budgets[0] <= Duration::from_millis(700), "{:?}", budgets[0]);
        assert!(budgets[0] > Duration::ZERO);
    }
}
