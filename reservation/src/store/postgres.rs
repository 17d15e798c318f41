use std::time::Duration;

use abi::{Error, ReservationId, ReservationRecord, SlotKey};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::{ReservationStore, ResourceCatalog, SlotTransaction};
use crate::SlotGuard;

const UNIQUE_VIOLATION: &str = "23505";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Postgres-backed store.
///
/// Each slot transaction takes `pg_advisory_xact_lock` on the slot key, so
/// several service instances sharing one database still serialize per slot.
/// The partial unique index on confirmed `(user_id, resource_id, slot_date, slot_time)`
/// turns a double booking by the same caller into a rejected insert.
///
/// Waiting for a connection and for the advisory lock are both bounded by the
/// timeout handed to `begin`; the lock wait uses a transaction-local `lock_timeout`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct PgSlotTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    slot: SlotKey,
}

impl PgSlotTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, Error> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::StorageUnavailable("transaction already finished".into()))
    }
}

#[async_trait]
impl SlotTransaction for PgSlotTransaction {
    async fn occupancy(&mut self) -> Result<u32, Error> {
        let slot = self.slot.clone();
        let tx = self.tx()?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM rsvp.reservations \
             WHERE resource_id = $1 AND slot_date = $2 AND slot_time = $3 AND status = 'confirmed'",
        )
        .bind(&slot.resource_id)
        .bind(slot.date)
        .bind(slot.time)
        .fetch_one(&mut **tx)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn insert(&mut self, record: ReservationRecord) -> Result<ReservationRecord, Error> {
        let tx = self.tx()?;
        let inserted = sqlx::query_as::<_, ReservationRecord>(
            "INSERT INTO rsvp.reservations \
             (id, user_id, resource_id, slot_date, slot_time, duration_minutes, party_size, \
              visibility, price, status, units, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *",
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.resource_id)
        .bind(record.date)
        .bind(record.time)
        .bind(record.duration_minutes)
        .bind(record.party_size)
        .bind(record.visibility.as_str())
        .bind(record.price)
        .bind(record.status.to_string())
        .bind(record.units)
        .bind(record.created_at)
        .fetch_one(&mut **tx)
        .await;

        match inserted {
            Ok(record) => Ok(record),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                let slot = record.slot_key();
                Err(Error::DuplicateReservation {
                    user_id: record.user_id,
                    slot,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&mut self) -> Result<(), Error> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Error> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn begin(
        &self,
        guard: &SlotGuard,
        timeout: Duration,
    ) -> Result<Box<dyn SlotTransaction>, Error> {
        let slot = guard.slot().clone();
        let started = tokio::time::Instant::now();
        let mut tx = tokio::time::timeout(timeout, self.pool.begin())
            .await
            .map_err(|_| Error::Timeout(slot.clone()))??;

        // 0 would disable the limit
        let remaining = timeout.saturating_sub(started.elapsed()).as_millis().max(1);
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", remaining))
            .execute(&mut *tx)
            .await?;

        let locked = sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(slot.lock_key())
            .execute(&mut *tx)
            .await;
        match locked {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => {
                return Err(Error::Timeout(slot));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(slot = %slot, "advisory lock taken");

        Ok(Box::new(PgSlotTransaction { tx: Some(tx), slot }))
    }

    async fn get(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
        let rsvp = sqlx::query_as("SELECT * FROM rsvp.reservations WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rsvp)
    }

    async fn cancel(&self, id: ReservationId) -> Result<ReservationRecord, Error> {
        let rsvp = sqlx::query_as(
            "UPDATE rsvp.reservations SET status = 'cancelled' \
             WHERE id = $1 AND status = 'confirmed' RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(rsvp)
    }
}

#[async_trait]
impl ResourceCatalog for PgStore {
    async fn capacity(&self, resource_id: &str) -> Result<Option<u32>, Error> {
        let capacity: Option<i32> =
            sqlx::query_scalar("SELECT capacity FROM rsvp.resources WHERE id = $1")
                .bind(resource_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(capacity.map(|c| u32::try_from(c).unwrap_or(0)))
    }
}
