use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};

use crate::{Error, ReservationId, ReservationRequest, ResourceId, SlotKey, UserId, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationStatus::Confirmed => f.write_str("confirmed"),
            ReservationStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(Error::StorageUnavailable(format!(
                "unexpected reservation status {other:?}"
            ))),
        }
    }
}

/// The persisted result of a successful admission.
///
/// Records are never deleted; cancellation only moves `status` to `cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub user_id: UserId,
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub party_size: i32,
    pub visibility: Visibility,
    pub price: Option<f64>,
    pub status: ReservationStatus,
    /// Capacity units consumed. Always 1.
    pub units: i32,
    pub created_at: DateTime<Utc>,
}

impl ReservationRecord {
    /// Materialize a confirmed record from an already validated request.
    pub fn confirmed(rsvp: &ReservationRequest, slot: &SlotKey) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id: rsvp.user_id.clone(),
            resource_id: slot.resource_id.clone(),
            date: slot.date,
            time: slot.time,
            duration_minutes: rsvp.duration_minutes as i32,
            party_size: rsvp.party_size as i32,
            visibility: rsvp.visibility,
            price: rsvp.price,
            status: ReservationStatus::Confirmed,
            units: 1,
            created_at: Utc::now(),
        }
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.resource_id.clone(), self.date, self.time)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

impl FromRow<'_, PgRow> for ReservationRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let visibility: String = row.try_get("visibility")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            resource_id: row.try_get("resource_id")?,
            date: row.try_get("slot_date")?,
            time: row.try_get("slot_time")?,
            duration_minutes: row.try_get("duration_minutes")?,
            party_size: row.try_get("party_size")?,
            visibility: visibility.parse().map_err(|e: Error| decode_error("visibility", e))?,
            price: row.try_get("price")?,
            status: status.parse().map_err(|e: Error| decode_error("status", e))?,
            units: row.try_get("units")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn decode_error(column: &str, e: Error) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    }
}
