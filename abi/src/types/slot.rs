use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// A discrete (resource, date, time-of-day) unit offered for reservation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotKey {
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(resource_id: impl Into<ResourceId>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            resource_id: resource_id.into(),
            date,
            time,
        }
    }

    /// Stable textual key, used for advisory locks and logs.
    pub fn lock_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}T{}",
            self.resource_id,
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M")
        )
    }
}
