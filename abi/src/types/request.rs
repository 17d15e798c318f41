use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, SlotKey, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Shared,
    #[default]
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Shared => "shared",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Visibility::Shared),
            "private" => Ok(Visibility::Private),
            other => Err(Error::Validation(format!("unknown visibility {other:?}"))),
        }
    }
}

/// A reservation request as received from a caller.
///
/// `user_id` never comes from the wire: it is filled in from the verified caller identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into))]
pub struct ReservationRequest {
    #[serde(skip)]
    #[builder(default)]
    pub user_id: UserId,
    pub resource_id: ResourceId,
    /// ISO-8601 calendar date, `YYYY-MM-DD`.
    pub date: String,
    /// Time of day, `HH:MM`.
    pub time: String,
    pub duration_minutes: i64,
    pub party_size: i64,
    /// Must be present on the wire; the builder defaults to private.
    #[builder(default)]
    pub visibility: Visibility,
    #[serde(default)]
    #[builder(default, setter(into, strip_option))]
    pub price: Option<f64>,
}

impl ReservationRequest {
    pub fn with_caller(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Structural validation. Returns the slot this request targets.
    pub fn validate(&self) -> Result<SlotKey, Error> {
        if self.user_id.trim().is_empty() {
            return Err(Error::Validation("caller identity is missing".into()));
        }
        if self.resource_id.trim().is_empty() {
            return Err(Error::Validation("resourceId must not be empty".into()));
        }
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|_| {
            Error::Validation(format!("date {:?} is not a YYYY-MM-DD date", self.date))
        })?;
        let time = NaiveTime::parse_from_str(&self.time, "%H:%M").map_err(|_| {
            Error::Validation(format!("time {:?} is not a HH:MM time", self.time))
        })?;
        if self.duration_minutes <= 0 || i32::try_from(self.duration_minutes).is_err() {
            return Err(Error::Validation(format!(
                "durationMinutes must be positive, got {}",
                self.duration_minutes
            )));
        }
        if self.party_size < 1 || i32::try_from(self.party_size).is_err() {
            return Err(Error::Validation(format!(
                "partySize must be at least 1, got {}",
                self.party_size
            )));
        }
        if let Some(price) = self.price {
            if !price.is_finite() || price <= 0.0 {
                return Err(Error::Validation(format!(
                    "price must be positive, got {price}"
                )));
            }
        }

        Ok(SlotKey::new(self.resource_id.trim(), date, time))
    }
}
