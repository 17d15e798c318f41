use crate::{SlotKey, UserId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Invalid reservation request: {0}")]
    Validation(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Slot {slot} is full ({occupancy}/{capacity} confirmed)")]
    CapacityExceeded {
        slot: SlotKey,
        occupancy: u32,
        capacity: u32,
    },

    #[error("User {user_id} already holds a confirmed reservation for {slot}")]
    DuplicateReservation { user_id: UserId, slot: SlotKey },

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited { limit: u32, retry_after: u64 },

    #[error("Timed out waiting for slot {0}")]
    Timeout(SlotKey),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("No reservation found by the given condition")]
    NotFound,

    #[error("Invalid reservation id: {0}")]
    InvalidReservationId(String),

    #[error("Caller identity could not be verified")]
    Unauthenticated,

    #[error("Failed to read configuration file")]
    ConfigReadError,

    #[error("Failed to parse configuration file: {0}")]
    ConfigParseError(String),
}

impl Error {
    /// Whether retrying the same request later may succeed. Nothing was committed for these.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::StorageUnavailable(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound,
            e => Error::StorageUnavailable(e.to_string()),
        }
    }
}
