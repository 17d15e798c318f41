mod config;
mod error;
mod types;

pub use config::*;
pub use error::Error;
pub use types::*;

pub type ReservationId = uuid::Uuid;
pub type UserId = String;
pub type ResourceId = String;
