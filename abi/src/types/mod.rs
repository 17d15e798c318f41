mod record;
mod report;
mod request;
mod slot;

pub use record::{ReservationRecord, ReservationStatus};
pub use report::{ReservationOutcome, SideEffectReport};
pub use request::{ReservationRequest, ReservationRequestBuilder, Visibility};
pub use slot::SlotKey;
