use serde::{Deserialize, Serialize};

use crate::ReservationRecord;

/// Best-effort outcome of the follow-up actions of a committed reservation.
///
/// Informational only: nothing here can change the committed record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideEffectReport {
    pub chat_created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_error: Option<String>,
    pub notification_dispatched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

/// What the reservation endpoint returns on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationOutcome {
    pub reservation: ReservationRecord,
    #[serde(flatten)]
    pub side_effects: SideEffectReport,
}
