use abi::{Error, ReservationOutcome, ReservationRecord, ReservationRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use reservation::Rsvp;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::Caller;
use crate::{ApiError, RsvpService};

type ApiResult<T> = Result<T, ApiError>;

#[instrument(skip_all, fields(user_id = %caller.0))]
pub async fn reserve(
    State(state): State<RsvpService>,
    caller: Caller,
    payload: Result<Json<ReservationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReservationOutcome>)> {
    let Json(rsvp) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let rsvp = rsvp.with_caller(caller.0);

    let reservation = state.manager.reserve(rsvp).await?;
    // committed from here on; effects only add to the report
    let side_effects = state.effects.run(&reservation).await;

    Ok((
        StatusCode::CREATED,
        Json(ReservationOutcome {
            reservation,
            side_effects,
        }),
    ))
}

pub async fn get_reservation(
    State(state): State<RsvpService>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<ReservationRecord>> {
    let id = Uuid::parse_str(&id).map_err(|_| Error::InvalidReservationId(id.clone()))?;
    let rsvp = state.manager.get(id).await?;
    // other callers' reservations are indistinguishable from missing ones
    if rsvp.user_id != caller.0 {
        return Err(Error::NotFound.into());
    }
    Ok(Json(rsvp))
}

pub async fn health() -> &'static str {
    "ok"
}
