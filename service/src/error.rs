use abi::Error;
use axum::http::header::{HeaderName, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

pub(crate) const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub(crate) const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitedBody {
    error: &'static str,
    message: String,
    retry_after: u64,
}

/// HTTP face of [`abi::Error`].
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) | Error::InvalidReservationId(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::UnknownResource(_) | Error::NotFound => StatusCode::NOT_FOUND,
            Error::CapacityExceeded { .. } | Error::DuplicateReservation { .. } => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout(_)
            | Error::StorageUnavailable(_)
            | Error::ConfigReadError
            | Error::ConfigParseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.0 {
            Error::Validation(_) | Error::InvalidReservationId(_) => "VALIDATION_ERROR",
            Error::Unauthenticated => "UNAUTHENTICATED",
            Error::UnknownResource(_) => "RESOURCE_NOT_FOUND",
            Error::NotFound => "NOT_FOUND",
            Error::CapacityExceeded { .. } => "SLOT_UNAVAILABLE",
            Error::DuplicateReservation { .. } => "DUPLICATE_BOOKING",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Timeout(_) => "TIMEOUT",
            Error::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Error::ConfigReadError | Error::ConfigParseError(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<Value> {
        match &self.0 {
            Error::CapacityExceeded {
                slot,
                occupancy,
                capacity,
            } => Some(json!({ "slot": slot, "occupancy": occupancy, "capacity": capacity })),
            Error::DuplicateReservation { slot, .. } => Some(json!({ "slot": slot })),
            Error::UnknownResource(id) => Some(json!({ "resourceId": id })),
            Error::Timeout(_) | Error::StorageUnavailable(_) => Some(json!({ "retriable": true })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Error::RateLimited { limit, retry_after } = self.0 {
            let body = RateLimitedBody {
                error: self.code(),
                message: self.0.to_string(),
                retry_after,
            };
            let mut response = (status, Json(body)).into_response();
            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
            set_rate_limit_headers(headers, limit, 0);
            return response;
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.0.to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

pub(crate) fn set_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::SlotKey;

    fn slot() -> SlotKey {
        SlotKey::new(
            "court-a",
            "2025-06-01".parse().unwrap(),
            "18:00:00".parse().unwrap(),
        )
    }

    #[test]
    fn errors_should_map_to_documented_status_codes() {
        let cases = [
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (
                Error::CapacityExceeded {
                    slot: slot(),
                    occupancy: 3,
                    capacity: 3,
                },
                StatusCode::CONFLICT,
                "SLOT_UNAVAILABLE",
            ),
            (
                Error::DuplicateReservation {
                    user_id: "alice".into(),
                    slot: slot(),
                },
                StatusCode::CONFLICT,
                "DUPLICATE_BOOKING",
            ),
            (
                Error::UnknownResource("court-z".into()),
                StatusCode::NOT_FOUND,
                "RESOURCE_NOT_FOUND",
            ),
            (
                Error::StorageUnavailable("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_UNAVAILABLE",
            ),
            (Error::Timeout(slot()), StatusCode::INTERNAL_SERVER_ERROR, "TIMEOUT"),
            (Error::Unauthenticated, StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
        ];
        for (error, status, code) in cases {
            let e = ApiError(error);
            assert_eq!(e.status(), status);
            assert_eq!(e.code(), code);
        }
    }

    #[test]
    fn rate_limited_should_carry_retry_after() {
        let response = ApiError(Error::RateLimited {
            limit: 5,
            retry_after: 42,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "5");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");
    }

    #[test]
    fn other_errors_should_not_carry_retry_after() {
        let response = ApiError(Error::NotFound).into_response();
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }
}
