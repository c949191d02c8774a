use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::store::StoreError;

/// The wire-level error taxonomy from spec §7, surfaced as a JSON body with
/// a machine-readable `errcode` plus a human `error` string.
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum RendezvousError {
    #[error("session not found")]
    NotFound,
    #[error("etag mismatch")]
    ConcurrentWrite,
    #[error("if-match precondition required")]
    PreconditionRequired,
    #[error("payload exceeds max_content_length")]
    PayloadTooLarge,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    errcode: &'static str,
    error: &'static str,
}

impl RendezvousError {
    const fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    errcode: "M_NOT_FOUND",
                    error: "Session not found",
                },
            ),
            Self::ConcurrentWrite => (
                StatusCode::PRECONDITION_FAILED,
                ErrorBody {
                    errcode: "M_CONCURRENT_WRITE",
                    error: "ETag mismatch",
                },
            ),
            Self::PreconditionRequired => (
                StatusCode::PRECONDITION_REQUIRED,
                ErrorBody {
                    errcode: "M_MISSING_PARAM",
                    error: "If-Match required",
                },
            ),
            Self::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorBody {
                    errcode: "M_TOO_LARGE",
                    error: "Payload too large",
                },
            ),
        }
    }
}

impl From<StoreError> for RendezvousError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::PreconditionRequired => Self::PreconditionRequired,
            StoreError::ConcurrentWrite => Self::ConcurrentWrite,
            StoreError::PayloadTooLarge => Self::PayloadTooLarge,
        }
    }
}

impl IntoResponse for RendezvousError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        tracing::debug!(?status, errcode = body.errcode, "request failed");
        (status, Json(body)).into_response()
    }
}
