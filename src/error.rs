//! Typed error hierarchy for the decision core.
//!
//! Hot-path stages never propagate these upward — dependency faults are
//! recovered locally (see `store.rs`, `inference.rs`, `decision.rs`). This
//! type exists for admin endpoints, which surface faults as 5xx, and for
//! anything that legitimately cannot proceed (malformed client input).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("dependency unavailable: {0}")]
    TransientDependency(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("bad input: {0}")]
    ClientBadInput(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    fn status(&self) -> StatusCode {
        match self {
            CoreError::TransientDependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::ClientBadInput(_) => StatusCode::BAD_REQUEST,
            CoreError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            CoreError::TransientDependency(_) => "TRANSIENT_DEPENDENCY",
            CoreError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            CoreError::ClientBadInput(_) => "CLIENT_BAD_INPUT",
            CoreError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.kind(), "message": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::PersistenceFailure(e.to_string())
    }
}
