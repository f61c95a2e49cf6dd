//! Error taxonomy shared by the store, the dispatcher and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

/// Failures produced by a single [`Store`](crate::store::Store) operation.
///
/// These are ordinary values: the dispatcher forwards them to the caller
/// untouched and keeps serving other requests.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("invalid JSON payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What a caller of [`StoreHandle`](crate::dispatcher::StoreHandle) can observe.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The dispatcher task is no longer running, so the request was either
    /// never queued or its reply slot was dropped unanswered.
    #[error("store dispatcher is not running")]
    Unavailable,
}

impl DispatchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::Store(StoreError::NotFound(_)))
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DispatchError::Store(StoreError::DuplicateKey(_)))
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, DispatchError::Store(StoreError::Parse(_)))
    }
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("key not provided")]
    MissingKey,
    #[error("value not provided")]
    MissingPayload,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingKey => StatusCode::NOT_FOUND,
            ApiError::MissingPayload => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(DispatchError::Store(err)) => match err {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::DuplicateKey(_) => StatusCode::BAD_REQUEST,
                StoreError::Parse(_) => StatusCode::BAD_REQUEST,
            },
            ApiError::Dispatch(DispatchError::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Dispatch(DispatchError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = self.to_string();
        if status.is_server_error() {
            error!(%status, error = %msg, "request failed");
        } else {
            warn!(%status, error = %msg, "request rejected");
        }
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_error() -> StoreError {
        serde_json::from_slice::<serde_json::Value>(b"{\"name\": \"Layton}")
            .map_err(StoreError::from)
            .expect_err("malformed json")
    }

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(ApiError::MissingKey.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::MissingPayload.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(StoreError::NotFound("k".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StoreError::DuplicateKey("k".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::from(parse_error()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Dispatch(DispatchError::Unavailable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn dispatch_error_predicates() {
        let err = DispatchError::from(StoreError::DuplicateKey("k".into()));
        assert!(err.is_duplicate_key());
        assert!(!err.is_not_found());
        assert!(DispatchError::from(parse_error()).is_parse());
    }
}
