//! service-level error taxonomy
//!
//! individual channel failures are recovered inside the orchestrator (a
//! failed channel just contributes an empty ranking); only the terminal
//! outcomes below ever reach the HTTP layer. cancellation has no variant
//! here: a disconnected client drops the request future, which cancels all
//! in-flight downstream calls, and nothing is written back.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// malformed request input, rejected before any backend I/O
    #[error("bad request: {0}")]
    BadRequest(String),

    /// unknown keyframe id on the image-search path
    #[error("keyframe {0} not found")]
    NotFound(i64),

    /// a required store call failed, or every active channel failed
    #[error("search backends unavailable: {0}")]
    Unavailable(String),

    /// invariant violation; always a programmer error, always logged
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for SearchError {
    fn status_code(&self) -> StatusCode {
        match self {
            SearchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SearchError::NotFound(_) => StatusCode::NOT_FOUND,
            SearchError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SearchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SearchError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(SearchError::NotFound(7).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            SearchError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            SearchError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
