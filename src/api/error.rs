//! HTTP error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::PilosaError;

/// Error returned by handlers as a plain-text response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<PilosaError> for ApiError {
    fn from(err: PilosaError) -> Self {
        let status = match &err {
            PilosaError::InvalidRequest(_)
            | PilosaError::InvalidProcessId(_)
            | PilosaError::Serialization(_) => StatusCode::BAD_REQUEST,
            PilosaError::ProcessNotFound(_) => StatusCode::NOT_FOUND,
            PilosaError::ExecutorUnavailable | PilosaError::ArchiveClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, format!("{}\n", self.message)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: ApiError = PilosaError::ProcessNotFound("x".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = PilosaError::InvalidRequest("bad".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = PilosaError::Other("boom".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let err: ApiError = PilosaError::ExecutorUnavailable.into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
