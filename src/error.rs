use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

use thiserror::Error;

/// Failure to resolve a model artifact to a local file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("disk error: {0}")]
    Disk(String),
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
}

impl From<std::io::Error> for ProvisionError {
    fn from(err: std::io::Error) -> Self {
        ProvisionError::Disk(err.to_string())
    }
}

/// Error reported by a native inference runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model is not ready")]
    NotReady,
    #[error("too many completions in flight, retry later")]
    Busy,
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("model execution failed: {0}")]
    GenerationFailure(String),
}

impl From<RuntimeError> for InferenceError {
    fn from(err: RuntimeError) -> Self {
        InferenceError::GenerationFailure(err.to_string())
    }
}

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Inference(InferenceError::NotReady)
            | ServiceError::Inference(InferenceError::Busy) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Inference(InferenceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Inference(InferenceError::GenerationFailure(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_errors_map_to_status_codes() {
        let cases = [
            (InferenceError::NotReady, StatusCode::SERVICE_UNAVAILABLE),
            (InferenceError::Busy, StatusCode::SERVICE_UNAVAILABLE),
            (
                InferenceError::Timeout(Duration::from_secs(5)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                InferenceError::GenerationFailure("oom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ServiceError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let err = InferenceError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "completion timed out after 250ms");
    }

    #[test]
    fn io_errors_become_disk_failures() {
        let err: ProvisionError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into();
        assert!(matches!(err, ProvisionError::Disk(ref msg) if msg.contains("read-only")));
    }
}
