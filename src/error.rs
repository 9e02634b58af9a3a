//! Request-level error taxonomy

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while serving a request.
///
/// The display text is the bare underlying message; it is returned to the
/// client verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed request: missing file part, empty filename, bad query
    #[error("{0}")]
    Input(String),

    /// Request body exceeds the configured limit
    #[error("{0}")]
    TooLarge(String),

    /// Upload is not a decodable image
    #[error("{0}")]
    Decode(String),

    /// Model forward pass failed or produced an unusable output
    #[error("{0}")]
    Inference(String),

    /// Document store read or write failed
    #[error("{0}")]
    Storage(String),
}

impl ServiceError {
    /// Short name of the error kind, used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Input(_) => "input",
            ServiceError::TooLarge(_) => "too_large",
            ServiceError::Decode(_) => "decode",
            ServiceError::Inference(_) => "inference",
            ServiceError::Storage(_) => "storage",
        }
    }

    /// HTTP status for this error.
    ///
    /// With `legacy` set every processing failure maps to 500; client errors
    /// keep their status.
    pub fn status_code(&self, legacy: bool) -> StatusCode {
        match self {
            ServiceError::Input(_) => StatusCode::BAD_REQUEST,
            ServiceError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ if legacy => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::Input(_) | ServiceError::TooLarge(_))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Storage(err.to_string())
    }
}
