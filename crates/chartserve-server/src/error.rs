//! Error types for the serving layer

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chartserve_core::CoreError;
use chartserve_repo::{ErrorKind, RepoError};
use thiserror::Error;

/// Serving layer errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to read configuration {path}: {message}")]
    Config { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the serving layer
pub type Result<T> = std::result::Result<T, ServerError>;

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Configuration | ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Network => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Repo(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Repo(e) => status_for_kind(e.kind()),
            ServerError::Core(
                CoreError::InvalidReference { .. }
                | CoreError::InvalidConstraint { .. }
                | CoreError::Conversion { .. }
                | CoreError::Validation { .. },
            ) => StatusCode::BAD_REQUEST,
            ServerError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Config { .. } | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn missing(parameter: &str) -> Self {
        ServerError::BadRequest(format!("missing {}", parameter))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_status_mapping() {
        let status = |e: RepoError| ServerError::from(e).status();

        assert_eq!(
            status(RepoError::InvalidConfig { message: "x".into() }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(RepoError::ChartNotFound {
                name: "nginx".into(),
                repo: "r".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(RepoError::AuthRequired { url: "u".into() }),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(RepoError::Timeout { message: "slow".into() }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(RepoError::Shared(Arc::new(RepoError::Timeout { message: "slow".into() }))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(RepoError::NetworkError { message: "reset".into() }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status(RepoError::Other("boom".into())), StatusCode::INTERNAL_SERVER_ERROR);

        let validation = CoreError::Validation {
            key: "format".into(),
            message: "unknown".into(),
        };
        assert_eq!(ServerError::from(validation).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServerError::missing("url").status(), StatusCode::BAD_REQUEST);
    }
}
