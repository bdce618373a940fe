//! Error types for repository operations

use chartserve_core::CoreError;
use std::sync::Arc;
use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("{operation} is not supported by {kind} repositories")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("Rate limited by server. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    // ============ Authentication Errors ============
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Failed to get secret '{name}' in namespace '{namespace}': {message}")]
    SecretUnavailable {
        namespace: String,
        name: String,
        message: String,
    },

    #[error("Invalid secret '{name}': {message}")]
    InvalidSecret { name: String, message: String },

    #[error("Failed to get credential from {provider}: {message}")]
    ProviderLogin { provider: String, message: String },

    // ============ Index Errors ============
    #[error("Index not found at {url}")]
    IndexNotFound { url: String },

    #[error("Index parse error: {message}")]
    IndexParseError { message: String },

    // ============ Chart Errors ============
    #[error("Chart not found: {name} in repository {repo}")]
    ChartNotFound { name: String, repo: String },

    #[error("No version of {name} matching '{constraint}' in repository {repo}")]
    VersionNotFound {
        name: String,
        constraint: String,
        repo: String,
    },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Chart verification failed for {name}: {message}")]
    VerificationFailed { name: String, message: String },

    // ============ OCI Errors ============
    #[error("OCI registry error: {message}")]
    OciError { message: String },

    #[error("Invalid OCI reference: {reference}")]
    InvalidOciReference { reference: String },

    #[error("OCI manifest not found: {reference}")]
    OciManifestNotFound { reference: String },

    // ============ Wrapped Errors ============
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An error shared between callers of one in-flight operation
    #[error(transparent)]
    Shared(Arc<RepoError>),

    #[error("{0}")]
    Other(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Broad error category, used for status mapping and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Authentication,
    NotFound,
    Network,
    Validation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepoError::InvalidRepositoryUrl { .. }
            | RepoError::InvalidConfig { .. }
            | RepoError::Unsupported { .. }
            | RepoError::InvalidOciReference { .. } => ErrorKind::Configuration,

            RepoError::HttpError { status: 404, .. } => ErrorKind::NotFound,
            RepoError::HttpError { status: 401 | 403, .. } => ErrorKind::Authentication,
            RepoError::HttpError { .. }
            | RepoError::NetworkError { .. }
            | RepoError::Timeout { .. }
            | RepoError::RateLimited { .. }
            | RepoError::OciError { .. } => ErrorKind::Network,

            RepoError::AuthRequired { .. }
            | RepoError::AuthFailed { .. }
            | RepoError::SecretUnavailable { .. }
            | RepoError::InvalidSecret { .. }
            | RepoError::ProviderLogin { .. } => ErrorKind::Authentication,

            RepoError::IndexNotFound { .. }
            | RepoError::ChartNotFound { .. }
            | RepoError::VersionNotFound { .. }
            | RepoError::OciManifestNotFound { .. } => ErrorKind::NotFound,

            RepoError::IndexParseError { .. }
            | RepoError::IntegrityCheckFailed { .. }
            | RepoError::VerificationFailed { .. } => ErrorKind::Validation,

            RepoError::Core(e) => match e {
                CoreError::InvalidReference { .. } => ErrorKind::Configuration,
                CoreError::InvalidConstraint { .. }
                | CoreError::Conversion { .. }
                | CoreError::Validation { .. } => ErrorKind::Validation,
                _ => ErrorKind::Internal,
            },

            RepoError::Shared(inner) => inner.kind(),

            RepoError::Kube(_)
            | RepoError::Io(_)
            | RepoError::Serialization(_)
            | RepoError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            RepoError::Timeout { .. } => true,
            RepoError::Shared(inner) => inner.is_timeout(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout {
                message: e.to_string(),
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for RepoError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        RepoError::Timeout {
            message: e.to_string(),
        }
    }
}
