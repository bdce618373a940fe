//! CLI error types with exit code handling
//!
//! Library errors are folded into a few user-facing categories, each with
//! its own exit code.

use chartserve_core::CoreError;
use chartserve_repo::{ErrorKind, RepoError};
use chartserve_server::ServerError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Invalid reference, constraint, format or argument
    #[error("Validation failed: {message}")]
    #[diagnostic(code(chartserve::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Not found: {message}")]
    #[diagnostic(code(chartserve::cli::not_found))]
    NotFound { message: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(chartserve::cli::auth),
        help("check the secretRef or provider configured for this source")
    )]
    Authentication { message: String },

    #[error("Network error: {message}")]
    #[diagnostic(code(chartserve::cli::network))]
    Network { message: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(chartserve::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(chartserve::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(chartserve::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Authentication { .. } => exit_codes::AUTH_ERROR,
            CliError::Network { .. } => exit_codes::NETWORK_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an input error (user provided invalid input)
    pub fn input(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Configuration => CliError::Config { message, help: None },
            ErrorKind::Validation => CliError::Validation { message, help: None },
            ErrorKind::NotFound => CliError::NotFound { message },
            ErrorKind::Authentication => CliError::Authentication { message },
            ErrorKind::Network => CliError::Network { message },
            ErrorKind::Internal => CliError::Internal { message },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => e.into(),
            other => CliError::input(other.to_string()),
        }
    }
}

impl From<ServerError> for CliError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Repo(e) => e.into(),
            ServerError::Core(e) => e.into(),
            ServerError::Io(e) => e.into(),
            ServerError::Config { path, message } => CliError::Config {
                message: format!("{}: {}", path, message),
                help: Some("see `chartserve serve --help` for the configuration file location".to_string()),
            },
            ServerError::BadRequest(message) => CliError::input(message),
            ServerError::NotFound(message) => CliError::NotFound { message },
        }
    }
}

impl From<reqwest::Error> for CliError {
    fn from(err: reqwest::Error) -> Self {
        CliError::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_errors_keep_their_category() {
        let err = CliError::from(RepoError::ChartNotFound {
            name: "nginx".into(),
            repo: "https://charts.example.com/".into(),
        });
        assert_eq!(err.exit_code(), exit_codes::NOT_FOUND);

        let err = CliError::from(RepoError::AuthRequired { url: "oci://ghcr.io".into() });
        assert_eq!(err.exit_code(), exit_codes::AUTH_ERROR);

        let err = CliError::from(RepoError::Timeout { message: "slow".into() });
        assert_eq!(err.exit_code(), exit_codes::NETWORK_ERROR);
    }

    #[test]
    fn test_server_errors_unwrap() {
        let err = CliError::from(ServerError::NotFound("values.yaml".into()));
        assert_eq!(err.exit_code(), exit_codes::NOT_FOUND);

        let err = CliError::from(ServerError::Config {
            path: "config.yaml".into(),
            message: "bad".into(),
        });
        assert_eq!(err.exit_code(), exit_codes::CONFIG_ERROR);
        assert!(err.to_string().contains("config.yaml"));
    }
}
