//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid source reference {url}: {reason}")]
    InvalidReference { url: String, reason: String },

    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("Invalid chart archive: {message}")]
    Archive { message: String },

    #[error("Cannot convert {file} to {format}: {message}")]
    Conversion {
        file: String,
        format: String,
        message: String,
    },

    #[error("Invalid value for {key}: {message}")]
    Validation { key: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
