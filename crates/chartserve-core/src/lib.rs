//! chartserve Core - shared types for resolving and serving charts
//!
//! This crate provides the foundational types used throughout chartserve:
//! - `SourceReference`: where a chart repository lives and how to reach it
//! - `VersionConstraint`: which version of a chart to fetch
//! - `CachedChart`: the unpacked contents of one chart archive
//! - `DataFormat`: YAML/JSON conversion of served files
//! - `validate`: guards for values interpolated into generated commands

pub mod chart;
pub mod error;
pub mod format;
pub mod reference;
pub mod validate;
pub mod version;

pub use chart::{CacheKey, CachedChart, ChartMetadata};
pub use error::{CoreError, Result};
pub use format::{Converted, DataFormat};
pub use reference::{Provider, RepositoryKind, SecretRef, SourceReference};
pub use version::VersionConstraint;
