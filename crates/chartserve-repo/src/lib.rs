//! chartserve Repository Access
//!
//! This crate turns a chart source reference into chart contents:
//!
//! - **Credentials**: secret, then cloud auto-login, then anonymous
//! - **Index repositories**: Helm-style repos with index.yaml
//! - **Registries**: OCI registries, one short-lived client per session
//! - **Chart cache**: single-flight downloads keyed by repo/name/version
//!
//! ## Example
//!
//! ```rust,no_run
//! use chartserve_repo::{ChartService, CredentialResolver, LoginManager, SourceRegistry};
//! use chartserve_repo::secrets::StaticSecretStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = CredentialResolver::new(
//!     Arc::new(StaticSecretStore::new("default")),
//!     Arc::new(LoginManager::empty()),
//! );
//! let service = ChartService::new(SourceRegistry::default(), resolver);
//!
//! let resolved = service
//!     .get_chart("https://charts.bitnami.com/bitnami", "nginx", "^15")
//!     .await?;
//! println!("{} files", resolved.chart.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Notes
//!
//! - Credentials are NEVER sent after cross-origin redirects
//! - Registry credentials files are private and removed when the session ends

pub mod error;
pub mod config;
pub mod secrets;
pub mod login;
pub mod credentials;
pub mod index;
pub mod backend;
pub mod http;
pub mod oci;
pub mod registry;
pub mod verify;
pub mod cache;
pub mod service;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use error::{ErrorKind, RepoError, Result};
pub use config::{SecretsConfig, SourceRegistry};
pub use secrets::{SecretData, SecretStore};
pub use login::{LoginManager, LoginOutcome, ProviderEndpoints, ProviderLogin};
pub use credentials::{BasicAuth, Credential, CredentialResolver, SecureHttpClient};
pub use index::{ChartVersion, RepositoryIndex};
pub use backend::{ChartRepository, create_repository};
pub use http::{IndexCache, IndexRepository};
pub use oci::RegistryRepository;
pub use registry::{CredentialsFile, RegistryClient, RegistryClientFactory};
pub use verify::{ChartVerifier, NoopVerifier};
pub use cache::{CacheEvent, CacheEventSink, CacheStats, ChartCache};
pub use service::{ChartService, ResolvedChart};
