//! Unified chart repository trait
//!
//! Provides a single interface for index-based and registry-based repositories

use async_trait::async_trait;
use chartserve_core::{RepositoryKind, SourceReference, VersionConstraint};
use std::sync::Arc;

use crate::credentials::{BasicAuth, Credential, SecureHttpClient};
use crate::error::Result;
use crate::http::{IndexCache, IndexRepository};
use crate::oci::RegistryRepository;
use crate::registry::{CredentialsFile, RegistryClientFactory};

/// Unified chart repository trait
#[async_trait]
pub trait ChartRepository: Send + Sync {
    /// Normalized repository URL
    fn url(&self) -> &str;

    fn kind(&self) -> RepositoryKind;

    /// Concrete version of `name` selected by the constraint
    async fn resolve_version(&self, name: &str, constraint: &VersionConstraint) -> Result<String>;

    /// Download the chart archive of one resolved version
    async fn download(&self, name: &str, version: &str) -> Result<Vec<u8>>;

    /// Authenticate subsequent operations
    async fn login(&self, _auth: &BasicAuth) -> Result<()> {
        Ok(())
    }

    /// Undo `login`; safe to call any number of times
    fn logout(&self) {}

    /// Chart names in the repository
    async fn list_charts(&self) -> Result<Vec<String>>;

    /// Versions of a chart, highest first
    async fn list_versions(&self, name: &str) -> Result<Vec<String>>;
}

/// Create the repository for a reference and its resolved credential
///
/// The credentials file guard, when present, must outlive the repository.
/// Callers log in with `credential.login_auth()` before first use.
pub fn create_repository(
    reference: &SourceReference,
    credential: &Credential,
    indexes: &Arc<IndexCache>,
    registries: &RegistryClientFactory,
) -> Result<(Box<dyn ChartRepository>, Option<CredentialsFile>)> {
    let url = reference.normalized_url()?;

    match reference.kind() {
        RepositoryKind::Index => {
            let client = SecureHttpClient::new(
                &url,
                credential,
                reference.timeout,
                reference.pass_credentials,
            )?;
            let repository = IndexRepository::new(url, client, indexes.clone());
            Ok((Box::new(repository), None))
        }
        RepositoryKind::Registry => {
            let (client, credentials_file) = registries.build(credential.requires_login())?;
            let repository = RegistryRepository::new(url, client)?;
            Ok((Box::new(repository), credentials_file))
        }
    }
}
