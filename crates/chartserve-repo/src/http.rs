//! Index-based repository implementation
//!
//! Supports traditional Helm-style HTTP repositories with index.yaml

use async_trait::async_trait;
use chartserve_core::{RepositoryKind, VersionConstraint};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

use crate::backend::ChartRepository;
use crate::credentials::{CachedResponse, SecureHttpClient};
use crate::error::{RepoError, Result};
use crate::index::RepositoryIndex;

/// Last index seen per repository, with its `ETag`
///
/// Shared by every `IndexRepository`; each resolution revalidates with
/// `If-None-Match`, so an unchanged index costs one 304.
#[derive(Default)]
pub struct IndexCache {
    entries: RwLock<HashMap<String, CachedIndex>>,
}

struct CachedIndex {
    etag: Option<String>,
    index: Arc<RepositoryIndex>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or revalidate the index at `index_url`
    pub async fn load(&self, index_url: &str, client: &SecureHttpClient) -> Result<Arc<RepositoryIndex>> {
        let (etag, cached) = {
            let entries = self.entries.read().await;
            match entries.get(index_url) {
                Some(entry) => (entry.etag.clone(), Some(entry.index.clone())),
                None => (None, None),
            }
        };

        let response = client
            .get_cached(index_url, etag.as_deref())
            .await
            .map_err(|e| match e {
                RepoError::HttpError { status: 404, .. } => RepoError::IndexNotFound {
                    url: index_url.to_string(),
                },
                other => other,
            })?;

        match response {
            CachedResponse::NotModified => {
                tracing::debug!(url = %index_url, "index not modified");
                cached.ok_or_else(|| RepoError::IndexNotFound {
                    url: index_url.to_string(),
                })
            }
            CachedResponse::Fresh { data, etag } => {
                let index = Arc::new(RepositoryIndex::from_bytes(&data)?);
                tracing::debug!(
                    url = %index_url,
                    charts = index.entries.len(),
                    etag = etag.as_deref().unwrap_or(""),
                    "fetched index"
                );
                self.entries.write().await.insert(
                    index_url.to_string(),
                    CachedIndex {
                        etag,
                        index: index.clone(),
                    },
                );
                Ok(index)
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Index-based repository client
pub struct IndexRepository {
    /// Normalized URL, always ending with `/`
    url: String,
    client: SecureHttpClient,
    indexes: Arc<IndexCache>,
}

impl IndexRepository {
    pub fn new(url: impl Into<String>, client: SecureHttpClient, indexes: Arc<IndexCache>) -> Self {
        Self {
            url: url.into(),
            client,
            indexes,
        }
    }

    pub fn index_url(&self) -> String {
        format!("{}index.yaml", self.url)
    }

    /// Current index, revalidated against the server
    pub async fn index(&self) -> Result<Arc<RepositoryIndex>> {
        self.indexes.load(&self.index_url(), &self.client).await
    }

    /// Absolute download URL of an index entry
    fn resolve_download_url(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        let base = Url::parse(&self.url)?;
        Ok(base.join(url)?.to_string())
    }
}

#[async_trait]
impl ChartRepository for IndexRepository {
    fn url(&self) -> &str {
        &self.url
    }

    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Index
    }

    async fn resolve_version(&self, name: &str, constraint: &VersionConstraint) -> Result<String> {
        let index = self.index().await?;
        let entry = index.resolve(name, constraint, &self.url)?;
        tracing::debug!(url = %self.url, chart = name, constraint = %constraint, version = %entry.version, "resolved version");
        Ok(entry.version.clone())
    }

    async fn download(&self, name: &str, version: &str) -> Result<Vec<u8>> {
        let index = self.index().await?;
        let entry = index
            .get_version(name, version)
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                constraint: version.to_string(),
                repo: self.url.clone(),
            })?;

        let url = entry.download_url().ok_or_else(|| RepoError::ChartNotFound {
            name: name.to_string(),
            repo: self.url.clone(),
        })?;
        let full_url = self.resolve_download_url(url)?;

        tracing::debug!(url = %full_url, chart = name, version, "downloading chart");
        let data = self.client.get_bytes(&full_url).await?;

        // Verify digest if present
        if let Some(expected_digest) = &entry.digest {
            let actual_digest = compute_digest(&data);
            if !digest_matches(expected_digest, &actual_digest) {
                return Err(RepoError::IntegrityCheckFailed {
                    name: name.to_string(),
                    expected: expected_digest.clone(),
                    actual: actual_digest,
                });
            }
        }

        Ok(data)
    }

    async fn list_charts(&self) -> Result<Vec<String>> {
        Ok(self.index().await?.chart_names())
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        let versions = self.index().await?.versions(name);
        if versions.is_empty() {
            return Err(RepoError::ChartNotFound {
                name: name.to_string(),
                repo: self.url.clone(),
            });
        }
        Ok(versions)
    }
}

/// Compute SHA256 digest of data
pub(crate) fn compute_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("sha256:{}", hex::encode(result))
}

/// Check if two digests match (supports various formats)
fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |digest: &str| {
        digest
            .trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}
