//! Registry-based repository implementation
//!
//! Charts are OCI artifacts tagged with their version. OCI tags cannot hold
//! `+`, so build metadata is written with `_` and read back as `+`.
//! NOTE: listing charts is NOT supported due to catalog API limitations across registries.

use async_trait::async_trait;
use chartserve_core::{RepositoryKind, VersionConstraint};
use chartserve_core::version::parse_lenient;
use oci_distribution::Reference;

use crate::backend::ChartRepository;
use crate::credentials::BasicAuth;
use crate::error::{RepoError, Result};
use crate::registry::RegistryClient;

/// Media types for Helm charts in OCI
pub mod media_types {
    /// Helm chart config
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    /// Helm chart content layer
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
    /// Helm chart provenance layer
    pub const HELM_PROVENANCE: &str = "application/vnd.cncf.helm.chart.provenance.v1.prov";
    /// Content layer written by early Helm 3 releases
    pub const LEGACY_CONTENT: &str = "application/tar+gzip";
}

/// Registry repository client
pub struct RegistryRepository {
    /// Normalized `oci://` URL without trailing slash
    url: String,
    /// Registry host with port, used as the login key
    host: String,
    client: RegistryClient,
}

impl RegistryRepository {
    pub fn new(url: impl Into<String>, client: RegistryClient) -> Result<Self> {
        let url = url.into();
        let base = url.trim_start_matches("oci://");
        let host = base
            .split('/')
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RepoError::InvalidOciReference {
                reference: url.clone(),
            })?
            .to_string();
        Ok(Self { url, host, client })
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Build an OCI reference from chart name and version
    ///
    /// oci://ghcr.io/myorg/charts + nginx@1.0.0+build -> ghcr.io/myorg/charts/nginx:1.0.0_build
    pub fn build_reference(&self, name: &str, version: &str) -> Result<Reference> {
        let base = self.url.trim_start_matches("oci://").trim_end_matches('/');
        let full_ref = format!("{}/{}:{}", base, name, version_to_tag(version));

        full_ref
            .parse::<Reference>()
            .map_err(|e| RepoError::InvalidOciReference {
                reference: format!("{}: {}", full_ref, e),
            })
    }

    async fn tags(&self, name: &str) -> Result<Vec<String>> {
        // The tag of the listing reference is ignored by the registry
        let reference = self.build_reference(name, "latest")?;
        let tags = self.client.list_tags(&reference).await.map_err(|e| match e {
            RepoError::OciManifestNotFound { .. } => RepoError::ChartNotFound {
                name: name.to_string(),
                repo: self.url.clone(),
            },
            other => other,
        })?;
        Ok(tags.iter().map(|t| tag_to_version(t)).collect())
    }
}

/// OCI tag for a chart version
pub fn version_to_tag(version: &str) -> String {
    version.replace('+', "_")
}

/// Chart version for an OCI tag
pub fn tag_to_version(tag: &str) -> String {
    tag.replace('_', "+")
}

#[async_trait]
impl ChartRepository for RegistryRepository {
    fn url(&self) -> &str {
        &self.url
    }

    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Registry
    }

    async fn resolve_version(&self, name: &str, constraint: &VersionConstraint) -> Result<String> {
        let versions = self.tags(name).await?;
        if versions.is_empty() {
            return Err(RepoError::ChartNotFound {
                name: name.to_string(),
                repo: self.url.clone(),
            });
        }

        let selected = constraint
            .select(versions.iter().map(String::as_str))
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                constraint: constraint.to_string(),
                repo: self.url.clone(),
            })?;

        tracing::debug!(url = %self.url, chart = name, constraint = %constraint, version = selected, "resolved version");
        Ok(selected.to_string())
    }

    async fn download(&self, name: &str, version: &str) -> Result<Vec<u8>> {
        let reference = self.build_reference(name, version)?;
        tracing::debug!(reference = %reference.whole(), "pulling chart");

        let layers = self
            .client
            .pull(
                &reference,
                &[
                    media_types::HELM_CONFIG,
                    media_types::HELM_CONTENT,
                    media_types::HELM_PROVENANCE,
                    media_types::LEGACY_CONTENT,
                ],
            )
            .await?;

        select_content_layer(layers).ok_or_else(|| RepoError::OciError {
            message: format!("No chart content layer found in {}", reference.whole()),
        })
    }

    async fn login(&self, auth: &BasicAuth) -> Result<()> {
        self.client.login(&self.host, auth)
    }

    fn logout(&self) {
        self.client.logout();
    }

    async fn list_charts(&self) -> Result<Vec<String>> {
        Err(RepoError::Unsupported {
            operation: "Listing charts",
            kind: "OCI",
        })
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        let mut versions: Vec<_> = self
            .tags(name)
            .await?
            .into_iter()
            .filter_map(|v| parse_lenient(&v).map(|parsed| (parsed, v)))
            .collect();
        if versions.is_empty() {
            return Err(RepoError::ChartNotFound {
                name: name.to_string(),
                repo: self.url.clone(),
            });
        }
        versions.sort_by(|(va, a), (vb, b)| vb.cmp(va).then_with(|| b.cmp(a)));
        Ok(versions.into_iter().map(|(_, v)| v).collect())
    }
}

/// The chart content layer, preferring the current media type
fn select_content_layer(layers: Vec<(String, Vec<u8>)>) -> Option<Vec<u8>> {
    let mut legacy = None;
    for (media_type, data) in layers {
        if media_type == media_types::HELM_CONTENT {
            return Some(data);
        }
        if media_type == media_types::LEGACY_CONTENT && legacy.is_none() {
            legacy = Some(data);
        }
    }
    legacy
}
