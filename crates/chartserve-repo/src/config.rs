//! Source records and secret store configuration

use chartserve_core::SourceReference;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{RepoError, Result};

/// Where repository secrets are read from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SecretsConfig {
    /// No secret store; references with a `secretRef` fail to resolve
    #[default]
    None,

    /// Kubernetes Secrets via the ambient kubeconfig
    Kubernetes {
        #[serde(default = "default_namespace")]
        namespace: String,
    },

    /// Secret manifests in a local YAML file
    File {
        path: PathBuf,
        #[serde(default = "default_namespace")]
        namespace: String,
    },
}

pub fn default_namespace() -> String {
    "default".to_string()
}

/// Configured chart sources, keyed by normalized URL
///
/// Replaces a process-wide registry: built once at startup and handed to
/// whoever needs to look up a reference.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, SourceReference>,
}

impl SourceRegistry {
    /// Build from configuration records, validating every URL
    pub fn new(sources: impl IntoIterator<Item = SourceReference>) -> Result<Self> {
        let mut map = HashMap::new();
        for source in sources {
            let url = source.normalized_url()?;
            if map.contains_key(&url) {
                return Err(RepoError::InvalidConfig {
                    message: format!("duplicate source for {}", url),
                });
            }
            map.insert(url, source);
        }
        Ok(Self { sources: map })
    }

    /// Configured reference for a URL
    pub fn get(&self, url: &str) -> Option<&SourceReference> {
        let kind = chartserve_core::RepositoryKind::detect(url).ok()?;
        let normalized = chartserve_core::reference::normalize_url(url, kind).ok()?;
        self.sources.get(&normalized)
    }

    /// Configured reference, or an anonymous one for unknown URLs
    pub fn lookup(&self, url: &str) -> Result<SourceReference> {
        if let Some(source) = self.get(url) {
            return Ok(source.clone());
        }

        let reference = SourceReference::new(url)?;
        reference.normalized_url()?;
        tracing::debug!(url = %url, kind = reference.kind().as_str(), "using ad-hoc anonymous source");
        Ok(reference)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceReference> {
        self.sources.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartserve_core::{Provider, RepositoryKind, SecretRef};

    #[test]
    fn test_lookup_matches_normalized_url() {
        let source = SourceReference::new("oci://ghcr.io/org/charts/")
            .unwrap()
            .with_secret(SecretRef::new("ghcr"));
        let registry = SourceRegistry::new([source]).unwrap();

        let found = registry.lookup("oci://ghcr.io/org/charts").unwrap();
        assert_eq!(found.secret_ref, Some(SecretRef::new("ghcr")));
    }

    #[test]
    fn test_lookup_unknown_is_anonymous() {
        let registry = SourceRegistry::default();
        let found = registry.lookup("https://charts.example.com").unwrap();
        assert_eq!(found.kind(), RepositoryKind::Index);
        assert!(found.secret_ref.is_none());
        assert_eq!(found.provider, Provider::Generic);

        assert!(registry.lookup("ftp://charts.example.com").is_err());
    }

    #[test]
    fn test_duplicate_sources_rejected() {
        let a = SourceReference::new("https://charts.example.com").unwrap();
        let b = SourceReference::new("https://charts.example.com/").unwrap();
        assert!(SourceRegistry::new([a, b]).is_err());
    }

    #[test]
    fn test_invalid_source_rejected() {
        let bad = SourceReference::new("https://charts.example.com")
            .unwrap()
            .with_kind(RepositoryKind::Registry);
        assert!(matches!(
            SourceRegistry::new([bad]),
            Err(RepoError::Core(_))
        ));
    }

    #[test]
    fn test_secrets_config_yaml() {
        let config: SecretsConfig = serde_yaml::from_str("kind: kubernetes").unwrap();
        assert_eq!(
            config,
            SecretsConfig::Kubernetes {
                namespace: "default".into()
            }
        );

        let config: SecretsConfig =
            serde_yaml::from_str("kind: file\npath: /etc/chartserve/secrets.yaml\nnamespace: flux").unwrap();
        assert!(matches!(config, SecretsConfig::File { ref namespace, .. } if namespace == "flux"));
    }
}
