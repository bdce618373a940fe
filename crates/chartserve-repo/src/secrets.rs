//! Secret stores
//!
//! Static repository credentials live in Kubernetes Secrets. The resolver
//! only sees the `SecretStore` trait; production uses the cluster API, local
//! runs and tests use manifests loaded into memory.

use async_trait::async_trait;
use chartserve_core::SecretRef;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::Api;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::config::SecretsConfig;
use crate::error::{RepoError, Result};

/// Decoded key/value data of one secret
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretData {
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl SecretData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Value as UTF-8 text, trimmed of surrounding whitespace
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.clone())
                .map(|s| Some(s.trim().to_string()))
                .map_err(|_| RepoError::InvalidSecret {
                    name: self.name.clone(),
                    message: format!("key '{}' is not valid UTF-8", key),
                }),
        }
    }

    /// Convert a Kubernetes Secret, merging `stringData` over `data`
    pub fn from_secret(secret: &Secret) -> Self {
        let mut data = BTreeMap::new();
        if let Some(binary) = &secret.data {
            for (key, value) in binary {
                data.insert(key.clone(), value.0.clone());
            }
        }
        if let Some(strings) = &secret.string_data {
            for (key, value) in strings {
                data.insert(key.clone(), value.clone().into_bytes());
            }
        }
        Self {
            name: secret.metadata.name.clone().unwrap_or_default(),
            data,
        }
    }
}

impl std::fmt::Debug for SecretData {
    // Never print secret values
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretData")
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Read access to repository secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Namespace used when a reference does not name one
    fn default_namespace(&self) -> &str;

    /// Fetch one secret
    async fn get(&self, secret: &SecretRef) -> Result<SecretData>;

    fn namespace_of<'a>(&'a self, secret: &'a SecretRef) -> &'a str {
        secret
            .namespace
            .as_deref()
            .unwrap_or_else(|| self.default_namespace())
    }
}

/// Build the store described by configuration
pub async fn from_config(config: &SecretsConfig) -> Result<std::sync::Arc<dyn SecretStore>> {
    Ok(match config {
        SecretsConfig::None => std::sync::Arc::new(StaticSecretStore::new("default")),
        SecretsConfig::Kubernetes { namespace } => {
            std::sync::Arc::new(KubeSecretStore::new(namespace.clone()).await?)
        }
        SecretsConfig::File { path, namespace } => {
            std::sync::Arc::new(StaticSecretStore::from_manifests(path, namespace.clone())?)
        }
    })
}

/// Secrets read from the Kubernetes API
pub struct KubeSecretStore {
    client: Client,
    default_namespace: String,
}

impl KubeSecretStore {
    /// Connect using the ambient kubeconfig or in-cluster configuration
    pub async fn new(default_namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, default_namespace))
    }

    /// Create with an existing client
    pub fn with_client(client: Client, default_namespace: impl Into<String>) -> Self {
        Self {
            client,
            default_namespace: default_namespace.into(),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    async fn get(&self, secret: &SecretRef) -> Result<SecretData> {
        let namespace = self.namespace_of(secret);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let object = api
            .get(&secret.name)
            .await
            .map_err(|e| RepoError::SecretUnavailable {
                namespace: namespace.to_string(),
                name: secret.name.clone(),
                message: e.to_string(),
            })?;

        Ok(SecretData::from_secret(&object))
    }
}

/// In-memory secrets, keyed by (namespace, name)
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    default_namespace: String,
    secrets: HashMap<(String, String), SecretData>,
}

impl StaticSecretStore {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            secrets: HashMap::new(),
        }
    }

    /// Add a secret in the default namespace
    pub fn with_secret(mut self, secret: SecretData) -> Self {
        let namespace = self.default_namespace.clone();
        self.insert(namespace, secret);
        self
    }

    pub fn insert(&mut self, namespace: impl Into<String>, secret: SecretData) {
        self.secrets
            .insert((namespace.into(), secret.name.clone()), secret);
    }

    /// Load every `Secret` document from a multi-document YAML file
    pub fn from_manifests(path: &Path, default_namespace: impl Into<String>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, default_namespace)
    }

    pub fn from_yaml(content: &str, default_namespace: impl Into<String>) -> Result<Self> {
        use serde::Deserialize;

        let mut store = Self::new(default_namespace);
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            if value.get("kind").and_then(|k| k.as_str()) != Some("Secret") {
                continue;
            }

            let secret: Secret = serde_yaml::from_value(value)?;
            let namespace = secret
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| store.default_namespace.clone());
            let data = SecretData::from_secret(&secret);
            if data.name.is_empty() {
                return Err(RepoError::InvalidConfig {
                    message: "secret manifest without metadata.name".to_string(),
                });
            }
            store.insert(namespace, data);
        }

        tracing::debug!(count = store.secrets.len(), "loaded secret manifests");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    async fn get(&self, secret: &SecretRef) -> Result<SecretData> {
        let namespace = self.namespace_of(secret).to_string();
        self.secrets
            .get(&(namespace.clone(), secret.name.clone()))
            .cloned()
            .ok_or_else(|| RepoError::SecretUnavailable {
                namespace,
                name: secret.name.clone(),
                message: "secret not found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFESTS: &str = r#"
apiVersion: v1
kind: Secret
metadata:
  name: ghcr
  namespace: flux-system
type: Opaque
data:
  username: Ym90
  password: czNjcjN0
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: ignored
---
apiVersion: v1
kind: Secret
metadata:
  name: plain
stringData:
  username: alice
  password: hunter2
---
"#;

    #[tokio::test]
    async fn test_manifests_are_decoded() {
        let store = StaticSecretStore::from_yaml(MANIFESTS, "default").unwrap();
        assert_eq!(store.len(), 2);

        let secret = store
            .get(&SecretRef::new("ghcr").in_namespace("flux-system"))
            .await
            .unwrap();
        assert_eq!(secret.get("username"), Some(b"bot".as_slice()));
        assert_eq!(secret.get_str("password").unwrap().as_deref(), Some("s3cr3t"));

        let secret = store.get(&SecretRef::new("plain")).await.unwrap();
        assert_eq!(secret.get_str("username").unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let store = StaticSecretStore::new("default");
        let err = store.get(&SecretRef::new("nope")).await.unwrap_err();
        assert!(matches!(err, RepoError::SecretUnavailable { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Authentication);
    }

    #[test]
    fn test_debug_hides_values() {
        let secret = SecretData::new("creds").with("password", "hunter2");
        let printed = format!("{:?}", secret);
        assert!(printed.contains("password"));
        assert!(!printed.contains("hunter2"));
    }
}
