//! Server configuration file

use chartserve_core::SourceReference;
use chartserve_repo::cache::TracingSink;
use chartserve_repo::{
    ChartService, CredentialResolver, LoginManager, ProviderEndpoints, RegistryClientFactory, SecretsConfig,
    SourceRegistry, secrets,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::serve::FreshnessPolicy;

/// Address used when the configuration names none
pub const DEFAULT_LISTEN: &str = "0.0.0.0:4000";

/// Contents of `config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default)]
    pub freshness: FreshnessPolicy,

    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Cloud identity endpoint overrides
    #[serde(default)]
    pub login: ProviderEndpoints,

    /// Registry hosts reached over plain HTTP
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plain_http: Vec<String>,

    #[serde(default)]
    pub sources: Vec<SourceReference>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4000))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            freshness: FreshnessPolicy::default(),
            secrets: SecretsConfig::default(),
            login: ProviderEndpoints::default(),
            plain_http: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// `<config_dir>/chartserve/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chartserve").join("config.yaml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            ServerError::Config { message, .. } => ServerError::Config {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Load `path`, or the default location when it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| ServerError::Config {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Construct the chart service described by this configuration
    pub async fn build_service(&self) -> Result<ChartService> {
        let store = secrets::from_config(&self.secrets).await?;
        let login = LoginManager::new(&self.login)?;
        let sources = SourceRegistry::new(self.sources.iter().cloned())?;

        tracing::info!(
            sources = sources.len(),
            plain_http = self.plain_http.len(),
            "building chart service"
        );

        Ok(ChartService::new(sources, CredentialResolver::new(store, Arc::new(login)))
            .with_registry_factory(RegistryClientFactory::new().with_plain_http(self.plain_http.iter().cloned()))
            .with_cache_events(Arc::new(TracingSink)))
    }
}
