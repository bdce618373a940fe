//! Chart source references
//!
//! A `SourceReference` describes one chart repository: where it lives, what
//! protocol it speaks, and how credentials for it are obtained. It is built
//! from configuration records and is never mutated once resolution starts.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{CoreError, Result};

/// URL scheme prefix of registry-based repositories
pub const OCI_SCHEME_PREFIX: &str = "oci://";

/// Default timeout for every outbound operation of one reference
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Repository kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepositoryKind {
    /// HTTP repository serving an index.yaml
    #[default]
    #[serde(rename = "default", alias = "index", alias = "http")]
    Index,

    /// OCI registry storing charts as tagged artifacts
    #[serde(rename = "oci", alias = "registry")]
    Registry,
}

impl RepositoryKind {
    /// Detect the repository kind from a URL scheme
    pub fn detect(url: &str) -> Result<Self> {
        if url.starts_with(OCI_SCHEME_PREFIX) {
            Ok(RepositoryKind::Registry)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Ok(RepositoryKind::Index)
        } else {
            Err(CoreError::InvalidReference {
                url: url.to_string(),
                reason: "URL must start with http://, https:// or oci://".to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::Index => "default",
            RepositoryKind::Registry => "oci",
        }
    }
}

/// Cloud provider used for registry auto-login
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// No provider integration
    #[default]
    #[serde(alias = "none")]
    Generic,
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Generic => "generic",
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a secret in the object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,

    /// Falls back to the store's default namespace when unset
    #[serde(default)]
    pub namespace: Option<String>,
}

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// A chart repository and the way to authenticate against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    /// Optional display name, only used in logs
    #[serde(default)]
    pub name: Option<String>,

    /// Repository URL (http(s):// or oci://)
    pub url: String,

    /// Repository kind (auto-detected from the URL when omitted)
    #[serde(default, rename = "type")]
    pub kind: Option<RepositoryKind>,

    /// Secret holding static credentials
    #[serde(default)]
    pub secret_ref: Option<SecretRef>,

    /// Cloud provider for auto-login
    #[serde(default)]
    pub provider: Provider,

    /// Bound for every outbound call made on behalf of this reference
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Send credentials to download URLs on other origins
    #[serde(default)]
    pub pass_credentials: bool,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl SourceReference {
    /// Create an anonymous reference, detecting the kind from the URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let kind = RepositoryKind::detect(&url)?;
        Ok(Self {
            name: None,
            url,
            kind: Some(kind),
            secret_ref: None,
            provider: Provider::Generic,
            timeout: DEFAULT_TIMEOUT,
            pass_credentials: false,
        })
    }

    pub fn with_kind(mut self, kind: RepositoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_secret(mut self, secret_ref: SecretRef) -> Self {
        self.secret_ref = Some(secret_ref);
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Effective repository kind
    pub fn kind(&self) -> RepositoryKind {
        match self.kind {
            Some(kind) => kind,
            None => RepositoryKind::detect(&self.url).unwrap_or_default(),
        }
    }

    pub fn is_registry(&self) -> bool {
        self.kind() == RepositoryKind::Registry
    }

    /// Name for log fields
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    /// Validate and normalize the URL
    ///
    /// Index URLs end with exactly one slash, registry URLs with none.
    /// Called before any network activity.
    pub fn normalized_url(&self) -> Result<String> {
        normalize_url(&self.url, self.kind())
    }

    /// Registry host (with port) of a registry-based reference
    pub fn registry_host(&self) -> Result<String> {
        let url = self.normalized_url()?;
        let parsed = Url::parse(&url).map_err(|e| CoreError::InvalidReference {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().ok_or_else(|| CoreError::InvalidReference {
            url: url.clone(),
            reason: "missing host".to_string(),
        })?;
        Ok(match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

/// Normalize a repository URL for the given kind
pub fn normalize_url(url: &str, kind: RepositoryKind) -> Result<String> {
    let invalid = |reason: &str| CoreError::InvalidReference {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if url.trim().is_empty() {
        return Err(invalid("URL is empty"));
    }

    let mut parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;

    match (parsed.scheme(), kind) {
        ("oci", RepositoryKind::Registry) => {
            if parsed.host_str().is_none_or(str::is_empty) {
                return Err(invalid("missing registry host"));
            }
            let path = parsed.path().trim_end_matches('/').to_string();
            parsed.set_path(&path);
            parsed.set_query(None);
            Ok(parsed.to_string())
        }
        ("http" | "https", RepositoryKind::Index) => {
            let path = format!("{}/", parsed.path().trim_end_matches('/'));
            parsed.set_path(&path);
            Ok(parsed.to_string())
        }
        ("http" | "https", RepositoryKind::Registry) => {
            Err(invalid("registry repositories must use the oci:// scheme"))
        }
        ("oci", RepositoryKind::Index) => {
            Err(invalid("oci:// URLs require a registry repository type"))
        }
        (scheme, _) => Err(invalid(&format!("unsupported scheme '{}'", scheme))),
    }
}
