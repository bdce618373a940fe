//! Repository index types
//!
//! Helm-compatible `index.yaml` format

use chartserve_core::VersionConstraint;
use chartserve_core::version::parse_lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{RepoError, Result};

/// Repository index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// When this index was generated
    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Chart versions indexed by chart name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartVersion>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Get all versions of a chart
    pub fn get(&self, name: &str) -> Option<&[ChartVersion]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Get a specific version of a chart (verbatim match)
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.version == version)
    }

    /// Best version of `name` for a constraint
    pub fn resolve(&self, name: &str, constraint: &VersionConstraint, repo: &str) -> Result<&ChartVersion> {
        let versions = self
            .entries
            .get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RepoError::ChartNotFound {
                name: name.to_string(),
                repo: repo.to_string(),
            })?;

        let selected = constraint
            .select(versions.iter().map(|e| e.version.as_str()))
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                constraint: constraint.to_string(),
                repo: repo.to_string(),
            })?;

        versions
            .iter()
            .find(|e| e.version == selected)
            .ok_or_else(|| RepoError::Other(format!("selected version {} vanished", selected)))
    }

    /// Chart names in sorted order
    pub fn chart_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Versions of a chart, highest first
    pub fn versions(&self, name: &str) -> Vec<String> {
        let mut versions: Vec<(Option<semver::Version>, String)> = self
            .entries
            .get(name)
            .map(|v| {
                v.iter()
                    .map(|e| (parse_lenient(&e.version), e.version.clone()))
                    .collect()
            })
            .unwrap_or_default();
        versions.sort_by(|(va, a), (vb, b)| vb.cmp(va).then_with(|| b.cmp(a)));
        versions.into_iter().map(|(_, v)| v).collect()
    }
}

/// Chart version entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// URLs to download the chart archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ChartVersion {
    /// Get the primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }
}
