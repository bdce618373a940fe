//! Chart archives and their cached, unpacked form

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Component;
use tar::Archive;

use crate::error::{CoreError, Result};

/// Upper bound on the unpacked size of one archive
pub const MAX_UNPACKED_SIZE: u64 = 100 * 1024 * 1024;

/// Name of the metadata file at the root of every chart
pub const CHART_FILE: &str = "Chart.yaml";

/// Identity of one archive: repository URL, chart name, resolved version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub repository: String,
    pub name: String,
    pub version: String,
}

impl CacheKey {
    pub fn new(
        repository: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}@{}", self.repository, self.name, self.version)
    }
}

/// Parsed `Chart.yaml`
///
/// Only the fields surfaced in package views are modelled; everything is
/// optional so that sloppy third-party charts still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The unpacked contents of one chart archive
#[derive(Debug, Clone)]
pub struct CachedChart {
    pub key: CacheKey,

    /// Files relative to the chart root, ordered by name
    pub files: BTreeMap<String, Vec<u8>>,

    /// `Chart.yaml`, when present and parseable
    pub metadata: Option<ChartMetadata>,

    /// SHA-256 of the archive bytes (hex)
    pub digest: String,

    pub fetched_at: DateTime<Utc>,
}

impl CachedChart {
    /// Unpack a gzipped tarball
    ///
    /// The first path component (the chart directory) is stripped, so
    /// `nginx/templates/svc.yaml` is stored as `templates/svc.yaml`.
    pub fn from_archive(key: CacheKey, archive: &[u8]) -> Result<Self> {
        let digest = hex::encode(Sha256::digest(archive));
        let files = unpack(archive)?;

        let metadata = files.get(CHART_FILE).and_then(|data| {
            serde_yaml::from_slice::<ChartMetadata>(data)
                .map_err(|e| tracing::debug!(chart = %key.name, error = %e, "ignoring unparseable Chart.yaml"))
                .ok()
        });

        Ok(Self {
            key,
            files,
            metadata,
            digest,
            fetched_at: Utc::now(),
        })
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// File names in sorted order
    pub fn file_names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn unpack(archive: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut tar = Archive::new(GzDecoder::new(archive));
    let mut files = BTreeMap::new();
    let mut total: u64 = 0;

    for entry in tar.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if !kind.is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(CoreError::Archive {
                        message: format!("illegal path in archive: {}", path.display()),
                    });
                }
            }
        }
        // Files outside a chart directory carry no chart content
        if parts.len() < 2 {
            continue;
        }

        let size = entry.header().size()?;
        total = total.saturating_add(size);
        if total > MAX_UNPACKED_SIZE {
            return Err(CoreError::Archive {
                message: format!("archive exceeds {} bytes when unpacked", MAX_UNPACKED_SIZE),
            });
        }

        let mut data = Vec::with_capacity(size as usize);
        entry.read_to_end(&mut data)?;
        files.insert(parts[1..].join("/"), data);
    }

    if files.is_empty() {
        return Err(CoreError::Archive {
            message: "archive contains no chart files".to_string(),
        });
    }

    Ok(files)
}

/// Build a gzipped chart tarball with every file under `<root>/`
#[cfg(any(test, feature = "test-util"))]
pub fn pack_archive<'a, I>(root: &str, files: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::{Builder, Header};

    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for (name, content) in files {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, format!("{}/{}", root, name), content)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART_YAML: &str = "apiVersion: v2\nname: nginx\nversion: 1.2.3\nappVersion: \"1.25\"\nkeywords: [web]\n";

    fn key() -> CacheKey {
        CacheKey::new("https://charts.example.com/", "nginx", "1.2.3")
    }

    #[test]
    fn test_from_archive_strips_chart_directory() {
        let archive = pack_archive(
            "nginx",
            [
                ("Chart.yaml", CHART_YAML.as_bytes()),
                ("values.yaml", b"replicas: 1\n".as_slice()),
                ("templates/deployment.yaml", b"kind: Deployment\n".as_slice()),
            ],
        )
        .unwrap();

        let chart = CachedChart::from_archive(key(), &archive).unwrap();
        assert_eq!(
            chart.file_names(),
            vec!["Chart.yaml", "templates/deployment.yaml", "values.yaml"]
        );
        assert_eq!(chart.file("values.yaml"), Some(b"replicas: 1\n".as_slice()));
        assert_eq!(chart.digest, hex::encode(Sha256::digest(&archive)));

        let metadata = chart.metadata.unwrap();
        assert_eq!(metadata.name, "nginx");
        assert_eq!(metadata.app_version.as_deref(), Some("1.25"));
        assert_eq!(metadata.keywords, vec!["web"]);
    }

    #[test]
    fn test_unparseable_metadata_is_ignored() {
        let archive = pack_archive("broken", [("Chart.yaml", b"name: [unclosed".as_slice())]).unwrap();
        let chart = CachedChart::from_archive(key(), &archive).unwrap();
        assert!(chart.metadata.is_none());
        assert_eq!(chart.len(), 1);
    }

    #[test]
    fn test_empty_archive_rejected() {
        let archive = pack_archive("nginx", std::iter::empty()).unwrap();
        assert!(matches!(
            CachedChart::from_archive(key(), &archive),
            Err(CoreError::Archive { .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(CachedChart::from_archive(key(), b"definitely not gzip").is_err());
    }

    #[test]
    fn test_cache_key_identity() {
        let a = CacheKey::new("oci://ghcr.io/org", "app", "1.0.0");
        let b = CacheKey::new("oci://ghcr.io/org", "app", "1.0.1");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.to_string(), "oci://ghcr.io/org#app@1.0.0");
    }
}
