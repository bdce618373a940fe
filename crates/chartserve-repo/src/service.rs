//! Chart service
//!
//! Composes the whole pipeline for one request: source lookup, credential
//! resolution, repository construction, version resolution and the cached
//! download. Constructed once and shared; holds no global state.

use chartserve_core::{CacheKey, CachedChart, SourceReference, VersionConstraint};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{ChartRepository, create_repository};
use crate::cache::{CacheEventSink, ChartCache};
use crate::config::SourceRegistry;
use crate::credentials::CredentialResolver;
use crate::error::{RepoError, Result};
use crate::http::IndexCache;
use crate::registry::{CredentialsFile, RegistryClientFactory};
use crate::verify::{ChartVerifier, NoopVerifier};

/// A chart resolved and loaded through the cache
#[derive(Debug, Clone)]
pub struct ResolvedChart {
    pub reference: SourceReference,
    pub version: String,
    pub chart: Arc<CachedChart>,
}

/// Entry point for resolving and loading charts
pub struct ChartService {
    sources: SourceRegistry,
    resolver: CredentialResolver,
    registries: RegistryClientFactory,
    indexes: Arc<IndexCache>,
    cache: ChartCache,
    verifier: Arc<dyn ChartVerifier>,
}

/// One repository opened for one request
///
/// Dropping it logs out, then deletes the credentials file.
struct Session {
    reference: SourceReference,
    repository: Box<dyn ChartRepository>,
    _credentials_file: Option<CredentialsFile>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.repository.logout();
    }
}

impl Session {
    /// Run `operation` within the reference timeout
    async fn bounded<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        bounded(self.reference.timeout, operation, self.repository.url(), future).await
    }
}

async fn bounded<T, F>(timeout: Duration, operation: &str, url: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| RepoError::Timeout {
            message: format!("{} on {} exceeded {:?}", operation, url, timeout),
        })?
}

impl ChartService {
    pub fn new(sources: SourceRegistry, resolver: CredentialResolver) -> Self {
        Self {
            sources,
            resolver,
            registries: RegistryClientFactory::default(),
            indexes: Arc::new(IndexCache::new()),
            cache: ChartCache::new(),
            verifier: Arc::new(NoopVerifier),
        }
    }

    pub fn with_registry_factory(mut self, registries: RegistryClientFactory) -> Self {
        self.registries = registries;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ChartVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_cache_events(mut self, sink: Arc<dyn CacheEventSink>) -> Self {
        self.cache = ChartCache::with_sink(sink);
        self
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn cache(&self) -> &ChartCache {
        &self.cache
    }

    async fn open(&self, url: &str) -> Result<Session> {
        let reference = self.sources.lookup(url)?;
        let normalized = reference.normalized_url()?;

        let credential = bounded(
            reference.timeout,
            "credential resolution",
            &normalized,
            self.resolver.resolve(&reference),
        )
        .await?;
        tracing::debug!(
            url = %normalized,
            source = reference.display_name(),
            credential = credential.describe(),
            "opening repository"
        );

        let (repository, credentials_file) =
            create_repository(&reference, &credential, &self.indexes, &self.registries)?;
        let session = Session {
            reference,
            repository,
            _credentials_file: credentials_file,
        };

        if let Some(auth) = credential.login_auth() {
            session.bounded("login", session.repository.login(auth)).await?;
        }
        Ok(session)
    }

    /// Version of `name` selected by `constraint`
    pub async fn resolve_version(&self, url: &str, name: &str, constraint: &str) -> Result<String> {
        let constraint = VersionConstraint::parse(constraint)?;
        let session = self.open(url).await?;
        session
            .bounded("version resolution", session.repository.resolve_version(name, &constraint))
            .await
    }

    /// Resolve, download (at most once per version) and unpack a chart
    pub async fn get_chart(&self, url: &str, name: &str, constraint: &str) -> Result<ResolvedChart> {
        let constraint = VersionConstraint::parse(constraint)?;
        let session = Arc::new(self.open(url).await?);

        let version = session
            .bounded("version resolution", session.repository.resolve_version(name, &constraint))
            .await?;
        let key = CacheKey::new(session.repository.url(), name, version.clone());

        let fetch = {
            let session = session.clone();
            let verifier = self.verifier.clone();
            let key = key.clone();
            move || {
                async move {
                    let archive = session
                        .bounded("download", session.repository.download(&key.name, &key.version))
                        .await?;
                    verifier.verify(&key, &archive)?;
                    tracing::info!(
                        url = %key.repository,
                        chart = %key.name,
                        version = %key.version,
                        bytes = archive.len(),
                        "downloaded chart"
                    );
                    Ok(archive)
                }
                .boxed()
            }
        };

        let chart = self.cache.get(key, fetch).await?;
        Ok(ResolvedChart {
            reference: session.reference.clone(),
            version,
            chart,
        })
    }

    /// Resolve and download the verified archive, bypassing the chart cache
    pub async fn fetch_archive(&self, url: &str, name: &str, constraint: &str) -> Result<(String, Vec<u8>)> {
        let constraint = VersionConstraint::parse(constraint)?;
        let session = self.open(url).await?;

        let version = session
            .bounded("version resolution", session.repository.resolve_version(name, &constraint))
            .await?;
        let archive = session
            .bounded("download", session.repository.download(name, &version))
            .await?;

        let key = CacheKey::new(session.repository.url(), name, version.clone());
        self.verifier.verify(&key, &archive)?;
        Ok((version, archive))
    }

    pub async fn list_charts(&self, url: &str) -> Result<Vec<String>> {
        let session = self.open(url).await?;
        session
            .bounded("chart listing", session.repository.list_charts())
            .await
    }

    pub async fn list_versions(&self, url: &str, name: &str) -> Result<Vec<String>> {
        let session = self.open(url).await?;
        session
            .bounded("version listing", session.repository.list_versions(name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::BasicAuth;
    use crate::login::LoginManager;
    use crate::secrets::{SecretData, StaticSecretStore};
    use crate::testing::FakeRegistry;
    use crate::verify::PinnedDigestVerifier;
    use chartserve_core::SecretRef;
    use chartserve_core::chart::pack_archive;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INDEX: &str = r#"
apiVersion: v1
entries:
  nginx:
    - name: nginx
      version: "15.0.0"
      urls: [nginx-15.0.0.tgz]
    - name: nginx
      version: "14.1.0"
      urls: [nginx-14.1.0.tgz]
"#;

    fn archive(version: &str) -> Vec<u8> {
        let chart_yaml = format!("apiVersion: v2\nname: nginx\nversion: {}\n", version);
        pack_archive(
            "nginx",
            [
                ("Chart.yaml", chart_yaml.as_bytes()),
                ("values.yaml", b"replicas: 1\n".as_slice()),
            ],
        )
        .unwrap()
    }

    async fn upstream(downloads: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nginx-15.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive("15.0.0")))
            .expect(downloads)
            .mount(&server)
            .await;
        server
    }

    fn service(sources: Vec<SourceReference>, store: StaticSecretStore) -> ChartService {
        let resolver = CredentialResolver::new(Arc::new(store), Arc::new(LoginManager::empty()));
        ChartService::new(SourceRegistry::new(sources).unwrap(), resolver)
    }

    #[tokio::test]
    async fn test_get_chart_downloads_once() {
        let server = upstream(1).await;
        let service = service(vec![], StaticSecretStore::new("default"));
        let url = server.uri();

        let (a, b) = tokio::join!(
            service.get_chart(&url, "nginx", ""),
            service.get_chart(&url, "nginx", "^15"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.version, "15.0.0");
        assert!(Arc::ptr_eq(&a.chart, &b.chart));
        assert_eq!(a.chart.metadata.as_ref().unwrap().version, "15.0.0");
        assert_eq!(a.chart.key.repository, format!("{}/", url));

        let c = service.get_chart(&url, "nginx", "15.0.0").await.unwrap();
        assert!(Arc::ptr_eq(&a.chart, &c.chart));
        assert_eq!(service.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_archive_bypasses_cache() {
        let server = upstream(2).await;
        let service = service(vec![], StaticSecretStore::new("default"));

        for _ in 0..2 {
            let (version, data) = service
                .fetch_archive(&server.uri(), "nginx", "15.0.0")
                .await
                .unwrap();
            assert_eq!(version, "15.0.0");
            assert_eq!(data, archive("15.0.0"));
        }
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_secret_credentials_reach_upstream() {
        let server = MockServer::start().await;
        let auth = BasicAuth::new("alice", "hunter2");
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .and(header("Authorization", auth.header_value().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = StaticSecretStore::new("default").with_secret(
            SecretData::new("creds")
                .with("username", "alice")
                .with("password", "hunter2"),
        );
        let source = SourceReference::new(server.uri())
            .unwrap()
            .with_secret(SecretRef::new("creds"));

        let configured = service(vec![source], store);
        assert_eq!(
            configured.list_versions(&server.uri(), "nginx").await.unwrap(),
            vec!["15.0.0", "14.1.0"]
        );

        let anonymous = service(vec![], StaticSecretStore::new("default"));
        let err = anonymous.list_charts(&server.uri()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_before_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .expect(0)
            .mount(&server)
            .await;

        let source = SourceReference::new(server.uri())
            .unwrap()
            .with_secret(SecretRef::new("absent"));
        let service = service(vec![source], StaticSecretStore::new("default"));

        let err = service.get_chart(&server.uri(), "nginx", "").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_rejected_archive_is_not_cached() {
        let server = upstream(2).await;
        let verifier = PinnedDigestVerifier::new().pin("nginx", "15.0.0", "0".repeat(64));
        let service = service(vec![], StaticSecretStore::new("default")).with_verifier(Arc::new(verifier));

        for _ in 0..2 {
            let err = service.get_chart(&server.uri(), "nginx", "").await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        }
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_early() {
        let service = service(vec![], StaticSecretStore::new("default"));

        let err = service.get_chart("ftp://example.com", "nginx", "").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        let err = service
            .get_chart("https://charts.example.com", "nginx", ">>1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_timeout_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(INDEX)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let source = SourceReference::new(server.uri())
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let service = service(vec![source], StaticSecretStore::new("default"));

        let err = service.resolve_version(&server.uri(), "nginx", "").await.unwrap_err();
        assert!(err.is_timeout());
    }

    fn credential_files(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("chartserve-registry-"))
            .collect()
    }

    #[tokio::test]
    async fn test_abandoned_request_removes_credentials_file() {
        let registry = FakeRegistry::start().await;
        registry.tags("charts/nginx", &["15.0.0"]).await;
        registry
            .chart("charts/nginx", "15.0.0", &archive("15.0.0"), Duration::from_secs(30))
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = StaticSecretStore::new("default").with_secret(
            SecretData::new("registry")
                .with("username", "bot")
                .with("password", "s3cr3t"),
        );
        let source = SourceReference::new(registry.url("charts"))
            .unwrap()
            .with_secret(SecretRef::new("registry"))
            .with_timeout(Duration::from_secs(1));
        let service = service(vec![source], store)
            .with_registry_factory(registry.factory().with_credentials_dir(dir.path()));

        let charts_url = registry.url("charts");
        let request = service.get_chart(&charts_url, "nginx", "");
        assert!(tokio::time::timeout(Duration::from_millis(500), request).await.is_err());

        // The abandoned download still ends at the source timeout
        let mut left = credential_files(dir.path());
        for _ in 0..50 {
            if left.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            left = credential_files(dir.path());
        }
        assert!(left.is_empty(), "credentials files left behind: {:?}", left);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_get_chart_from_registry_with_login() {
        let registry = FakeRegistry::start().await;
        registry.tags("charts/nginx", &["15.0.0", "14.1.0"]).await;
        registry
            .chart("charts/nginx", "15.0.0", &archive("15.0.0"), Duration::ZERO)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = StaticSecretStore::new("default").with_secret(
            SecretData::new("registry")
                .with("username", "bot")
                .with("password", "s3cr3t"),
        );
        let source = SourceReference::new(registry.url("charts"))
            .unwrap()
            .with_secret(SecretRef::new("registry"));
        let service = service(vec![source], store)
            .with_registry_factory(registry.factory().with_credentials_dir(dir.path()));

        let resolved = service.get_chart(&registry.url("charts"), "nginx", "^15").await.unwrap();
        assert_eq!(resolved.version, "15.0.0");
        assert_eq!(resolved.chart.file("values.yaml"), Some(b"replicas: 1\n".as_slice()));
        assert!(credential_files(dir.path()).is_empty());
    }
}
