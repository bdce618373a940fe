//! In-process OCI registry for tests

use sha2::{Digest, Sha256};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::oci::media_types;
use crate::registry::RegistryClientFactory;

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// A registry speaking just enough of the distribution API to list tags
/// and pull Helm charts over plain HTTP
pub(crate) struct FakeRegistry {
    server: MockServer,
}

fn digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

impl FakeRegistry {
    pub(crate) async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;
        Self { server }
    }

    /// `host:port` of the registry
    pub(crate) fn host(&self) -> String {
        self.server.address().to_string()
    }

    /// `oci://` URL of a repository path on this registry
    pub(crate) fn url(&self, repository: &str) -> String {
        format!("oci://{}/{}", self.host(), repository)
    }

    /// Factory reaching this registry over plain HTTP
    pub(crate) fn factory(&self) -> RegistryClientFactory {
        RegistryClientFactory::new().with_plain_http([self.host()])
    }

    pub(crate) async fn tags(&self, repository: &str, tags: &[&str]) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{}/tags/list", repository)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": repository,
                "tags": tags,
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer 404 for every request under `repository`
    pub(crate) async fn missing(&self, repository: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{}/tags/list", repository)))
            .respond_with(ResponseTemplate::new(404).set_body_string("repository not found"))
            .mount(&self.server)
            .await;
    }

    /// Serve `archive` as the content layer of `repository:tag`
    ///
    /// The manifest answers after `delay`.
    pub(crate) async fn chart(&self, repository: &str, tag: &str, archive: &[u8], delay: Duration) {
        let config = b"{}".to_vec();
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {
                "mediaType": media_types::HELM_CONFIG,
                "digest": digest(&config),
                "size": config.len(),
            },
            "layers": [{
                "mediaType": media_types::HELM_CONTENT,
                "digest": digest(archive),
                "size": archive.len(),
            }],
        });
        let manifest = serde_json::to_vec(&manifest).unwrap_or_default();

        Mock::given(method("GET"))
            .and(path(format!("/v2/{}/manifests/{}", repository, tag)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(manifest, OCI_MANIFEST)
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;

        for blob in [config, archive.to_vec()] {
            Mock::given(method("GET"))
                .and(path(format!("/v2/{}/blobs/{}", repository, digest(&blob))))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(blob))
                .mount(&self.server)
                .await;
        }
    }
}
