//! Registry client factory
//!
//! Every registry session gets its own client. When the session logs in, the
//! login is recorded in a private Docker config file that lives exactly as
//! long as the `CredentialsFile` guard returned next to the client.

use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::secrets::RegistryAuth;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tempfile::TempPath;

use crate::credentials::{BasicAuth, DockerConfig};
use crate::error::{RepoError, Result};

/// Builds registry clients
#[derive(Debug, Clone, Default)]
pub struct RegistryClientFactory {
    /// Registries reached over plain HTTP
    plain_http: Vec<String>,
    /// Directory for credentials files (system temp dir when unset)
    credentials_dir: Option<PathBuf>,
}

impl RegistryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plain_http(mut self, hosts: impl IntoIterator<Item = String>) -> Self {
        self.plain_http = hosts.into_iter().collect();
        self
    }

    pub fn with_credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = Some(dir.into());
        self
    }

    fn protocol(&self) -> ClientProtocol {
        if self.plain_http.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(self.plain_http.clone())
        }
    }

    /// Build a client, with a credentials file when a login will follow
    pub fn build(&self, login_required: bool) -> Result<(RegistryClient, Option<CredentialsFile>)> {
        let config = ClientConfig {
            protocol: self.protocol(),
            ..Default::default()
        };
        let client = Client::new(config);

        if !login_required {
            return Ok((RegistryClient::new(client, None), None));
        }

        let file = CredentialsFile::create(self.credentials_dir.as_deref())?;
        tracing::debug!(path = %file.path().display(), "created registry credentials file");
        let registry = RegistryClient::new(client, Some(file.path().to_path_buf()));
        Ok((registry, Some(file)))
    }
}

/// Temporary Docker config holding one session's registry login
///
/// Dropping the guard deletes the file. A failed deletion is logged, never
/// returned.
#[derive(Debug)]
pub struct CredentialsFile {
    path: Option<TempPath>,
}

impl CredentialsFile {
    fn create(dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chartserve-registry-").suffix(".json");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.path {
            Some(path) => &**path,
            None => Path::new(""),
        }
    }
}

impl Drop for CredentialsFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let removed = path.to_path_buf();
            match path.close() {
                Ok(()) => tracing::debug!(path = %removed.display(), "removed registry credentials file"),
                Err(e) => tracing::warn!(
                    path = %removed.display(),
                    error = %e,
                    "failed to remove registry credentials file"
                ),
            }
        }
    }
}

/// OCI client plus the login state of one session
pub struct RegistryClient {
    client: Client,
    auth: RwLock<Option<(String, BasicAuth)>>,
    credentials_file: Option<PathBuf>,
}

impl RegistryClient {
    fn new(client: Client, credentials_file: Option<PathBuf>) -> Self {
        Self {
            client,
            auth: RwLock::new(None),
            credentials_file,
        }
    }

    /// Record a login for `host`
    ///
    /// Credentials are checked by the registry on first use, not here.
    pub fn login(&self, host: &str, auth: &BasicAuth) -> Result<()> {
        if let Some(path) = &self.credentials_file {
            let config = DockerConfig::single(host, auth);
            std::fs::write(path, serde_json::to_vec(&config)?)?;
        }
        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = Some((host.to_string(), auth.clone()));
        tracing::debug!(host, username = %auth.username, "logged in to registry");
        Ok(())
    }

    /// Forget the login; a no-op when not logged in
    pub fn logout(&self) {
        let previous = self.auth.write().unwrap_or_else(PoisonError::into_inner).take();
        let Some((host, _)) = previous else {
            return;
        };

        if let Some(path) = &self.credentials_file {
            let cleared = serde_json::to_vec(&DockerConfig::default())
                .map_err(RepoError::from)
                .and_then(|data| std::fs::write(path, data).map_err(RepoError::from));
            if let Err(e) = cleared {
                tracing::warn!(host = %host, error = %e, "failed to clear registry login");
            }
        }
        tracing::debug!(host = %host, "logged out of registry");
    }

    pub fn is_logged_in(&self) -> bool {
        self.auth.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn credentials_file(&self) -> Option<&Path> {
        self.credentials_file.as_deref()
    }

    fn registry_auth(&self) -> RegistryAuth {
        match &*self.auth.read().unwrap_or_else(PoisonError::into_inner) {
            Some((_, auth)) => RegistryAuth::Basic(auth.username.clone(), auth.password.clone()),
            None => RegistryAuth::Anonymous,
        }
    }

    /// All tags of a repository
    pub async fn list_tags(&self, reference: &Reference) -> Result<Vec<String>> {
        let response = self
            .client
            .list_tags(reference, &self.registry_auth(), None, None)
            .await
            .map_err(|e| map_oci_error(reference, e))?;
        Ok(response.tags)
    }

    /// Pull an artifact and return its layers as (media type, data)
    pub async fn pull(&self, reference: &Reference, media_types: &[&str]) -> Result<Vec<(String, Vec<u8>)>> {
        let image = self
            .client
            .pull(reference, &self.registry_auth(), media_types.to_vec())
            .await
            .map_err(|e| map_oci_error(reference, e))?;

        Ok(image
            .layers
            .into_iter()
            .map(|layer| (layer.media_type, layer.data))
            .collect())
    }
}

fn map_oci_error(reference: &Reference, err: OciDistributionError) -> RepoError {
    match err {
        OciDistributionError::AuthenticationFailure(message) => RepoError::AuthFailed { message },
        OciDistributionError::UnauthorizedError { url } => RepoError::AuthRequired { url },
        OciDistributionError::ImageManifestNotFoundError(_) => RepoError::OciManifestNotFound {
            reference: reference.whole(),
        },
        OciDistributionError::RequestError(e) if e.is_timeout() => RepoError::Timeout {
            message: e.to_string(),
        },
        other => {
            let message = other.to_string();
            let lower = message.to_lowercase();
            if lower.contains("not found") || lower.contains("unknown") || lower.contains("404") {
                RepoError::OciManifestNotFound {
                    reference: reference.whole(),
                }
            } else {
                RepoError::OciError { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> BasicAuth {
        BasicAuth::new("bot", "s3cr3t")
    }

    #[test]
    fn test_anonymous_build_has_no_file() {
        let (client, file) = RegistryClientFactory::new().build(false).unwrap();
        assert!(file.is_none());
        assert!(client.credentials_file().is_none());
        assert!(!client.is_logged_in());
    }

    #[test]
    fn test_credentials_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RegistryClientFactory::new().with_credentials_dir(dir.path());

        let (client, file) = factory.build(true).unwrap();
        let file = file.unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(client.credentials_file(), Some(path.as_path()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        client.login("ghcr.io", &auth()).unwrap();
        let written: DockerConfig = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.credentials_for_host("ghcr.io"), Some(auth()));

        drop(client);
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_removed_even_if_login_fails() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RegistryClientFactory::new().with_credentials_dir(dir.path());
        let path = {
            let (_client, file) = factory.build(true).unwrap();
            file.unwrap().path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RegistryClientFactory::new().with_credentials_dir(dir.path());
        let (_client, file) = factory.build(true).unwrap();
        let file = file.unwrap();
        std::fs::remove_file(file.path()).unwrap();
        drop(file);
    }

    #[test]
    fn test_logout_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RegistryClientFactory::new().with_credentials_dir(dir.path());
        let (client, file) = factory.build(true).unwrap();

        client.logout();
        client.login("ghcr.io", &auth()).unwrap();
        assert!(client.is_logged_in());
        assert!(matches!(client.registry_auth(), RegistryAuth::Basic(..)));

        client.logout();
        client.logout();
        assert!(!client.is_logged_in());
        assert!(matches!(client.registry_auth(), RegistryAuth::Anonymous));

        let path = file.as_ref().unwrap().path();
        let written: DockerConfig = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert!(written.auths.is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let reference: Reference = "ghcr.io/org/charts/nginx:1.0.0".parse().unwrap();

        let err = map_oci_error(&reference, OciDistributionError::AuthenticationFailure("denied".into()));
        assert_eq!(err.kind(), crate::error::ErrorKind::Authentication);

        let err = map_oci_error(&reference, OciDistributionError::ImageManifestNotFoundError("x".into()));
        assert!(err.is_not_found());

        let err = map_oci_error(&reference, OciDistributionError::GenericError(Some("boom".into())));
        assert!(matches!(err, RepoError::OciError { .. }));
    }
}
