//! Credential resolution and credential-aware HTTP
//!
//! Resolution order for one source reference, first match wins:
//! 1. a configured secret, decoded into static credentials
//! 2. cloud auto-login, for registry references with a provider
//! 3. anonymous access
//!
//! Security notes:
//! - Credentials are only sent to the repository's own origin unless the
//!   reference opts into `passCredentials`
//! - Redirects are followed manually so that a cross-origin hop never
//!   carries an `Authorization` header

use base64::Engine;
use chartserve_core::{Provider, SourceReference};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{RepoError, Result};
use crate::login::{LoginManager, LoginOutcome, decode_basic_token};
use crate::secrets::{SecretData, SecretStore};

/// Username/password pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value
    pub fn header_value(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", encoded)
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// PEM-encoded TLS material
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub ca: Option<Vec<u8>>,
}

impl TlsMaterial {
    pub fn is_empty(&self) -> bool {
        self.cert.is_none() && self.key.is_none() && self.ca.is_none()
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert", &self.cert.is_some())
            .field("key", &self.key.is_some())
            .field("ca", &self.ca.is_some())
            .finish()
    }
}

/// Credentials decoded from a secret
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCredential {
    pub basic: Option<BasicAuth>,
    pub tls: TlsMaterial,
}

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";
const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
const CERT_KEYS: [&str; 2] = ["certFile", "tls.crt"];
const KEY_KEYS: [&str; 2] = ["keyFile", "tls.key"];
const CA_KEYS: [&str; 2] = ["caFile", "ca.crt"];

impl StaticCredential {
    /// Decode a secret for the given repository host
    pub fn from_secret(secret: &SecretData, host: &str) -> Result<Self> {
        let invalid = |message: &str| RepoError::InvalidSecret {
            name: secret.name.clone(),
            message: message.to_string(),
        };

        let username = secret.get_str(USERNAME_KEY)?.filter(|s| !s.is_empty());
        let password = secret.get_str(PASSWORD_KEY)?.filter(|s| !s.is_empty());
        let mut basic = match (username, password) {
            (Some(u), Some(p)) => Some(BasicAuth::new(u, p)),
            (None, None) => None,
            _ => return Err(invalid("username and password must be set together")),
        };

        if basic.is_none() {
            if let Some(raw) = secret.get(DOCKER_CONFIG_KEY) {
                let config: DockerConfig = serde_json::from_slice(raw)
                    .map_err(|e| invalid(&format!("invalid {}: {}", DOCKER_CONFIG_KEY, e)))?;
                basic = Some(config.credentials_for_host(host).ok_or_else(|| {
                    invalid(&format!("{} has no entry for {}", DOCKER_CONFIG_KEY, host))
                })?);
            }
        }

        let pick = |keys: [&str; 2]| keys.iter().find_map(|k| secret.get(k).map(<[u8]>::to_vec));
        let tls = TlsMaterial {
            cert: pick(CERT_KEYS),
            key: pick(KEY_KEYS),
            ca: pick(CA_KEYS),
        };
        if tls.cert.is_some() != tls.key.is_some() {
            return Err(invalid("client certificate and key must be set together"));
        }

        if basic.is_none() && tls.is_empty() {
            return Err(invalid("no usable credentials"));
        }

        Ok(Self { basic, tls })
    }
}

/// The credential selected for one reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credential {
    /// Anonymous access
    #[default]
    None,

    /// Material from a configured secret
    Static(StaticCredential),

    /// Delegated cloud login
    CloudAuto { provider: Provider, auth: BasicAuth },
}

impl Credential {
    /// Username/password to log in to a registry with, if any
    pub fn login_auth(&self) -> Option<&BasicAuth> {
        match self {
            Credential::None => None,
            Credential::Static(s) => s.basic.as_ref(),
            Credential::CloudAuto { auth, .. } => Some(auth),
        }
    }

    pub fn tls(&self) -> Option<&TlsMaterial> {
        match self {
            Credential::Static(s) if !s.tls.is_empty() => Some(&s.tls),
            _ => None,
        }
    }

    pub fn requires_login(&self) -> bool {
        self.login_auth().is_some()
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Credential::None => "anonymous",
            Credential::Static(_) => "secret",
            Credential::CloudAuto { .. } => "cloud",
        }
    }
}

/// Picks the credential for a source reference
pub struct CredentialResolver {
    secrets: Arc<dyn SecretStore>,
    login: Arc<LoginManager>,
}

impl CredentialResolver {
    pub fn new(secrets: Arc<dyn SecretStore>, login: Arc<LoginManager>) -> Self {
        Self { secrets, login }
    }

    pub async fn resolve(&self, reference: &SourceReference) -> Result<Credential> {
        let url = reference.normalized_url()?;

        if let Some(secret_ref) = &reference.secret_ref {
            let secret = self.secrets.get(secret_ref).await?;
            let host = reference.registry_host()?;
            let credential = StaticCredential::from_secret(&secret, &host)?;
            tracing::debug!(url = %url, secret = %secret_ref.name, "using credentials from secret");
            return Ok(Credential::Static(credential));
        }

        if reference.is_registry() && reference.provider != Provider::Generic {
            let host = reference.registry_host()?;
            match self
                .login
                .login(reference.provider, &host, reference.timeout)
                .await?
            {
                LoginOutcome::Authenticated(auth) => {
                    return Ok(Credential::CloudAuto {
                        provider: reference.provider,
                        auth,
                    });
                }
                LoginOutcome::Unconfigured => {
                    tracing::debug!(
                        url = %url,
                        provider = %reference.provider,
                        "provider unconfigured, continuing anonymously"
                    );
                }
            }
        }

        Ok(Credential::None)
    }
}

/// Docker config.json format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl DockerConfig {
    /// Config holding a single registry login
    pub fn single(host: &str, auth: &BasicAuth) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", auth.username, auth.password));
        let mut auths = HashMap::new();
        auths.insert(
            host.to_string(),
            DockerAuth {
                auth: Some(encoded),
                ..Default::default()
            },
        );
        Self { auths }
    }

    /// Credentials for a registry host (with or without scheme/port)
    pub fn credentials_for_host(&self, host: &str) -> Option<BasicAuth> {
        let candidates = [
            host.to_string(),
            format!("https://{}", host),
            format!("http://{}", host),
        ];

        for candidate in &candidates {
            if let Some(auth) = self.auths.get(candidate) {
                if let (Some(u), Some(p)) = (&auth.username, &auth.password) {
                    return Some(BasicAuth::new(u.as_str(), p.as_str()));
                }
                if let Some(decoded) = auth.auth.as_deref().and_then(decode_basic_token) {
                    return Some(decoded);
                }
            }
        }
        None
    }
}

/// Same scheme, host and port
pub fn same_origin(url1: &str, url2: &str) -> bool {
    match (Url::parse(url1), Url::parse(url2)) {
        (Ok(u1), Ok(u2)) => {
            u1.scheme() == u2.scheme()
                && u1.host() == u2.host()
                && u1.port_or_known_default() == u2.port_or_known_default()
        }
        _ => false,
    }
}

const MAX_REDIRECTS: u32 = 10;

/// HTTP client that scopes credentials to one origin
pub struct SecureHttpClient {
    client: reqwest::Client,
    origin: String,
    auth: Option<BasicAuth>,
    pass_credentials: bool,
}

impl SecureHttpClient {
    /// Client for `origin` carrying the given credential
    pub fn new(
        origin: &str,
        credential: &Credential,
        timeout: Duration,
        pass_credentials: bool,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout);

        if let Some(tls) = credential.tls() {
            if let Some(ca) = &tls.ca {
                let cert = reqwest::Certificate::from_pem(ca).map_err(|e| {
                    RepoError::InvalidConfig {
                        message: format!("invalid CA certificate: {}", e),
                    }
                })?;
                builder = builder.add_root_certificate(cert);
            }
            if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
                let mut pem = cert.clone();
                pem.push(b'\n');
                pem.extend_from_slice(key);
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                    RepoError::InvalidConfig {
                        message: format!("invalid client certificate: {}", e),
                    }
                })?;
                builder = builder.identity(identity);
            }
        }

        let client = builder.build().map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            origin: origin.to_string(),
            auth: credential.login_auth().cloned(),
            pass_credentials,
        })
    }

    /// Anonymous client
    pub fn public(timeout: Duration) -> Result<Self> {
        Self::new("", &Credential::None, timeout, false)
    }

    fn auth_for(&self, url: &str) -> Option<&BasicAuth> {
        let auth = self.auth.as_ref()?;
        if self.pass_credentials || same_origin(&self.origin, url) {
            Some(auth)
        } else {
            tracing::debug!(url, "not forwarding credentials to foreign origin");
            None
        }
    }

    async fn send(&self, url: &str, etag: Option<&str>) -> Result<reqwest::Response> {
        let mut current_url = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(&current_url);
            if let Some(etag) = etag {
                request = request.header("If-None-Match", etag);
            }
            if let Some(auth) = self.auth_for(&current_url) {
                request = request.header("Authorization", auth.header_value());
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() && status != reqwest::StatusCode::NOT_MODIFIED {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RepoError::NetworkError {
                        message: format!("Too many redirects (max {})", MAX_REDIRECTS),
                    });
                }

                let location = response
                    .headers()
                    .get("Location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;

                let base = Url::parse(&current_url)?;
                current_url = base.join(location)?.to_string();
                continue;
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                return Err(RepoError::RateLimited { retry_after });
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RepoError::AuthRequired { url: current_url });
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(RepoError::AuthFailed {
                    message: format!("Access denied to {}", current_url),
                });
            }
            if status == reqwest::StatusCode::NOT_MODIFIED {
                return Ok(response);
            }
            if !status.is_success() {
                return Err(RepoError::HttpError {
                    status: status.as_u16(),
                    message: format!("Request to {} failed", current_url),
                });
            }

            return Ok(response);
        }
    }

    /// Fetch bytes from URL
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(url, None).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Fetch with ETag revalidation
    pub async fn get_cached(&self, url: &str, etag: Option<&str>) -> Result<CachedResponse> {
        let response = self.send(url, etag).await?;
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(CachedResponse::NotModified);
        }

        let new_etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().await?;

        Ok(CachedResponse::Fresh {
            data: bytes.to_vec(),
            etag: new_etag,
        })
    }
}

/// Response from a conditional request
#[derive(Debug)]
pub enum CachedResponse {
    /// Content hasn't changed, use cached version
    NotModified,
    /// Fresh content with optional new ETag
    Fresh { data: Vec<u8>, etag: Option<String> },
}
