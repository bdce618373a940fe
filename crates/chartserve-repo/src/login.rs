//! Cloud provider auto-login for OCI registries
//!
//! Each provider recognizes its own registry hosts and exchanges the
//! ambient workload identity for registry credentials:
//!
//! - **aws**: ECR `GetAuthorizationToken` through the AWS SDK and its
//!   default credential chain
//! - **azure**: managed identity token from IMDS, exchanged at the
//!   registry's `/oauth2/exchange` endpoint for a refresh token
//! - **gcp**: access token from the metadata server
//!
//! A host that does not belong to the requested provider is reported as
//! [`LoginOutcome::Unconfigured`], which callers treat as "no credentials"
//! rather than as a failure.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::config::{Credentials, Region};
use aws_sdk_ecr::error::DisplayErrorContext;
use base64::Engine;
use chartserve_core::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::BasicAuth;
use crate::error::{RepoError, Result};

/// Username paired with an ACR refresh token
pub const AZURE_TOKEN_USERNAME: &str = "00000000-0000-0000-0000-000000000000";

/// Username paired with a GCP access token
pub const GCP_TOKEN_USERNAME: &str = "oauth2accesstoken";

const AZURE_IMDS: &str = "http://169.254.169.254";
const GCP_METADATA: &str = "http://metadata.google.internal";

/// Endpoint overrides, mostly useful for tests and private clouds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEndpoints {
    /// Replaces `https://api.ecr.<region>.amazonaws.com`
    #[serde(default)]
    pub aws_ecr: Option<String>,

    /// Replaces the Azure instance metadata service base URL
    #[serde(default)]
    pub azure_metadata: Option<String>,

    /// Replaces `https://<registry>` for the ACR token exchange
    #[serde(default)]
    pub azure_exchange: Option<String>,

    /// Replaces the GCP metadata server base URL
    #[serde(default)]
    pub gcp_metadata: Option<String>,
}

/// Result of an auto-login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(BasicAuth),

    /// The provider does not serve this registry
    Unconfigured,
}

/// One cloud provider's login flow
#[async_trait]
pub trait ProviderLogin: Send + Sync {
    fn provider(&self) -> Provider;

    /// True if the registry host belongs to this provider
    fn handles(&self, host: &str) -> bool;

    async fn login(&self, host: &str) -> Result<BasicAuth>;
}

/// Dispatches auto-login to the registered providers
pub struct LoginManager {
    providers: HashMap<Provider, Arc<dyn ProviderLogin>>,
}

impl LoginManager {
    /// Manager with the aws, azure and gcp providers
    pub fn new(endpoints: &ProviderEndpoints) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self::empty()
            .with_provider(Arc::new(AwsLogin::new(endpoints.aws_ecr.clone())))
            .with_provider(Arc::new(AzureLogin::new(
                http.clone(),
                endpoints.azure_metadata.clone(),
                endpoints.azure_exchange.clone(),
            )))
            .with_provider(Arc::new(GcpLogin::new(http, endpoints.gcp_metadata.clone()))))
    }

    /// Manager without providers; every login is unconfigured
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, login: Arc<dyn ProviderLogin>) -> Self {
        self.providers.insert(login.provider(), login);
        self
    }

    /// Attempt auto-login, bounded by `timeout`
    pub async fn login(
        &self,
        provider: Provider,
        host: &str,
        timeout: Duration,
    ) -> Result<LoginOutcome> {
        let Some(login) = self.providers.get(&provider) else {
            tracing::debug!(provider = %provider, "no auto-login for provider");
            return Ok(LoginOutcome::Unconfigured);
        };

        if !login.handles(host) {
            tracing::debug!(provider = %provider, host, "registry host not served by provider");
            return Ok(LoginOutcome::Unconfigured);
        }

        let auth = tokio::time::timeout(timeout, login.login(host))
            .await
            .map_err(|_| RepoError::Timeout {
                message: format!("{} login for {} after {:?}", provider, host, timeout),
            })?
            .map_err(|e| match e {
                RepoError::Timeout { .. } | RepoError::ProviderLogin { .. } => e,
                other => RepoError::ProviderLogin {
                    provider: provider.to_string(),
                    message: other.to_string(),
                },
            })?;

        tracing::info!(provider = %provider, host, "obtained registry credentials");
        Ok(LoginOutcome::Authenticated(auth))
    }
}

/// Host without a port
fn hostname(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

fn login_error(provider: Provider, message: impl Into<String>) -> RepoError {
    RepoError::ProviderLogin {
        provider: provider.to_string(),
        message: message.into(),
    }
}

async fn expect_success(provider: Provider, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(login_error(
        provider,
        format!("{} returned {}: {}", provider, status, body.trim()),
    ))
}

// ============ AWS ============

/// ECR login through the default AWS credential chain
///
/// The chain covers environment variables, shared profiles, web identity
/// (IRSA) and instance metadata.
pub struct AwsLogin {
    endpoint: Option<String>,
    credentials: Option<Credentials>,
}

impl AwsLogin {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            credentials: None,
        }
    }

    /// Use fixed credentials instead of the default chain
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Region of an ECR host: `<account>.dkr.ecr.<region>.amazonaws.com[.cn]`
    pub fn region_of(host: &str) -> Option<&str> {
        let parts: Vec<&str> = hostname(host).split('.').collect();
        match parts.as_slice() {
            [account, "dkr", "ecr", region, "amazonaws", "com"]
            | [account, "dkr", "ecr", region, "amazonaws", "com", "cn"]
                if !account.is_empty() && account.chars().all(|c| c.is_ascii_digit()) =>
            {
                Some(*region)
            }
            _ => None,
        }
    }

    async fn client(&self, region: &str) -> aws_sdk_ecr::Client {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(credentials) = &self.credentials {
            loader = loader.credentials_provider(credentials.clone());
        }
        aws_sdk_ecr::Client::new(&loader.load().await)
    }
}

#[async_trait]
impl ProviderLogin for AwsLogin {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn handles(&self, host: &str) -> bool {
        Self::region_of(host).is_some()
    }

    async fn login(&self, host: &str) -> Result<BasicAuth> {
        let region = Self::region_of(host)
            .ok_or_else(|| login_error(Provider::Aws, format!("{} is not an ECR host", host)))?;

        let output = self
            .client(region)
            .await
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| login_error(Provider::Aws, DisplayErrorContext(e).to_string()))?;

        let token = output
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .ok_or_else(|| login_error(Provider::Aws, "empty authorization data"))?;

        decode_basic_token(token).ok_or_else(|| login_error(Provider::Aws, "malformed authorization token"))
    }
}

/// Decode a base64 `user:password` token
pub(crate) fn decode_basic_token(token: &str) -> Option<BasicAuth> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(BasicAuth::new(username, password))
}

// ============ Azure ============

/// ACR login through a managed identity
pub struct AzureLogin {
    http: reqwest::Client,
    metadata: String,
    exchange: Option<String>,
}

impl AzureLogin {
    pub fn new(http: reqwest::Client, metadata: Option<String>, exchange: Option<String>) -> Self {
        Self {
            http,
            metadata: metadata.unwrap_or_else(|| AZURE_IMDS.to_string()),
            exchange,
        }
    }

    pub fn is_acr_host(host: &str) -> bool {
        let host = hostname(host);
        [".azurecr.io", ".azurecr.cn", ".azurecr.de", ".azurecr.us"]
            .iter()
            .any(|suffix| host.len() > suffix.len() && host.ends_with(suffix))
    }
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct RefreshToken {
    refresh_token: String,
}

#[async_trait]
impl ProviderLogin for AzureLogin {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn handles(&self, host: &str) -> bool {
        Self::is_acr_host(host)
    }

    async fn login(&self, host: &str) -> Result<BasicAuth> {
        let token_url = format!(
            "{}/metadata/identity/oauth2/token?api-version=2018-02-01&resource=https://management.azure.com/",
            self.metadata.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&token_url)
            .header("Metadata", "true")
            .send()
            .await?;
        let aad: AccessToken = expect_success(Provider::Azure, response).await?.json().await?;

        let exchange_base = self
            .exchange
            .clone()
            .unwrap_or_else(|| format!("https://{}", host));
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "access_token")
            .append_pair("service", hostname(host))
            .append_pair("access_token", &aad.access_token)
            .finish();

        let response = self
            .http
            .post(format!("{}/oauth2/exchange", exchange_base.trim_end_matches('/')))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;
        let acr: RefreshToken = expect_success(Provider::Azure, response).await?.json().await?;

        Ok(BasicAuth::new(AZURE_TOKEN_USERNAME, acr.refresh_token))
    }
}

// ============ GCP ============

/// GCR / Artifact Registry login through the metadata server
pub struct GcpLogin {
    http: reqwest::Client,
    metadata: String,
}

impl GcpLogin {
    pub fn new(http: reqwest::Client, metadata: Option<String>) -> Self {
        Self {
            http,
            metadata: metadata.unwrap_or_else(|| GCP_METADATA.to_string()),
        }
    }

    pub fn is_gcp_host(host: &str) -> bool {
        let host = hostname(host);
        host == "gcr.io" || host.ends_with(".gcr.io") || host.ends_with("-docker.pkg.dev")
    }
}

#[async_trait]
impl ProviderLogin for GcpLogin {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    fn handles(&self, host: &str) -> bool {
        Self::is_gcp_host(host)
    }

    async fn login(&self, _host: &str) -> Result<BasicAuth> {
        let url = format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.metadata.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        let token: AccessToken = expect_success(Provider::Gcp, response).await?.json().await?;

        Ok(BasicAuth::new(GCP_TOKEN_USERNAME, token.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ECR_HOST: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com";
    const ECR_TARGET: &str = "AmazonEC2ContainerRegistry_V20150921.GetAuthorizationToken";

    fn test_credentials() -> Credentials {
        Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            None,
            None,
            "test",
        )
    }

    #[test]
    fn test_host_recognition() {
        assert_eq!(AwsLogin::region_of(ECR_HOST), Some("us-east-1"));
        assert_eq!(
            AwsLogin::region_of("123456789012.dkr.ecr.cn-north-1.amazonaws.com.cn"),
            Some("cn-north-1")
        );
        assert_eq!(AwsLogin::region_of("ghcr.io"), None);
        assert_eq!(AwsLogin::region_of("evil.dkr.ecr.us-east-1.amazonaws.com"), None);

        assert!(AzureLogin::is_acr_host("myregistry.azurecr.io"));
        assert!(!AzureLogin::is_acr_host("azurecr.io"));
        assert!(!AzureLogin::is_acr_host("ghcr.io"));

        assert!(GcpLogin::is_gcp_host("gcr.io"));
        assert!(GcpLogin::is_gcp_host("eu.gcr.io"));
        assert!(GcpLogin::is_gcp_host("europe-west1-docker.pkg.dev"));
        assert!(!GcpLogin::is_gcp_host("docker.io"));
    }

    #[test]
    fn test_decode_basic_token() {
        let auth = decode_basic_token("QVdTOnBhc3N3b3Jk").unwrap();
        assert_eq!(auth.username, "AWS");
        assert_eq!(auth.password, "password");
        assert!(decode_basic_token("bm9jb2xvbg==").is_none());
    }

    #[tokio::test]
    async fn test_aws_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", ECR_TARGET))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/x-amz-json-1.1")
                    .set_body_json(serde_json::json!({
                        "authorizationData": [{
                            "authorizationToken": "QVdTOnBhc3N3b3Jk",
                            "proxyEndpoint": format!("https://{}", ECR_HOST)
                        }]
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let login = AwsLogin::new(Some(server.uri())).with_credentials(test_credentials());
        let manager = LoginManager::empty().with_provider(Arc::new(login));

        let outcome = manager
            .login(Provider::Aws, ECR_HOST, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LoginOutcome::Authenticated(BasicAuth::new("AWS", "password"))
        );
    }

    #[tokio::test]
    async fn test_aws_rejection_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("content-type", "application/x-amz-json-1.1")
                    .set_body_json(serde_json::json!({
                        "__type": "UnrecognizedClientException",
                        "message": "The security token included in the request is invalid."
                    })),
            )
            .mount(&server)
            .await;

        let login = AwsLogin::new(Some(server.uri())).with_credentials(test_credentials());
        let err = LoginManager::empty()
            .with_provider(Arc::new(login))
            .login(Provider::Aws, ECR_HOST, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::ProviderLogin { .. }));
    }

    #[tokio::test]
    async fn test_azure_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/identity/oauth2/token"))
            .and(header("Metadata", "true"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "aad"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/exchange"))
            .and(body_string_contains("access_token=aad"))
            .and(body_string_contains("service=myregistry.azurecr.io"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"refresh_token": "acr"})),
            )
            .mount(&server)
            .await;

        let login = AzureLogin::new(reqwest::Client::new(), Some(server.uri()), Some(server.uri()));
        let auth = login.login("myregistry.azurecr.io").await.unwrap();
        assert_eq!(auth, BasicAuth::new(AZURE_TOKEN_USERNAME, "acr"));
    }

    #[tokio::test]
    async fn test_gcp_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "ya29"})),
            )
            .mount(&server)
            .await;

        let manager = LoginManager::empty()
            .with_provider(Arc::new(GcpLogin::new(reqwest::Client::new(), Some(server.uri()))));
        let outcome = manager
            .login(Provider::Gcp, "gcr.io", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LoginOutcome::Authenticated(BasicAuth::new(GCP_TOKEN_USERNAME, "ya29"))
        );
    }

    #[tokio::test]
    async fn test_foreign_host_is_unconfigured() {
        let manager = LoginManager::new(&ProviderEndpoints::default()).unwrap();
        let outcome = manager
            .login(Provider::Aws, "ghcr.io", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Unconfigured);

        let outcome = manager
            .login(Provider::Generic, ECR_HOST, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Unconfigured);
    }

    #[tokio::test]
    async fn test_login_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("identity not assigned"))
            .mount(&server)
            .await;

        let manager = LoginManager::empty()
            .with_provider(Arc::new(GcpLogin::new(reqwest::Client::new(), Some(server.uri()))));
        let err = manager
            .login(Provider::Gcp, "gcr.io", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::ProviderLogin { .. }));
        assert!(err.to_string().contains("identity not assigned"));
    }

    #[tokio::test]
    async fn test_login_is_bounded_by_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "late"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let manager = LoginManager::empty()
            .with_provider(Arc::new(GcpLogin::new(reqwest::Client::new(), Some(server.uri()))));
        let err = manager
            .login(Provider::Gcp, "gcr.io", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
