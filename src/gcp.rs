//! Google Cloud credentials and access tokens

use crate::config::{GcpConfig, TokenSourceKind};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed this long before the issuer says they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime requested for self-signed assertions, the maximum Google accepts
const ASSERTION_LIFETIME_SECS: i64 = 3600;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Fields of a service-account key file used by the service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    pub client_email: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Read and validate a key file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed credentials file {}", path.display()))?;

        if key.kind != "service_account" {
            anyhow::bail!(
                "Credentials file {} has type {:?}, expected \"service_account\"",
                path.display(),
                key.kind
            );
        }
        Ok(key)
    }
}

/// Claims of the OAuth2 JWT-bearer assertion
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Token endpoint and metadata server response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Signs assertions as the key's service account
pub struct ServiceAccountSigner {
    client_email: String,
    token_uri: String,
    header: Header,
    signing_key: EncodingKey,
}

impl ServiceAccountSigner {
    pub fn new(key: &ServiceAccountKey) -> Result<Self> {
        if key.private_key.trim().is_empty() {
            anyhow::bail!("Service-account key {} has no private_key", key.client_email);
        }
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Service-account private_key is not a valid RSA key")?;

        let mut header = Header::new(Algorithm::RS256);
        if !key.private_key_id.is_empty() {
            header.kid = Some(key.private_key_id.clone());
        }

        Ok(Self {
            client_email: key.client_email.clone(),
            token_uri: key.token_uri.clone(),
            header,
            signing_key,
        })
    }

    /// Signed assertion valid for one hour from now
    fn assertion(&self) -> Result<String> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&self.header, &claims, &self.signing_key)
            .context("Failed to sign token assertion")
    }
}

/// Where fresh tokens come from
pub enum TokenProvider {
    /// GCE / Cloud Run metadata server
    Metadata {
        client: reqwest::Client,
        endpoint: String,
    },
    /// JWT-bearer grant signed with the service-account key
    ServiceAccount {
        client: reqwest::Client,
        signer: ServiceAccountSigner,
    },
}

impl TokenProvider {
    async fn fetch(&self) -> Result<TokenResponse> {
        let response = match self {
            TokenProvider::Metadata { client, endpoint } => {
                let url = format!(
                    "{}/computeMetadata/v1/instance/service-accounts/default/token",
                    endpoint
                );
                client
                    .get(&url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .context("Failed to reach metadata server")?
                    .error_for_status()
                    .context("Metadata server refused token request")?
            }
            TokenProvider::ServiceAccount { client, signer } => client
                .post(&signer.token_uri)
                .form(&[
                    ("grant_type", JWT_BEARER_GRANT.to_string()),
                    ("assertion", signer.assertion()?),
                ])
                .send()
                .await
                .with_context(|| format!("Failed to reach token endpoint {}", signer.token_uri))?
                .error_for_status()
                .context("Token endpoint refused the service-account assertion")?,
        };

        response.json().await.context("Malformed token response")
    }
}

/// Token issued by a [`TokenProvider`]
pub struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Source of OAuth2 bearer tokens
pub enum TokenSource {
    /// Pre-issued token, used as is
    Static(String),
    /// Fetched on demand and reused until shortly before expiry
    Fetched {
        provider: TokenProvider,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    /// Use the token in `access_token_env` when set, else the configured provider
    pub fn from_config(
        config: &GcpConfig,
        key: &ServiceAccountKey,
        client: reqwest::Client,
    ) -> Result<Self> {
        if let Ok(token) = std::env::var(&config.access_token_env) {
            if !token.trim().is_empty() {
                info!(env = %config.access_token_env, "Using access token from environment");
                return Ok(TokenSource::Static(token.trim().to_string()));
            }
        }

        match config.token_source {
            TokenSourceKind::ServiceAccount => {
                info!(
                    account = %key.client_email,
                    token_uri = %key.token_uri,
                    "Using service-account key for access tokens"
                );
                TokenSource::service_account(client, key)
            }
            TokenSourceKind::Metadata => {
                info!(
                    endpoint = %config.metadata_endpoint,
                    "Using metadata server for access tokens"
                );
                Ok(TokenSource::metadata(client, &config.metadata_endpoint))
            }
        }
    }

    pub fn metadata(client: reqwest::Client, endpoint: &str) -> Self {
        Self::fetched(TokenProvider::Metadata {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn service_account(client: reqwest::Client, key: &ServiceAccountKey) -> Result<Self> {
        let signer = ServiceAccountSigner::new(key)?;
        Ok(Self::fetched(TokenProvider::ServiceAccount { client, signer }))
    }

    fn fetched(provider: TokenProvider) -> Self {
        TokenSource::Fetched {
            provider,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, fetching a new one when the cached token is stale
    pub async fn token(&self) -> Result<String> {
        let (provider, cached) = match self {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Fetched { provider, cached } => (provider, cached),
        };

        let mut cached = cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let token = provider.fetch().await?;
        debug!(expires_in = token.expires_in, "Fetched access token");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

/// Project and token source shared by the GCS and Firestore clients
pub struct GcpContext {
    pub project_id: String,
    pub tokens: TokenSource,
}

impl GcpContext {
    /// Load credentials; a missing or malformed key file is an error
    pub fn from_config(config: &GcpConfig, client: reqwest::Client) -> Result<Self> {
        let key = ServiceAccountKey::from_file(&config.credentials_path)?;
        let project_id = if config.project_id.is_empty() {
            key.project_id.clone()
        } else {
            config.project_id.clone()
        };

        info!(
            project = %project_id,
            account = %key.client_email,
            "Loaded service-account credentials"
        );

        Ok(Self {
            project_id,
            tokens: TokenSource::from_config(config, &key, client)?,
        })
    }
}
