use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{config::AzureCredentials, error::AppError};

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

// refresh tokens this close to expiry
const REFRESH_MARGIN_MINUTES: i64 = 5;
const DEFAULT_ATTEMPT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::minutes(REFRESH_MARGIN_MINUTES)
    }
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_token(&self, resource: &str) -> Result<AccessToken, AppError>;
}

pub struct CredentialResolver {
    resource: String,
    primary: Box<dyn TokenCredential>,
    fallback: Vec<Box<dyn TokenCredential>>,
    attempt_timeout: StdDuration,
    cached: Mutex<Option<AccessToken>>,
}

impl CredentialResolver {
    pub fn new(
        resource: impl Into<String>,
        primary: Box<dyn TokenCredential>,
        fallback: Vec<Box<dyn TokenCredential>>,
    ) -> Self {
        Self {
            resource: resource.into(),
            primary,
            fallback,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            cached: Mutex::new(None),
        }
    }

    // Managed identity, then environment service principal, then Azure CLI
    pub fn for_cluster(
        cluster: &str,
        azure: &AzureCredentials,
        http: Client,
        timeout: StdDuration,
    ) -> Self {
        let managed_identity = ManagedIdentityCredential::from_env(http.clone(), azure.client_id.clone());
        let fallback: Vec<Box<dyn TokenCredential>> = vec![
            Box::new(EnvironmentCredential::new(http, azure.clone())),
            Box::new(AzureCliCredential::new(timeout)),
        ];

        Self::new(cluster, Box::new(managed_identity), fallback).with_attempt_timeout(timeout)
    }

    // Caps each credential attempt; the cache lock is held while acquiring
    pub fn with_attempt_timeout(mut self, timeout: StdDuration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub async fn token(&self) -> Result<String, AppError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.token.clone());
        }

        let token = self.acquire().await?;
        let secret = token.token.clone();
        *cached = Some(token);
        Ok(secret)
    }

    async fn attempt(&self, credential: &dyn TokenCredential) -> Result<AccessToken, AppError> {
        tokio::time::timeout(self.attempt_timeout, credential.get_token(&self.resource))
            .await
            .unwrap_or_else(|_| {
                Err(AppError::AuthError(format!(
                    "timed out after {}s",
                    self.attempt_timeout.as_secs_f64()
                )))
            })
    }

    async fn acquire(&self) -> Result<AccessToken, AppError> {
        let primary_err = match self.attempt(self.primary.as_ref()).await {
            Ok(token) => {
                debug!(credential = self.primary.name(), "acquired access token");
                return Ok(token);
            }
            Err(e) => e,
        };

        warn!(
            credential = self.primary.name(),
            error = %primary_err,
            "primary credential failed, falling back to default chain"
        );
        let mut failures = vec![format!("{}: {}", self.primary.name(), primary_err)];

        for credential in &self.fallback {
            match self.attempt(credential.as_ref()).await {
                Ok(token) => {
                    info!(credential = credential.name(), "acquired access token from fallback chain");
                    return Ok(token);
                }
                Err(e) => {
                    debug!(credential = credential.name(), error = %e, "credential unavailable");
                    failures.push(format!("{}: {}", credential.name(), e));
                }
            }
        }

        Err(AppError::AuthError(format!(
            "no credential could obtain a token ({})",
            failures.join("; ")
        )))
    }
}

enum IdentityEndpoint {
    // App Service / Functions
    AppService { endpoint: String, header: String },
    Imds, // instance metadata service
}

pub struct ManagedIdentityCredential {
    http: Client,
    client_id: Option<String>,
    endpoint: IdentityEndpoint,
}

impl ManagedIdentityCredential {
    pub fn from_env(http: Client, client_id: Option<String>) -> Self {
        let endpoint = match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => IdentityEndpoint::AppService { endpoint, header },
            _ => IdentityEndpoint::Imds,
        };

        Self { http, client_id, endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct ManagedIdentityToken {
    access_token: String,
    expires_on: Value,
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "ManagedIdentityCredential"
    }

    async fn get_token(&self, resource: &str) -> Result<AccessToken, AppError> {
        let mut query = vec![("resource", resource.to_string())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.clone()));
        }

        let request = match &self.endpoint {
            IdentityEndpoint::AppService { endpoint, header } => {
                query.push(("api-version", "2019-08-01".into()));
                self.http
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header)
            }
            IdentityEndpoint::Imds => {
                query.push(("api-version", "2018-02-01".into()));
                self.http
                    .get(IMDS_ENDPOINT)
                    .header("Metadata", "true")
                    .timeout(StdDuration::from_secs(2))
            }
        };

        let response = request
            .query(&query)
            .send()
            .await
            .map_err(|e| AppError::AuthError(format!("identity endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AuthError(format!(
                "identity endpoint returned {}: {}",
                status, body
            )));
        }

        let token: ManagedIdentityToken = response
            .json()
            .await
            .map_err(|e| AppError::AuthError(format!("invalid identity token response: {}", e)))?;

        let expires_at = parse_epoch(&token.expires_on)
            .ok_or_else(|| AppError::AuthError("identity token has no expiry".into()))?;

        Ok(AccessToken {
            token: token.access_token,
            expires_at,
        })
    }
}

pub struct EnvironmentCredential {
    http: Client,
    azure: AzureCredentials,
}

impl EnvironmentCredential {
    pub fn new(http: Client, azure: AzureCredentials) -> Self {
        Self { http, azure }
    }
}

#[derive(Debug, Deserialize)]
struct ClientCredentialsToken {
    access_token: String,
    expires_in: i64,
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "EnvironmentCredential"
    }

    async fn get_token(&self, resource: &str) -> Result<AccessToken, AppError> {
        let (tenant_id, client_id, client_secret) = match (
            &self.azure.tenant_id,
            &self.azure.client_id,
            &self.azure.client_secret,
        ) {
            (Some(t), Some(c), Some(s)) => (t, c, s),
            _ => {
                return Err(AppError::AuthError(
                    "AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET are not all set".into(),
                ))
            }
        };

        let url = format!("{}/{}/oauth2/v2.0/token", AUTHORITY_HOST, tenant_id);
        let scope = format!("{}/.default", resource.trim_end_matches('/'));
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::AuthError(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AuthError(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: ClientCredentialsToken = response
            .json()
            .await
            .map_err(|e| AppError::AuthError(format!("invalid token response: {}", e)))?;

        Ok(AccessToken {
            token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

pub struct AzureCliCredential {
    timeout: StdDuration,
}

impl AzureCliCredential {
    pub fn new(timeout: StdDuration) -> Self {
        Self { timeout }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    expires_on: Option<String>,
    #[serde(rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "AzureCliCredential"
    }

    async fn get_token(&self, resource: &str) -> Result<AccessToken, AppError> {
        let run = tokio::process::Command::new("az")
            .args(["account", "get-access-token", "--output", "json", "--resource", resource])
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| AppError::AuthError("az CLI timed out".into()))?
            .map_err(|e| AppError::AuthError(format!("az CLI not available: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::AuthError(format!(
                "az account get-access-token failed: {}",
                stderr.trim()
            )));
        }

        let token: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| AppError::AuthError(format!("invalid az CLI output: {}", e)))?;

        let expires_at = token
            .expires_on_epoch
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| token.expires_on.as_deref().and_then(parse_cli_local_time))
            .ok_or_else(|| AppError::AuthError("az CLI token has no expiry".into()))?;

        Ok(AccessToken {
            token: token.access_token,
            expires_at,
        })
    }
}

// epoch seconds, as a string or a number
fn parse_epoch(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Utc.timestamp_opt(secs, 0).single()
}

// older az builds only report local time
fn parse_cli_local_time(text: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct StaticCredential {
        name: &'static str,
        outcome: Result<&'static str, &'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl StaticCredential {
        fn boxed(
            name: &'static str,
            outcome: Result<&'static str, &'static str>,
            calls: &Arc<AtomicUsize>,
        ) -> Box<dyn TokenCredential> {
            Box::new(Self {
                name,
                outcome,
                calls: calls.clone(),
            })
        }
    }

    #[async_trait]
    impl TokenCredential for StaticCredential {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn get_token(&self, _resource: &str) -> Result<AccessToken, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Ok(token) => Ok(AccessToken {
                    token: token.to_string(),
                    expires_at: Utc::now() + Duration::hours(1),
                }),
                Err(msg) => Err(AppError::AuthError(msg.to_string())),
            }
        }
    }

    struct StalledCredential;

    #[async_trait]
    impl TokenCredential for StalledCredential {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn get_token(&self, _resource: &str) -> Result<AccessToken, AppError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_credential_times_out_and_falls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::new(
            "https://cluster",
            Box::new(StalledCredential),
            vec![StaticCredential::boxed("env", Ok("env-token"), &calls)],
        )
        .with_attempt_timeout(StdDuration::from_millis(50));

        let token = tokio::time::timeout(StdDuration::from_secs(5), resolver.token())
            .await
            .expect("resolver must not hang on a stalled credential");
        assert_eq!(token.unwrap(), "env-token");
    }

    #[tokio::test]
    async fn stalled_chain_releases_waiting_requests() {
        let resolver = Arc::new(
            CredentialResolver::new(
                "https://cluster",
                Box::new(StalledCredential),
                vec![Box::new(StalledCredential)],
            )
            .with_attempt_timeout(StdDuration::from_millis(50)),
        );

        let first = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.token().await }
        });
        let second = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.token().await }
        });

        for handle in [first, second] {
            let result = tokio::time::timeout(StdDuration::from_secs(5), handle)
                .await
                .expect("queued request must not hang")
                .unwrap();
            match result {
                Err(AppError::AuthError(msg)) => assert!(msg.contains("stalled: Authentication error: timed out")),
                other => panic!("expected auth error, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn uses_managed_identity_when_available() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::new(
            "https://cluster",
            StaticCredential::boxed("mi", Ok("mi-token"), &calls),
            vec![StaticCredential::boxed("env", Ok("env-token"), &calls)],
        );

        assert_eq!(resolver.token().await.unwrap(), "mi-token");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_to_the_default_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::new(
            "https://cluster",
            StaticCredential::boxed("mi", Err("no identity"), &calls),
            vec![
                StaticCredential::boxed("env", Err("not configured"), &calls),
                StaticCredential::boxed("cli", Ok("cli-token"), &calls),
            ],
        );

        assert_eq!(resolver.token().await.unwrap(), "cli-token");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reports_every_failure_when_the_chain_is_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::new(
            "https://cluster",
            StaticCredential::boxed("mi", Err("no identity"), &calls),
            vec![StaticCredential::boxed("env", Err("not configured"), &calls)],
        );

        match resolver.token().await {
            Err(AppError::AuthError(msg)) => {
                assert!(msg.contains("mi: Authentication error: no identity"));
                assert!(msg.contains("env: Authentication error: not configured"));
            }
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn caches_fresh_tokens() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::new(
            "https://cluster",
            StaticCredential::boxed("mi", Ok("mi-token"), &calls),
            vec![],
        );

        resolver.token().await.unwrap();
        resolver.token().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn environment_credential_requires_all_variables() {
        let credential = EnvironmentCredential::new(
            Client::new(),
            AzureCredentials {
                client_id: Some("id".into()),
                tenant_id: None,
                client_secret: Some("secret".into()),
            },
        );

        let result = credential.get_token("https://cluster").await;
        assert!(matches!(result, Err(AppError::AuthError(_))));
    }

    #[test]
    fn token_freshness_respects_refresh_margin() {
        let now = Utc::now();
        let nearly_expired = AccessToken {
            token: "t".into(),
            expires_at: now + Duration::minutes(2),
        };
        let fresh = AccessToken {
            token: "t".into(),
            expires_at: now + Duration::minutes(30),
        };
        assert!(!nearly_expired.is_fresh(now));
        assert!(fresh.is_fresh(now));
    }

    #[test]
    fn parses_epoch_strings_and_numbers() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(parse_epoch(&json!("1700000000")), Some(expected));
        assert_eq!(parse_epoch(&json!(1_700_000_000)), Some(expected));
        assert_eq!(parse_epoch(&json!(null)), None);
    }
}
