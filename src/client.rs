use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};

use crate::error::LookupError;
use crate::lookup::LocalityLookup;
use crate::types::Locality;

const DEFAULT_API_URL: &str = "https://openplzapi.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const LOCALITIES_PATH: &str = "/de/Localities";

/// Configuration for OpenPlzClient
#[derive(Debug, Clone)]
pub struct OpenPlzConfig {
    /// Service root, without the `/de/Localities` path
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for OpenPlzConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl OpenPlzConfig {
    /// Read `PLZ_API_URL` and `PLZ_HTTP_TIMEOUT_SECS`, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("PLZ_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            timeout: env::var("PLZ_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

/// Locality lookup backed by openplzapi.org
#[derive(Debug, Clone)]
pub struct OpenPlzClient {
    http_client: Client,
    localities_url: String,
}

impl OpenPlzClient {
    pub fn new() -> Result<Self, LookupError> {
        Self::with_config(OpenPlzConfig::default())
    }

    pub fn with_config(config: OpenPlzConfig) -> Result<Self, LookupError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            localities_url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                LOCALITIES_PATH
            ),
        })
    }

    /// Query the Localities resource with a single filter parameter
    async fn fetch(&self, param: &str, value: &str) -> Result<Vec<Locality>, LookupError> {
        let response = self
            .http_client
            .get(&self.localities_url)
            .query(&[(param, value)])
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(LookupError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl LocalityLookup for OpenPlzClient {
    async fn lookup_by_name(&self, name: &str) -> Result<Vec<Locality>, LookupError> {
        tracing::debug!("Looking up localities named {:?}", name);
        self.fetch("name", name).await
    }

    async fn lookup_by_postal_code(&self, code: &str) -> Result<Vec<Locality>, LookupError> {
        tracing::debug!("Looking up localities for PLZ {:?}", code);
        self.fetch("postalCode", code).await
    }
}
