//! HTTP data provider.
//!
//! Talks to a metered product-data API:
//!
//! - `GET {base_url}/product?code={identifier}` returns
//!   `{ "tokens_left": 840, "tokens_consumed": 1, "product": { ... } }`
//! - `POST {base_url}/query?page={n}` with `{ "filters": ..., "per_page": n }` returns
//!   `{ "tokens_left": 830, "identifiers": [...], "total_results": 57 }`
//!
//! Network calls require the `http` feature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bookarb_core::DiscoveryQuery;

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, API_KEY_ENV},
    DataProvider, DiscoveryPage, ProviderError, ProviderResponse,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PAGE_SIZE: u32 = 10;

/// Provider backed by the remote product-data API.
pub struct HttpProvider {
    credential: ApiCredential,
    base_url: String,
    timeout: Duration,
    page_size: u32,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let credential = ApiCredential::inline(api_key);
        Self::build(credential, base_url.into(), DEFAULT_TIMEOUT, DEFAULT_PAGE_SIZE)
    }

    /// Build from JSON options. `api_key` falls back to `BOOKARB_API_KEY`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::resolve(config)?;
        tracing::debug!(key = %credential, "Resolved provider API key");

        let base_url = config["base_url"]
            .as_str()
            .ok_or_else(|| ProviderError::NotConfigured("http provider needs 'base_url'".into()))?
            .trim_end_matches('/')
            .to_string();

        let timeout = match config["timeout"].as_str() {
            Some(s) => humantime::parse_duration(s)
                .map_err(|e| ProviderError::NotConfigured(format!("timeout: {}", e)))?,
            None => DEFAULT_TIMEOUT,
        };

        let page_size = config["page_size"]
            .as_u64()
            .map(|n| n.max(1) as u32)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Self::build(credential, base_url, timeout, page_size)
    }

    #[cfg(feature = "http")]
    fn build(
        credential: ApiCredential,
        base_url: String,
        timeout: Duration,
        page_size: u32,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self {
            credential,
            base_url,
            timeout,
            page_size,
            client,
        })
    }

    #[cfg(not(feature = "http"))]
    fn build(
        credential: ApiCredential,
        base_url: String,
        timeout: Duration,
        page_size: u32,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            credential,
            base_url,
            timeout,
            page_size,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[cfg(feature = "http")]
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = request
            .header("x-api-key", self.credential.expose())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Server {
                status: status.as_u16(),
                message,
            });
        }

        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(ProviderError::Client {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ProductBody {
    #[serde(default, alias = "tokensLeft")]
    tokens_left: Option<u64>,
    #[serde(default, alias = "tokensConsumed")]
    tokens_consumed: Option<u64>,
    product: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    filters: &'a JsonValue,
    per_page: u32,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default, alias = "tokensLeft")]
    tokens_left: Option<u64>,
    #[serde(default, alias = "tokensConsumed")]
    tokens_consumed: Option<u64>,
    #[serde(default, alias = "asinList")]
    identifiers: Vec<String>,
    #[serde(default, alias = "totalResults")]
    total_results: Option<u32>,
}

#[async_trait]
impl DataProvider for HttpProvider {
    #[cfg(feature = "http")]
    async fn fetch_product(
        &self,
        identifier: &str,
    ) -> Result<ProviderResponse<JsonValue>, ProviderError> {
        let request = self
            .client
            .get(format!("{}/product", self.base_url))
            .query(&[("code", identifier)]);

        let body: ProductBody = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let product = body
            .product
            .filter(|p| !p.is_null())
            .ok_or_else(|| ProviderError::NotFound(identifier.to_string()))?;

        Ok(ProviderResponse {
            data: product,
            tokens_left: body.tokens_left,
            tokens_consumed: body.tokens_consumed,
        })
    }

    #[cfg(not(feature = "http"))]
    async fn fetch_product(
        &self,
        _identifier: &str,
    ) -> Result<ProviderResponse<JsonValue>, ProviderError> {
        Err(ProviderError::NotConfigured(
            "HTTP provider requires 'http' feature".to_string(),
        ))
    }

    #[cfg(feature = "http")]
    async fn discover(
        &self,
        query: &DiscoveryQuery,
        page: u32,
    ) -> Result<ProviderResponse<DiscoveryPage>, ProviderError> {
        let request = self
            .client
            .post(format!("{}/query", self.base_url))
            .query(&[("page", page)])
            .json(&QueryRequest {
                filters: &query.filters,
                per_page: self.page_size,
            });

        let body: QueryBody = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(ProviderResponse {
            data: DiscoveryPage {
                identifiers: body.identifiers,
                total_results: body.total_results,
            },
            tokens_left: body.tokens_left,
            tokens_consumed: body.tokens_consumed,
        })
    }

    #[cfg(not(feature = "http"))]
    async fn discover(
        &self,
        _query: &DiscoveryQuery,
        _page: u32,
    ) -> Result<ProviderResponse<DiscoveryPage>, ProviderError> {
        Err(ProviderError::NotConfigured(
            "HTTP provider requires 'http' feature".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        cfg!(feature = "http") && !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Builds an [`HttpProvider`].
///
/// ```json
/// {
///   "base_url": "https://api.example.com/v1",
///   "api_key": "...",      // optional, falls back to BOOKARB_API_KEY
///   "timeout": "30s",      // optional
///   "page_size": 10        // filled in from costs.discovery_page_size
/// }
/// ```
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn provider_type(&self) -> &'static str {
        "http"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn DataProvider>, ProviderError> {
        self.validate_config(config)?;
        Ok(Arc::new(HttpProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_configured(config) {
            return Err(ProviderError::NotConfigured(format!(
                "API key required: set 'api_key' in config or {} env",
                API_KEY_ENV
            )));
        }

        match config["base_url"].as_str() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
            Some(_) => Err(ProviderError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            )),
            None => Err(ProviderError::NotConfigured(
                "http provider needs 'base_url'".to_string(),
            )),
        }
    }

    fn description(&self) -> &'static str {
        "Remote product-data API over HTTP"
    }
}
