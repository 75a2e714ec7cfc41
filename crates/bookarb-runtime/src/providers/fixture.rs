//! Offline provider serving canned payloads.
//!
//! Fixture file format:
//!
//! ```json
//! {
//!   "products": {
//!     "0441172717": { "title": "Dune", "buy_box_price": 799, "sales_rank": 1520 }
//!   },
//!   "discovery": ["0441172717", "B00B7NPRY8"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use bookarb_core::DiscoveryQuery;

use super::{DataProvider, DiscoveryPage, ProviderError, ProviderFactory, ProviderResponse};

const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Default, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    products: BTreeMap<String, JsonValue>,
    #[serde(default)]
    discovery: Vec<String>,
}

/// Serves product payloads and discovery results from memory.
#[derive(Debug, Clone)]
pub struct FixtureProvider {
    products: BTreeMap<String, JsonValue>,
    discovery: Vec<String>,
    page_size: u32,
}

impl FixtureProvider {
    pub fn new(products: BTreeMap<String, JsonValue>, discovery: Vec<String>) -> Self {
        Self {
            products,
            discovery,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Parse a fixture document.
    pub fn from_json(value: JsonValue) -> Result<Self, ProviderError> {
        let file: FixtureFile =
            serde_json::from_value(value).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(Self::new(file.products, file.discovery))
    }

    /// Load a fixture file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::NotConfigured(format!(
                "cannot read fixture file {}: {}",
                path.display(),
                e
            ))
        })?;
        let value: JsonValue =
            serde_json::from_str(&content).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Self::from_json(value)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[async_trait]
impl DataProvider for FixtureProvider {
    async fn fetch_product(
        &self,
        identifier: &str,
    ) -> Result<ProviderResponse<JsonValue>, ProviderError> {
        self.products
            .get(identifier)
            .cloned()
            .map(ProviderResponse::new)
            .ok_or_else(|| ProviderError::NotFound(identifier.to_string()))
    }

    async fn discover(
        &self,
        query: &DiscoveryQuery,
        page: u32,
    ) -> Result<ProviderResponse<DiscoveryPage>, ProviderError> {
        let limit = (query.max_results as usize).min(self.discovery.len());
        let start = (page as usize).saturating_mul(self.page_size as usize);
        let end = start.saturating_add(self.page_size as usize).min(limit);

        let identifiers = if start < end {
            self.discovery[start..end].to_vec()
        } else {
            Vec::new()
        };

        Ok(ProviderResponse::new(DiscoveryPage {
            identifiers,
            total_results: Some(limit as u32),
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

/// Builds a [`FixtureProvider`] from `{ "path": ..., "page_size": ... }`.
pub struct FixtureProviderFactory;

impl ProviderFactory for FixtureProviderFactory {
    fn provider_type(&self) -> &'static str {
        "fixture"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn DataProvider>, ProviderError> {
        self.validate_config(config)?;

        let provider = match config["path"].as_str() {
            Some(path) => FixtureProvider::from_file(path)?,
            None => FixtureProvider::from_json(config["data"].clone())?,
        };
        let page_size = config["page_size"]
            .as_u64()
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(Arc::new(provider.with_page_size(page_size)))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if config["path"].as_str().is_none() && !config["data"].is_object() {
            return Err(ProviderError::NotConfigured(
                "fixture provider needs 'path' or inline 'data'".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Canned payloads from a JSON fixture"
    }
}
