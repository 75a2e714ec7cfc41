//! Provider registration by type name.
//!
//! The `provider.type` key in the runtime config selects a factory; the
//! remaining keys are handed to it as JSON.
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create("fixture", &json!({ "path": "fixtures/products.json" }))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{DataProvider, ProviderError};

/// Builds a [`DataProvider`] from JSON options.
pub trait ProviderFactory: Send + Sync {
    /// Type name used in configuration, e.g. "http".
    fn provider_type(&self) -> &'static str;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn DataProvider>, ProviderError>;

    /// Check options without building anything. Used at startup.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "Data provider"
    }
}

/// Provider factories keyed by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Replaces any factory with the same type name.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn DataProvider>, ProviderError> {
        self.factory(provider_type)?.create(config)
    }

    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factory(provider_type)?.validate_config(config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// `(type, description)` for every registered factory, sorted by type.
    pub fn describe(&self) -> Vec<(&str, &'static str)> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.as_str(), factory.description()))
            .collect()
    }

    /// Registry with the built-in "fixture" and "http" providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::FixtureProviderFactory));
        registry.register(Arc::new(super::HttpProviderFactory));
        registry
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{DiscoveryPage, ProviderResponse};
    use async_trait::async_trait;
    use bookarb_core::DiscoveryQuery;

    struct StaticProvider {
        name: String,
    }

    #[async_trait]
    impl DataProvider for StaticProvider {
        async fn fetch_product(
            &self,
            identifier: &str,
        ) -> Result<ProviderResponse<JsonValue>, ProviderError> {
            Ok(ProviderResponse::new(serde_json::json!({ "asin": identifier })))
        }

        async fn discover(
            &self,
            _query: &DiscoveryQuery,
            _page: u32,
        ) -> Result<ProviderResponse<DiscoveryPage>, ProviderError> {
            Ok(ProviderResponse::new(DiscoveryPage::default()))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct StaticProviderFactory;

    impl ProviderFactory for StaticProviderFactory {
        fn provider_type(&self) -> &'static str {
            "static"
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn DataProvider>, ProviderError> {
            let name = config["name"].as_str().unwrap_or("static").to_string();
            Ok(Arc::new(StaticProvider { name }))
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
            if config.get("broken").is_some() {
                return Err(ProviderError::NotConfigured("broken".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StaticProviderFactory));

        assert!(registry.has_provider("static"));
        let provider = registry
            .create("static", &serde_json::json!({ "name": "shelf" }))
            .unwrap();
        assert_eq!(provider.name(), "shelf");
    }

    #[test]
    fn test_unknown_type_lists_available() {
        let registry = ProviderRegistry::with_defaults();
        match registry.create("scraper", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("scraper"));
                assert!(msg.contains("fixture"));
            }
            other => panic!("Expected NotConfigured, got {:?}", other.map(|p| p.name().to_string())),
        }
    }

    #[test]
    fn test_defaults_registered() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.available_types(), vec!["fixture", "http"]);

        let described = registry.describe();
        assert_eq!(described[0].0, "fixture");
        assert!(described.iter().all(|(_, description)| !description.is_empty()));
    }

    #[test]
    fn test_validate_delegates() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StaticProviderFactory));

        assert!(registry.validate("static", &serde_json::json!({})).is_ok());
        assert!(registry
            .validate("static", &serde_json::json!({ "broken": true }))
            .is_err());
        assert!(registry.validate("missing", &serde_json::json!({})).is_err());
    }
}
