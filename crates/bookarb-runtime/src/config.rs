//! Runtime configuration.
//!
//! Loaded from YAML. Durations are human-readable (`"30s"`, `"24h"`).
//! Every section has conservative defaults, so an empty file is valid.
//!
//! ```yaml
//! budget:
//!   capacity: 1200
//!   refill_rate_per_second: 0.333
//! circuit_breaker:
//!   failure_threshold: 5
//!   recovery_timeout: 60s
//! cache:
//!   pricing_ttl: 30m
//! default_policy:
//!   max_tokens_per_job: 200
//!   timeout_seconds: 300
//! profiles:
//!   deep:
//!     max_tokens_per_job: 1000
//!     max_identifiers_per_job: 500
//! provider:
//!   type: fixture
//!   path: fixtures/products.json
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use bookarb_core::{CostTable, JobPolicy};

use crate::cache::CacheConfig;
use crate::resilience::{CircuitBreakerConfig, RetryConfig, TokenBudgetConfig};

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Client facade settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Concurrent upstream lookups per job
    pub max_concurrency: usize,

    /// Timeout for a single provider call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Reconcile the local budget with the provider-reported balance
    pub sync_balance: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            request_timeout: Duration::from_secs(30),
            sync_balance: true,
        }
    }
}

/// Which provider to build, plus its provider-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Registered provider type, e.g. "http" or "fixture"
    #[serde(rename = "type")]
    pub kind: String,

    /// Remaining keys are handed to the provider factory
    #[serde(flatten)]
    pub options: serde_json::Map<String, JsonValue>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "http".to_string(),
            options: serde_json::Map::new(),
        }
    }
}

/// Provider option holding the discovery page size.
pub const PAGE_SIZE_FIELD: &str = "page_size";

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub budget: TokenBudgetConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub client: ClientConfig,
    pub costs: CostTable,

    /// Policy for jobs without a known profile
    pub default_policy: JobPolicy,

    /// Named job policies
    pub profiles: BTreeMap<String, JobPolicy>,

    pub provider: ProviderSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "quick".to_string(),
            JobPolicy {
                max_tokens_per_job: 50,
                max_identifiers_per_job: 25,
                timeout: Duration::from_secs(60),
                min_balance_required: 20,
                ..Default::default()
            },
        );
        profiles.insert("standard".to_string(), JobPolicy::default());
        profiles.insert(
            "deep".to_string(),
            JobPolicy {
                max_tokens_per_job: 1000,
                max_identifiers_per_job: 500,
                timeout: Duration::from_secs(1800),
                min_balance_required: 200,
                ..Default::default()
            },
        );

        Self {
            budget: TokenBudgetConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            client: ClientConfig::default(),
            costs: CostTable::default(),
            default_policy: JobPolicy::default(),
            profiles,
            provider: ProviderSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Policy for a named profile, falling back to the default policy.
    ///
    /// The flag is false when the profile name was not found.
    pub fn policy_for(&self, profile: &str) -> (&JobPolicy, bool) {
        match self.profiles.get(profile) {
            Some(policy) => (policy, true),
            None => (&self.default_policy, false),
        }
    }

    /// Provider factory options with `page_size` taken from the cost table.
    ///
    /// Discovery is charged per page, so the provider must page results the
    /// same way the estimator counts them.
    pub fn provider_options(&self) -> JsonValue {
        let mut options = self.provider.options.clone();
        options
            .entry(PAGE_SIZE_FIELD)
            .or_insert_with(|| JsonValue::from(self.costs.discovery_page_size));
        JsonValue::Object(options)
    }

    /// Reject values that would make the runtime stall or divide by zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.capacity == 0 {
            return Err(ConfigError::Invalid("budget.capacity must be > 0".into()));
        }
        let rate = self.budget.refill_rate_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Invalid(
                "budget.refill_rate_per_second must be a positive number".into(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if self.client.max_concurrency == 0 {
            return Err(ConfigError::Invalid("client.max_concurrency must be > 0".into()));
        }
        if self.costs.discovery_page_size == 0 {
            return Err(ConfigError::Invalid(
                "costs.discovery_page_size must be > 0".into(),
            ));
        }
        if let Some(page_size) = self.provider.options.get(PAGE_SIZE_FIELD) {
            if page_size.as_u64() != Some(u64::from(self.costs.discovery_page_size)) {
                return Err(ConfigError::Invalid(format!(
                    "provider.page_size ({}) must match costs.discovery_page_size ({})",
                    page_size, self.costs.discovery_page_size
                )));
            }
        }

        let policies = std::iter::once(("default_policy", &self.default_policy))
            .chain(self.profiles.iter().map(|(name, p)| (name.as_str(), p)));
        for (name, policy) in policies {
            if policy.timeout.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{}: timeout_seconds must be > 0",
                    name
                )));
            }
            if policy.max_identifiers_per_job == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}: max_identifiers_per_job must be > 0",
                    name
                )));
            }
        }

        Ok(())
    }
}

// Humantime serde support
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookarb_core::IdentifierCheck;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.costs.discovery_page_cost, 10);
        assert_eq!(config.cache.pricing_ttl, Duration::from_secs(1800));
        assert!(config.profiles.contains_key("deep"));
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
budget:
  capacity: 300
  refill_rate_per_second: 0.5
circuit_breaker:
  failure_threshold: 3
  recovery_timeout: 2m
cache:
  pricing_ttl: 10m
  rank_ttl: 1h 30m
costs:
  discovery_page_cost: 12
default_policy:
  max_tokens_per_job: 150
  timeout_seconds: 90
profiles:
  nightly:
    max_tokens_per_job: 900
    max_identifiers_per_job: 400
provider:
  type: fixture
  path: fixtures/products.json
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.budget.capacity, 300);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.cache.rank_ttl, Duration::from_secs(5400));
        assert_eq!(config.costs.discovery_page_cost, 12);
        assert_eq!(config.costs.item_detail_cost, 1);
        assert_eq!(config.default_policy.timeout, Duration::from_secs(90));
        assert_eq!(config.provider.kind, "fixture");
        assert_eq!(config.provider_options()["path"], "fixtures/products.json");

        // Profiles in the file replace the built-in set
        assert!(config.profiles.contains_key("nightly"));
        assert!(!config.profiles.contains_key("deep"));
    }

    #[test]
    fn test_provider_page_size_follows_cost_table() {
        let yaml = "costs:\n  discovery_page_size: 25\nprovider:\n  type: fixture\n  path: books.json\n";
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        let options = config.provider_options();
        assert_eq!(options["page_size"], 25);
        assert_eq!(options["path"], "books.json");

        // Matching explicit value is fine
        let yaml = "costs:\n  discovery_page_size: 25\nprovider:\n  type: http\n  page_size: 25\n";
        assert!(RuntimeConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_validation_rejects_page_size_mismatch() {
        let yaml = "provider:\n  type: http\n  page_size: 50\n";
        let err = RuntimeConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let msg = err.to_string();
        assert!(msg.contains("provider.page_size (50)"));
        assert!(msg.contains("costs.discovery_page_size (10)"));
    }

    #[test]
    fn test_policy_lookup_falls_back() {
        let config = RuntimeConfig::default();
        let (policy, found) = config.policy_for("deep");
        assert!(found);
        assert_eq!(policy.max_tokens_per_job, 1000);

        let (policy, found) = config.policy_for("missing");
        assert!(!found);
        assert_eq!(policy, &config.default_policy);
    }

    #[test]
    fn test_validation_rejects_zero_rate() {
        let err = RuntimeConfig::from_yaml("budget:\n  refill_rate_per_second: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let yaml = "profiles:\n  broken:\n    timeout_seconds: 0\n";
        let err = RuntimeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_bad_duration_is_parse_error() {
        let err = RuntimeConfig::from_yaml("cache:\n  pricing_ttl: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn test_example_config_is_valid() {
        let yaml = include_str!("../../../config/bookarb.example.yaml");
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.provider.kind, "fixture");
        assert_eq!(config.profiles.len(), 3);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.default_policy.identifier_check, IdentifierCheck::Opaque);
        assert_eq!(config.profiles["deep"].identifier_check, IdentifierCheck::BookCodes);
    }
}
