//! Data provider abstractions for bookarb-runtime.
//!
//! A provider is the metered upstream: it answers detail lookups for one
//! identifier and paged discovery queries. Token pricing is not the
//! provider's concern; the client facade charges the budget before calling.
//!
//! ## Security
//!
//! Providers that need an API key use the [`secrets`] module so the key
//! never appears in logs or `Debug` output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

use bookarb_core::DiscoveryQuery;

mod factory;
mod fixture;
mod http;
pub mod secrets;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use fixture::{FixtureProvider, FixtureProviderFactory};
pub use http::{HttpProvider, HttpProviderFactory};
pub use secrets::{ApiCredential, KeyOrigin};

/// Errors from data providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected: {status} - {message}")]
    Client { status: u16, message: String },

    #[error("Unknown identifier: {0}")]
    NotFound(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transport-level failures worth retrying. Application-level rejections
    /// (4xx, unknown identifiers, bad payloads) are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Server { .. }
        )
    }

    /// Provider-suggested delay before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A provider response plus the quota bookkeeping the provider reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse<T> {
    pub data: T,

    /// Tokens remaining upstream after this call
    pub tokens_left: Option<u64>,

    /// Tokens the provider charged for this call
    pub tokens_consumed: Option<u64>,
}

impl<T> ProviderResponse<T> {
    /// Response without quota information.
    pub fn new(data: T) -> Self {
        Self {
            data,
            tokens_left: None,
            tokens_consumed: None,
        }
    }

    pub fn with_tokens_left(mut self, tokens_left: u64) -> Self {
        self.tokens_left = Some(tokens_left);
        self
    }
}

/// One page of discovery results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPage {
    pub identifiers: Vec<String>,

    /// Total matches upstream, when reported
    #[serde(default)]
    pub total_results: Option<u32>,
}

/// Provider abstraction allows swapping upstream backends.
///
/// This is the ONLY place where upstream calls are made. Everything else
/// reaches the provider through the resilient client.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Detail lookup for one identifier. Returns the raw JSON payload.
    async fn fetch_product(
        &self,
        identifier: &str,
    ) -> Result<ProviderResponse<JsonValue>, ProviderError>;

    /// One page (zero-based) of a discovery query.
    async fn discover(
        &self,
        query: &DiscoveryQuery,
        page: u32,
    ) -> Result<ProviderResponse<DiscoveryPage>, ProviderError>;

    /// Check if provider is usable.
    async fn health_check(&self) -> bool;

    /// Get provider name for logs and metrics.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProviderError::Server { status: 503, message: String::new() }.is_transient());
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());

        assert!(!ProviderError::Client { status: 400, message: String::new() }.is_transient());
        assert!(!ProviderError::NotFound("0441172717".into()).is_transient());
        assert!(!ProviderError::Parse("eof".into()).is_transient());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(ProviderError::Transport("x".into()).retry_after(), None);
    }

    #[test]
    fn test_response_builder() {
        let response = ProviderResponse::new(1).with_tokens_left(42);
        assert_eq!(response.tokens_left, Some(42));
        assert_eq!(response.tokens_consumed, None);
    }
}
