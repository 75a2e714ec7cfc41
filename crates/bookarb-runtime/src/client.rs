//! Resilient facade over a [`DataProvider`].
//!
//! Every upstream call goes through one path:
//!
//! 1. Cache lookup. A hit returns immediately and spends nothing.
//! 2. Circuit check. An open circuit rejects before any token is spent.
//! 3. Budget acquire for the call's cost. May suspend until refill.
//! 4. Circuit permit. A refusal here refunds the tokens.
//! 5. Provider call, retried on transient errors within the same charge.
//! 6. Outcome recorded on the breaker, balance synced, cache filled.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;

use bookarb_core::{CostEstimator, DiscoveryQuery, PayloadError, ProductRecord};

use crate::cache::TieredCache;
use crate::config::{ClientConfig, RuntimeConfig};
use crate::metrics::ClientMetrics;
use crate::providers::{DataProvider, DiscoveryPage, ProviderError, ProviderResponse};
use crate::resilience::{CircuitBreaker, RetryConfig, TokenBudget};

/// Why a single lookup failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Circuit open: provider calls are suspended")]
    CircuitOpen,

    #[error("Transient failure persisted after {attempts} attempts: {source}")]
    TransientExhausted {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Provider rejected request: {0}")]
    Upstream(#[source] ProviderError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),
}

impl FetchError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::CircuitOpen => "CIRCUIT_OPEN",
            FetchError::TransientExhausted { .. } => "TRANSIENT_TRANSPORT_FAILURE",
            FetchError::Upstream(_) => "UPSTREAM_REJECTED",
            FetchError::InvalidPayload(_) => "INVALID_PAYLOAD",
        }
    }

    /// Whether the failed lookup was charged against the budget.
    pub fn charged(&self) -> bool {
        !matches!(self, FetchError::CircuitOpen)
    }
}

/// A record plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    pub record: ProductRecord,
    pub from_cache: bool,
}

/// Budgeted, circuit-protected, cached access to the provider.
pub struct ResilientProviderClient {
    provider: Arc<dyn DataProvider>,
    budget: Arc<TokenBudget>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<TieredCache>,
    estimator: CostEstimator,
    retry: RetryConfig,
    config: ClientConfig,
    limiter: Semaphore,
    metrics: ClientMetrics,
}

impl ResilientProviderClient {
    /// Build a client and its budget, breaker and cache from configuration.
    pub fn new(provider: Arc<dyn DataProvider>, config: &RuntimeConfig) -> Self {
        Self {
            provider,
            budget: Arc::new(TokenBudget::new(config.budget.clone())),
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            cache: Arc::new(TieredCache::new(config.cache.clone())),
            estimator: CostEstimator::new(config.costs.clone()),
            retry: config.retry.clone(),
            limiter: Semaphore::new(config.client.max_concurrency.max(1)),
            config: config.client.clone(),
            metrics: ClientMetrics::new(),
        }
    }

    /// Share an existing budget.
    pub fn with_budget(mut self, budget: Arc<TokenBudget>) -> Self {
        self.budget = budget;
        self
    }

    /// Share an existing cache.
    pub fn with_cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Full record for one identifier.
    pub async fn fetch(&self, identifier: &str) -> Result<ProductRecord, FetchError> {
        self.fetch_traced(identifier).await.map(|f| f.record)
    }

    /// Like [`fetch`](Self::fetch), also reporting whether the cache answered.
    pub async fn fetch_traced(&self, identifier: &str) -> Result<FetchedRecord, FetchError> {
        self.metrics.record_request();

        if let Some(record) = self.cache.get_record(identifier).await {
            self.metrics.record_cache_hit();
            tracing::debug!(identifier, "Cache hit");
            return Ok(FetchedRecord {
                record,
                from_cache: true,
            });
        }
        self.metrics.record_cache_miss();

        let cost = self.estimator.table().item_detail_cost;
        let response = self
            .call_upstream(identifier, cost, || self.provider.fetch_product(identifier))
            .await?;

        let record = ProductRecord::from_payload(identifier, &response.data).map_err(|e| {
            self.metrics.record_failure();
            tracing::warn!(identifier, error = %e, "Provider returned unusable payload");
            FetchError::from(e)
        })?;

        self.cache.put_record(&record).await;
        Ok(FetchedRecord {
            record,
            from_cache: false,
        })
    }

    /// One page of a discovery query. Discovery results are not cached.
    pub async fn discover_page(
        &self,
        query: &DiscoveryQuery,
        page: u32,
    ) -> Result<DiscoveryPage, FetchError> {
        self.metrics.record_request();
        let cost = self.estimator.table().discovery_page_cost;
        let subject = format!("discovery page {}", page);

        self.call_upstream(&subject, cost, || self.provider.discover(query, page))
            .await
            .map(|response| response.data)
    }

    /// Fetch many identifiers concurrently, at most `max_concurrency` at a time.
    ///
    /// Outcomes are returned in input order; one failure never aborts the rest.
    pub async fn fetch_many(
        &self,
        identifiers: &[String],
    ) -> Vec<(String, Result<FetchedRecord, FetchError>)> {
        let lookups = identifiers.iter().map(|identifier| async move {
            // The semaphore is never closed
            let _permit = self.limiter.acquire().await.ok();
            (identifier.clone(), self.fetch_traced(identifier).await)
        });
        join_all(lookups).await
    }

    async fn call_upstream<T, F, Fut>(
        &self,
        subject: &str,
        cost: u64,
        call: F,
    ) -> Result<ProviderResponse<T>, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProviderResponse<T>, ProviderError>>,
    {
        if self.breaker.is_open() {
            self.metrics.record_circuit_rejection();
            tracing::warn!(
                subject,
                state = ?self.breaker.state().status(),
                "Circuit open, rejecting without spending tokens"
            );
            return Err(FetchError::CircuitOpen);
        }

        let waited = self.budget.acquire(cost).await;
        self.metrics.record_tokens(cost);
        if !waited.is_zero() {
            tracing::debug!(subject, cost, waited = ?waited, "Acquired tokens after refill wait");
        }

        let Some(permit) = self.breaker.permit() else {
            self.budget.refund(cost);
            self.metrics.unrecord_tokens(cost);
            self.metrics.record_circuit_rejection();
            tracing::warn!(
                subject,
                waited = ?waited,
                state = ?self.breaker.state().status(),
                "Circuit opened while waiting for tokens, refunded"
            );
            return Err(FetchError::CircuitOpen);
        };

        let mut delays = self.retry.delays();
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.metrics.record_upstream_call();

            let outcome = match tokio::time::timeout(self.config.request_timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(self.config.request_timeout)),
            };

            match outcome {
                Ok(response) => {
                    self.breaker.record_success(permit);
                    if self.config.sync_balance {
                        if let Some(tokens_left) = response.tokens_left {
                            self.budget.sync_balance(tokens_left);
                        }
                    }
                    return Ok(response);
                }
                Err(error) if error.is_transient() => match delays.next() {
                    Some(scheduled) => {
                        let delay = self.retry.honour_hint(scheduled, error.retry_after());
                        self.metrics.record_retry();
                        tracing::debug!(subject, attempts, delay = ?delay, error = %error, "Retrying transient failure");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        self.breaker.record_failure(permit);
                        self.metrics.record_failure();
                        tracing::warn!(
                            subject,
                            attempts,
                            error = %error,
                            failures = self.breaker.consecutive_failures(),
                            "Upstream call failed after retries"
                        );
                        return Err(FetchError::TransientExhausted {
                            attempts,
                            source: error,
                        });
                    }
                },
                Err(error) => {
                    // The provider answered, so it is reachable
                    self.breaker.record_success(permit);
                    self.metrics.record_failure();
                    tracing::info!(subject, error = %error, "Provider rejected request");
                    return Err(FetchError::Upstream(error));
                }
            }
        }
    }

    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    pub fn budget(&self) -> &Arc<TokenBudget> {
        &self.budget
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn estimator(&self) -> &CostEstimator {
        &self.estimator
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }
}
