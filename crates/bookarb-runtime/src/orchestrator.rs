//! Job orchestration for metered book-data lookups.
//!
//! [`ArbitrageRuntime`] is the application context: it owns the one budget,
//! breaker and cache every job shares, and exposes the caller-facing
//! operations:
//! - `estimate_cost`: cost preview, spends nothing
//! - `run_job`: guard, discover, fetch, score, all under the job timeout
//! - `health` / `shutdown`

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bookarb_core::{
    prepare_identifiers, CostEstimate, DiscoveryConfig, DiscoveryQuery, JobPlan, JobPolicy,
    JobRejection, ScoringConfig,
};

use crate::cache::CacheStats;
use crate::client::{FetchError, ResilientProviderClient};
use crate::config::{ConfigError, RuntimeConfig};
use crate::guard::{JobGuard, ValidatedJob};
use crate::metrics::MetricsSnapshot;
use crate::providers::{DataProvider, ProviderError, ProviderRegistry};
use crate::resilience::{CircuitStatus, TokenBudgetStats};
use crate::scoring::{PassthroughScorer, ResultScorer, ScoredResult};

/// Errors building the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Terminal outcome of a job that produced no result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error(transparent)]
    Rejected(#[from] JobRejection),

    #[error("Circuit open: provider calls are suspended")]
    CircuitOpen,

    #[error("Job timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Discovery failed: {0}")]
    Discovery(#[source] FetchError),
}

impl JobError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Rejected(rejection) => rejection.code(),
            JobError::CircuitOpen => "CIRCUIT_OPEN",
            JobError::Timeout { .. } => "JOB_TIMEOUT",
            JobError::Discovery(_) => "DISCOVERY_FAILED",
        }
    }
}

/// A lookup that failed inside an otherwise successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub identifier: String,
    pub code: String,
    pub message: String,
}

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub profile: String,

    /// Pre-flight estimate the job was admitted on
    pub estimate: CostEstimate,

    /// Identifiers looked up after discovery, dedup and cap
    pub identifiers_requested: usize,

    pub results: Vec<ScoredResult>,
    pub failures: Vec<ItemFailure>,

    /// Lookups answered from cache
    pub cache_hits: usize,

    /// Tokens charged for this job
    pub tokens_spent: u64,

    pub elapsed_ms: u64,
}

/// Point-in-time view of runtime health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub provider: String,
    pub provider_healthy: bool,
    pub circuit: CircuitStatus,
    pub consecutive_failures: u32,
    pub budget: TokenBudgetStats,
    pub cache: CacheStats,
    pub sweeper_running: bool,
    pub client: MetricsSnapshot,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.provider_healthy && self.circuit != CircuitStatus::Open
    }
}

/// Application context shared by every job.
pub struct ArbitrageRuntime {
    config: RuntimeConfig,
    client: Arc<ResilientProviderClient>,
    guard: JobGuard,
    scorer: Arc<dyn ResultScorer>,
}

impl ArbitrageRuntime {
    pub fn builder() -> ArbitrageRuntimeBuilder {
        ArbitrageRuntimeBuilder::new()
    }

    /// Cost preview under the default policy. Spends nothing.
    pub fn estimate_cost(&self, discovery: &DiscoveryConfig) -> CostEstimate {
        self.guard.estimate(discovery, &self.config.default_policy)
    }

    /// Cost preview under a named profile. Spends nothing.
    pub fn estimate_cost_for(&self, profile: &str, discovery: &DiscoveryConfig) -> CostEstimate {
        self.guard.estimate(discovery, &self.policy(profile))
    }

    /// Run a job end to end.
    ///
    /// Rejections happen before any network call. Once admitted, discovery,
    /// lookups and scoring share the policy timeout; on expiry in-flight
    /// lookups are dropped and partial results are discarded.
    pub async fn run_job(
        &self,
        profile: &str,
        discovery: &DiscoveryConfig,
        scoring: &ScoringConfig,
    ) -> Result<JobResult, JobError> {
        let policy = self.policy(profile);
        let job = self.guard.validate(discovery, &policy)?;
        let timeout = policy.timeout;

        tracing::info!(
            profile,
            estimated_tokens = job.plan.estimated_tokens,
            items = job.plan.item_count,
            balance = job.balance,
            "Job started"
        );

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(timeout, self.execute(profile, &job, discovery, scoring)).await;

        match outcome {
            Ok(Ok(mut result)) => {
                result.elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    profile,
                    results = result.results.len(),
                    failures = result.failures.len(),
                    tokens_spent = result.tokens_spent,
                    elapsed_ms = result.elapsed_ms,
                    "Job finished"
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                tracing::warn!(profile, code = e.code(), error = %e, "Job failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(
                    profile,
                    timeout = ?timeout,
                    balance = self.client.budget().balance_tokens(),
                    "Job timed out, partial results discarded"
                );
                Err(JobError::Timeout { timeout })
            }
        }
    }

    async fn execute(
        &self,
        profile: &str,
        job: &ValidatedJob,
        discovery: &DiscoveryConfig,
        scoring: &ScoringConfig,
    ) -> Result<JobResult, JobError> {
        let costs = *self.client.estimator().table();
        let mut tokens_spent = 0;

        let identifiers = match &discovery.query {
            Some(query) if job.plan.discovery_pages > 0 => {
                let (found, pages) = self.discover(query, &job.plan).await?;
                tokens_spent += pages as u64 * costs.discovery_page_cost;

                let merged = job.seeds().iter().chain(found.iter());
                prepare_identifiers(
                    merged,
                    job.policy.max_identifiers_per_job,
                    job.policy.identifier_check,
                )
                .accepted
            }
            Some(_) => {
                tracing::debug!(
                    seeds = job.seeds().len(),
                    "No room under the identifier cap, skipping discovery"
                );
                job.seeds().to_vec()
            }
            None => job.seeds().to_vec(),
        };

        let outcomes = self.client.fetch_many(&identifiers).await;

        let mut records = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        let mut cache_hits = 0;
        let mut circuit_rejections = 0;

        for (identifier, outcome) in outcomes {
            match outcome {
                Ok(fetched) => {
                    if fetched.from_cache {
                        cache_hits += 1;
                    } else {
                        tokens_spent += costs.item_detail_cost;
                    }
                    records.push(fetched.record);
                }
                Err(e) => {
                    if e.charged() {
                        tokens_spent += costs.item_detail_cost;
                    }
                    if e == FetchError::CircuitOpen {
                        circuit_rejections += 1;
                    }
                    failures.push(ItemFailure {
                        identifier,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if records.is_empty() && circuit_rejections > 0 && circuit_rejections == failures.len() {
            return Err(JobError::CircuitOpen);
        }

        let results = self.scorer.score(records, scoring);

        Ok(JobResult {
            profile: profile.to_string(),
            estimate: job.policy.assess(job.plan.estimated_tokens, job.balance),
            identifiers_requested: identifiers.len(),
            results,
            failures,
            cache_hits,
            tokens_spent,
            elapsed_ms: 0,
        })
    }

    /// Page through a discovery query, up to the planned pages and results.
    /// Returns identifiers and pages charged.
    async fn discover(
        &self,
        query: &DiscoveryQuery,
        plan: &JobPlan,
    ) -> Result<(Vec<String>, u32), JobError> {
        let limit = plan.discovery_results;
        let mut found = Vec::new();
        let mut pages = 0;

        for page in 0..plan.discovery_pages {
            let result = self
                .client
                .discover_page(query, page)
                .await
                .map_err(|e| match e {
                    FetchError::CircuitOpen => JobError::CircuitOpen,
                    other => JobError::Discovery(other),
                })?;
            pages += 1;

            let exhausted = result.identifiers.is_empty();
            found.extend(result.identifiers);
            if exhausted || found.len() >= limit {
                break;
            }
        }

        found.truncate(limit);
        tracing::debug!(found = found.len(), pages, "Discovery complete");
        Ok((found, pages))
    }

    /// Policy for a profile name; unknown names use the default policy.
    pub fn policy(&self, profile: &str) -> JobPolicy {
        let (policy, found) = self.config.policy_for(profile);
        if !found {
            tracing::warn!(profile, "Unknown job profile, using default policy");
        }
        policy.clone()
    }

    pub async fn health(&self) -> HealthReport {
        let breaker = self.client.breaker();
        let cache = self.client.cache();

        HealthReport {
            provider: self.client.provider().name().to_string(),
            provider_healthy: self.client.provider().health_check().await,
            circuit: breaker.state().status(),
            consecutive_failures: breaker.consecutive_failures(),
            budget: self.client.budget().stats(),
            cache: cache.stats(),
            sweeper_running: cache.sweeper_running(),
            client: self.client.metrics().snapshot(),
        }
    }

    /// Stop background work. Jobs can still run afterwards.
    pub fn shutdown(&self) {
        self.client.cache().shutdown();
        tracing::info!("Runtime shut down");
    }

    pub fn client(&self) -> &Arc<ResilientProviderClient> {
        &self.client
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

/// Builder for [`ArbitrageRuntime`].
pub struct ArbitrageRuntimeBuilder {
    provider: Option<Arc<dyn DataProvider>>,
    registry: ProviderRegistry,
    config: RuntimeConfig,
    scorer: Arc<dyn ResultScorer>,
}

impl ArbitrageRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            registry: ProviderRegistry::with_defaults(),
            config: RuntimeConfig::default(),
            scorer: Arc::new(PassthroughScorer),
        }
    }

    /// Use this provider instead of building one from `config.provider`.
    pub fn provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Registry used to build the configured provider.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn ResultScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Validate configuration, build the provider and start the cache sweeper
    /// when called inside a Tokio runtime.
    pub fn build(self) -> Result<ArbitrageRuntime, RuntimeError> {
        self.config.validate()?;

        let provider = match self.provider {
            Some(provider) => provider,
            None => self
                .registry
                .create(&self.config.provider.kind, &self.config.provider_options())?,
        };

        let client = Arc::new(ResilientProviderClient::new(provider, &self.config));
        let guard = JobGuard::new(*client.estimator(), client.budget().clone());

        if tokio::runtime::Handle::try_current().is_ok() {
            client.cache().start_sweeper();
        } else {
            tracing::debug!("No Tokio runtime, cache sweeper not started");
        }

        tracing::info!(
            provider = client.provider().name(),
            capacity = self.config.budget.capacity,
            "Runtime ready"
        );

        Ok(ArbitrageRuntime {
            config: self.config,
            client,
            guard,
            scorer: self.scorer,
        })
    }
}

impl Default for ArbitrageRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
