//! # bookarb-runtime
//!
//! Async side of bookarb: spends provider tokens safely.
//!
//! Every upstream call is metered by a shared [`TokenBudget`], guarded by a
//! [`CircuitBreaker`] and short-circuited by the [`TieredCache`] when the
//! data is still fresh. [`ArbitrageRuntime`] ties these together behind two
//! caller-facing operations:
//!
//! - `estimate_cost`: what a job would cost, against the live balance
//! - `run_job`: admit, discover, look up and score, under the job timeout
//!
//! Pre-flight checks (cost cap, minimum balance) live in `bookarb-core` and
//! never touch the network.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bookarb_core::{DiscoveryConfig, ScoringConfig};
//! use bookarb_runtime::{ArbitrageRuntime, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("bookarb.yaml")?;
//! let runtime = ArbitrageRuntime::builder().config(config).build()?;
//!
//! let discovery = DiscoveryConfig::from_identifiers(["0441172717", "B00B7NPRY8"]);
//! println!("{:?}", runtime.estimate_cost(&discovery));
//!
//! let result = runtime.run_job("standard", &discovery, &ScoringConfig::default()).await?;
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod guard;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod scoring;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheConfig, CacheEntry, CacheStats, TieredCache};
pub use client::{FetchError, FetchedRecord, ResilientProviderClient};
pub use config::{ClientConfig, ConfigError, ProviderSettings, RuntimeConfig};
pub use guard::{JobGuard, ValidatedJob};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use orchestrator::{
    ArbitrageRuntime, ArbitrageRuntimeBuilder, HealthReport, ItemFailure, JobError, JobResult,
    RuntimeError,
};
pub use providers::{
    DataProvider, DiscoveryPage, ProviderError, ProviderFactory, ProviderRegistry,
    ProviderResponse,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus, Permit, RetryConfig,
    TokenBudget, TokenBudgetConfig, TokenBudgetStats,
};
pub use scoring::{PassthroughScorer, ResultScorer, ScoredResult};
