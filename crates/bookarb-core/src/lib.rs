//! # bookarb-core
//!
//! Deterministic, network-free building blocks for metered book-data jobs.
//!
//! This crate answers, before a single token is spent:
//! - Which identifiers will this job look up?
//! - How many tokens will it cost?
//! - Does the job fit its policy and the current balance?
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: Nothing here touches the network or the clock-driven budget
//! 2. **Stable dedup**: Identifiers keep their first-occurrence order
//! 3. **Configurable pricing**: Unit costs come from a [`CostTable`]
//!
//! ## Example
//!
//! ```rust
//! use bookarb_core::{plan_job, CostEstimator, DiscoveryConfig, JobPolicy};
//!
//! let discovery = DiscoveryConfig::from_identifiers(["0547928211", "0547928211", "B00ZV9PXP2"]);
//! let plan = plan_job(&discovery, &JobPolicy::default(), &CostEstimator::default());
//!
//! assert_eq!(plan.seeds.accepted.len(), 2);
//! assert_eq!(plan.estimated_tokens, 2);
//! ```

pub mod cost;
pub mod identifier;
pub mod policy;
pub mod types;

// Re-export main types at crate root
pub use cost::{CostEstimator, CostTable};
pub use identifier::{
    classify, dedup_identifiers, normalize_identifier, prepare_identifiers, IdentifierCheck,
    IdentifierKind, PreparedIdentifiers,
};
pub use policy::{JobPolicy, JobRejection};
pub use types::{
    CostEstimate, DataCategory, DiscoveryConfig, DiscoveryQuery, PayloadError, ProductRecord,
    ScoringConfig,
};

use serde::{Deserialize, Serialize};

/// The static shape of a job, computed before anything is spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPlan {
    /// Prepared seed identifiers
    pub seeds: PreparedIdentifiers,

    /// Discovery results wanted: the query's limit, bounded by the room the
    /// seeds leave under the cap
    pub discovery_results: usize,

    /// Discovery pages to request
    pub discovery_pages: u32,

    /// Identifiers the job may look up in total (seeds plus discovery), capped
    pub item_count: usize,

    /// `CostEstimator::estimate(discovery_pages, item_count)`
    pub estimated_tokens: u64,
}

/// Plan a job: prepare seeds, size discovery, and estimate the token cost.
///
/// The estimate is an upper bound. Discovery may return fewer results and
/// cache hits spend nothing. Seeds that already fill the cap leave no room
/// for discovery, so no pages are planned.
pub fn plan_job(
    discovery: &DiscoveryConfig,
    policy: &JobPolicy,
    estimator: &CostEstimator,
) -> JobPlan {
    let cap = policy.max_identifiers_per_job;
    let seeds = prepare_identifiers(&discovery.seed_identifiers, cap, policy.identifier_check);

    let room = cap.saturating_sub(seeds.accepted.len());
    let discovery_results = (discovery.discovery_results() as usize).min(room);
    let discovery_pages = estimator.pages_for(discovery_results as u32);

    let item_count = seeds.accepted.len() + discovery_results;
    let estimated_tokens = estimator.estimate(discovery_pages, item_count);

    JobPlan {
        seeds,
        discovery_results,
        discovery_pages,
        item_count,
        estimated_tokens,
    }
}

/// Run the synchronous policy checks for a plan against a balance.
///
/// A job whose seeds were all rejected and that has nothing to discover is
/// refused first. Cost is checked before balance, so an oversized job is
/// reported as too expensive even when the balance is also low.
pub fn check_plan(
    plan: &JobPlan,
    policy: &JobPolicy,
    estimator: &CostEstimator,
    balance: u64,
) -> Result<(), JobRejection> {
    if plan.item_count == 0 && !plan.seeds.invalid.is_empty() {
        return Err(JobRejection::NoValidIdentifiers {
            invalid: plan.seeds.invalid.len(),
        });
    }
    policy.check_cost(plan.estimated_tokens, || {
        estimator.suggest_scope(
            policy.max_tokens_per_job,
            plan.discovery_pages,
            plan.item_count,
        )
    })?;
    policy.check_balance(balance)
}
