//! Pre-flight job checks against the live budget.
//!
//! Runs before any network call: identifier prep, cost estimate, policy cap
//! and minimum balance. A rejected job leaves the budget untouched.

use std::sync::Arc;

use bookarb_core::{
    check_plan, plan_job, CostEstimate, CostEstimator, DiscoveryConfig, JobPlan, JobPolicy,
    JobRejection,
};

use crate::resilience::TokenBudget;

/// A job that passed every pre-flight check.
#[derive(Debug, Clone)]
pub struct ValidatedJob {
    pub plan: JobPlan,
    pub policy: JobPolicy,

    /// Balance observed when the job was admitted
    pub balance: u64,
}

impl ValidatedJob {
    /// Deduplicated, capped seed identifiers.
    pub fn seeds(&self) -> &[String] {
        &self.plan.seeds.accepted
    }
}

pub struct JobGuard {
    estimator: CostEstimator,
    budget: Arc<TokenBudget>,
}

impl JobGuard {
    pub fn new(estimator: CostEstimator, budget: Arc<TokenBudget>) -> Self {
        Self { estimator, budget }
    }

    /// Cost preview. Spends nothing.
    pub fn estimate(&self, discovery: &DiscoveryConfig, policy: &JobPolicy) -> CostEstimate {
        let plan = plan_job(discovery, policy, &self.estimator);
        policy.assess(plan.estimated_tokens, self.budget.balance_tokens())
    }

    /// Admit or reject a job. Cost is checked before balance.
    pub fn validate(
        &self,
        discovery: &DiscoveryConfig,
        policy: &JobPolicy,
    ) -> Result<ValidatedJob, JobRejection> {
        let plan = plan_job(discovery, policy, &self.estimator);
        let balance = self.budget.balance_tokens();

        if let Err(rejection) = check_plan(&plan, policy, &self.estimator, balance) {
            tracing::warn!(
                code = rejection.code(),
                estimated_tokens = plan.estimated_tokens,
                balance,
                "Job rejected before start"
            );
            return Err(rejection);
        }

        if plan.seeds.dropped_over_cap > 0 {
            tracing::info!(
                dropped = plan.seeds.dropped_over_cap,
                cap = policy.max_identifiers_per_job,
                "Seed identifiers truncated to policy cap"
            );
        }

        Ok(ValidatedJob {
            plan,
            policy: policy.clone(),
            balance,
        })
    }
}
