//! Per-job spending and time policy.
//!
//! These checks are synchronous and free: a job that violates its policy is
//! rejected before any token is spent or any network call is made.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::identifier::IdentifierCheck;
use crate::types::CostEstimate;

/// Limits applied to a single job. Immutable once the job starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPolicy {
    /// Hard cap on tokens a job may be estimated to spend
    pub max_tokens_per_job: u64,

    /// Identifiers beyond this count are dropped after dedup
    pub max_identifiers_per_job: usize,

    /// Wall-clock budget for the whole job (in seconds)
    #[serde(with = "duration_secs", rename = "timeout_seconds")]
    pub timeout: Duration,

    /// Balance required before a job may start
    pub min_balance_required: u64,

    /// Screening applied to seed and discovered identifiers
    pub identifier_check: IdentifierCheck,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_tokens_per_job: 200,
            max_identifiers_per_job: 100,
            timeout: Duration::from_secs(300),
            min_balance_required: 50,
            identifier_check: IdentifierCheck::Opaque,
        }
    }
}

/// Why a job was refused before it started.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRejection {
    #[error("Job too expensive: estimated {estimated_tokens} tokens exceeds the per-job cap of {max_allowed}. {suggestion}")]
    JobTooExpensive {
        estimated_tokens: u64,
        max_allowed: u64,
        suggestion: String,
    },

    #[error("Insufficient tokens: balance {balance} is below the required minimum of {required}")]
    #[serde(rename = "INSUFFICIENT_TOKENS")]
    InsufficientBudget { balance: u64, required: u64 },

    #[error("No valid identifiers: all {invalid} seed identifiers were rejected and no discovery query was given")]
    NoValidIdentifiers { invalid: usize },
}

impl JobRejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            JobRejection::JobTooExpensive { .. } => "JOB_TOO_EXPENSIVE",
            JobRejection::InsufficientBudget { .. } => "INSUFFICIENT_TOKENS",
            JobRejection::NoValidIdentifiers { .. } => "NO_VALID_IDENTIFIERS",
        }
    }
}

impl JobPolicy {
    /// Reject when the estimate exceeds the per-job cap.
    pub fn check_cost(
        &self,
        estimated_tokens: u64,
        suggestion: impl FnOnce() -> String,
    ) -> Result<(), JobRejection> {
        if estimated_tokens > self.max_tokens_per_job {
            return Err(JobRejection::JobTooExpensive {
                estimated_tokens,
                max_allowed: self.max_tokens_per_job,
                suggestion: suggestion(),
            });
        }
        Ok(())
    }

    /// Reject when the balance is below the minimum needed to start.
    pub fn check_balance(&self, balance: u64) -> Result<(), JobRejection> {
        if balance < self.min_balance_required {
            return Err(JobRejection::InsufficientBudget {
                balance,
                required: self.min_balance_required,
            });
        }
        Ok(())
    }

    /// Build a cost preview for an estimate against a balance.
    pub fn assess(&self, estimated_tokens: u64, balance: u64) -> CostEstimate {
        let within_cap = estimated_tokens <= self.max_tokens_per_job;
        let funded = balance >= self.min_balance_required;

        let warning_message = if !within_cap {
            Some(format!(
                "Estimated {} tokens exceeds the per-job cap of {}; narrow the job",
                estimated_tokens, self.max_tokens_per_job
            ))
        } else if !funded {
            Some(format!(
                "Balance of {} tokens is below the {} required to start; wait for refill",
                balance, self.min_balance_required
            ))
        } else if estimated_tokens > balance {
            Some(format!(
                "Estimated {} tokens exceeds the current balance of {}; the job will wait for refill",
                estimated_tokens, balance
            ))
        } else {
            None
        };

        CostEstimate {
            estimated_tokens,
            current_balance: balance,
            max_allowed: self.max_tokens_per_job,
            min_required: self.min_balance_required,
            safe_to_proceed: within_cap && funded,
            warning_message,
        }
    }
}
