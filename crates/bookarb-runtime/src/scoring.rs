//! Hand-off point for downstream scoring.
//!
//! The runtime does not rank opportunities itself. It passes fetched records
//! and the job's opaque [`ScoringConfig`] to a [`ResultScorer`].

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bookarb_core::{ProductRecord, ScoringConfig};

/// A record with whatever the scorer attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub record: ProductRecord,

    /// Higher is better; `None` when the scorer does not rank
    pub score: Option<f64>,

    /// Scorer-specific detail
    #[serde(default)]
    pub details: JsonValue,
}

/// Turns fetched records into scored results. Must be deterministic.
pub trait ResultScorer: Send + Sync {
    fn score(&self, records: Vec<ProductRecord>, config: &ScoringConfig) -> Vec<ScoredResult>;

    fn name(&self) -> &str;
}

/// Returns records unscored, in fetch order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughScorer;

impl ResultScorer for PassthroughScorer {
    fn score(&self, records: Vec<ProductRecord>, _config: &ScoringConfig) -> Vec<ScoredResult> {
        records
            .into_iter()
            .map(|record| ScoredResult {
                record,
                score: None,
                details: JsonValue::Null,
            })
            .collect()
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_passthrough_keeps_order() {
        let records: Vec<_> = ["0441172717", "B00B7NPRY8"]
            .iter()
            .map(|id| ProductRecord::from_payload(*id, &json!({ "title": id })).unwrap())
            .collect();

        let scored = PassthroughScorer.score(records, &ScoringConfig::default());
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].record.identifier, "0441172717");
        assert!(scored.iter().all(|s| s.score.is_none()));
    }
}
