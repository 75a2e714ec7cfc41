//! Shared value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Volatility class of provider data. Each category has its own cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Slow-changing attributes: title, author, binding, category
    Metadata,

    /// Current prices and offers
    Pricing,

    /// Sales rank and rank history
    Rank,
}

impl DataCategory {
    /// All categories in a fixed order.
    pub const ALL: [DataCategory; 3] = [
        DataCategory::Metadata,
        DataCategory::Pricing,
        DataCategory::Rank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Metadata => "metadata",
            DataCategory::Pricing => "pricing",
            DataCategory::Rank => "rank",
        }
    }

    /// Category a top-level payload field belongs to.
    ///
    /// Unknown fields are treated as metadata.
    pub fn of_field(field: &str) -> DataCategory {
        if PRICING_FIELDS.contains(&field) {
            DataCategory::Pricing
        } else if RANK_FIELDS.contains(&field) {
            DataCategory::Rank
        } else {
            DataCategory::Metadata
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PRICING_FIELDS: &[&str] = &[
    "buy_box_price",
    "new_price",
    "used_price",
    "list_price",
    "lowest_fba_price",
    "offer_count",
    "offers",
    "price_history",
];

const RANK_FIELDS: &[&str] = &[
    "sales_rank",
    "sales_rank_history",
    "rank_drops_30",
    "rank_drops_90",
    "monthly_sold",
];

/// Errors turning a provider payload into a [`ProductRecord`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("Payload for {0} is not a JSON object")]
    NotAnObject(String),

    #[error("Payload for {0} is empty")]
    Empty(String),
}

/// Provider data for one identifier, split by volatility category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Normalised identifier
    pub identifier: String,

    /// Metadata fields (object)
    pub metadata: Value,

    /// Pricing fields (object)
    pub pricing: Value,

    /// Rank fields (object)
    pub rank: Value,

    /// When the data was fetched from the provider
    pub fetched_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Split a raw provider payload into categories by field name.
    pub fn from_payload(identifier: impl Into<String>, payload: &Value) -> Result<Self, PayloadError> {
        let identifier = identifier.into();
        let object = payload
            .as_object()
            .ok_or_else(|| PayloadError::NotAnObject(identifier.clone()))?;

        if object.is_empty() {
            return Err(PayloadError::Empty(identifier));
        }

        let mut metadata = Map::new();
        let mut pricing = Map::new();
        let mut rank = Map::new();

        for (field, value) in object {
            let target = match DataCategory::of_field(field) {
                DataCategory::Metadata => &mut metadata,
                DataCategory::Pricing => &mut pricing,
                DataCategory::Rank => &mut rank,
            };
            target.insert(field.clone(), value.clone());
        }

        Ok(Self {
            identifier,
            metadata: Value::Object(metadata),
            pricing: Value::Object(pricing),
            rank: Value::Object(rank),
            fetched_at: Utc::now(),
        })
    }

    /// Reassemble a record from cached category values.
    pub fn from_parts(
        identifier: impl Into<String>,
        metadata: Value,
        pricing: Value,
        rank: Value,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            metadata,
            pricing,
            rank,
            fetched_at,
        }
    }

    /// Value held for a category.
    pub fn category(&self, category: DataCategory) -> &Value {
        match category {
            DataCategory::Metadata => &self.metadata,
            DataCategory::Pricing => &self.pricing,
            DataCategory::Rank => &self.rank,
        }
    }
}

/// Provider-side discovery query (product finder).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// Opaque filter object forwarded to the provider
    #[serde(default)]
    pub filters: Value,

    /// Upper bound on identifiers to discover
    pub max_results: u32,
}

/// What a job should look at: explicit identifiers, a discovery query, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Identifiers supplied directly by the caller
    #[serde(default)]
    pub seed_identifiers: Vec<String>,

    /// Optional discovery query run before detail lookups
    #[serde(default)]
    pub query: Option<DiscoveryQuery>,
}

impl DiscoveryConfig {
    /// Job over an explicit identifier list only.
    pub fn from_identifiers<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seed_identifiers: identifiers.into_iter().map(Into::into).collect(),
            query: None,
        }
    }

    /// Add a discovery query.
    pub fn with_query(mut self, filters: Value, max_results: u32) -> Self {
        self.query = Some(DiscoveryQuery {
            filters,
            max_results,
        });
        self
    }

    /// Maximum results the discovery phase may add.
    pub fn discovery_results(&self) -> u32 {
        self.query.as_ref().map(|q| q.max_results).unwrap_or(0)
    }
}

/// Opaque scoring parameters handed to the downstream scorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoringConfig(pub Value);

/// Pre-flight cost preview for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Tokens the job is expected to spend (upper bound, cache hits spend less)
    pub estimated_tokens: u64,

    /// Token balance when the estimate was taken
    pub current_balance: u64,

    /// Per-job token cap
    pub max_allowed: u64,

    /// Minimum balance required to start
    pub min_required: u64,

    /// `estimated_tokens <= max_allowed && current_balance >= min_required`
    pub safe_to_proceed: bool,

    /// Present when the job is unsafe or will have to wait for refill
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_split_by_category() {
        let payload = json!({
            "title": "The Hobbit",
            "binding": "Paperback",
            "buy_box_price": 1299,
            "offer_count": 14,
            "sales_rank": 5321,
            "monthly_sold": 40
        });

        let record = ProductRecord::from_payload("0547928211", &payload).unwrap();
        assert_eq!(record.metadata["title"], "The Hobbit");
        assert_eq!(record.pricing["buy_box_price"], 1299);
        assert_eq!(record.rank["sales_rank"], 5321);
        assert!(record.pricing.get("title").is_none());
        assert_eq!(record.category(DataCategory::Rank)["monthly_sold"], 40);
    }

    #[test]
    fn test_payload_must_be_object() {
        let err = ProductRecord::from_payload("0547928211", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, PayloadError::NotAnObject(_)));

        let err = ProductRecord::from_payload("0547928211", &json!({})).unwrap_err();
        assert!(matches!(err, PayloadError::Empty(_)));
    }

    #[test]
    fn test_discovery_results() {
        let config = DiscoveryConfig::from_identifiers(["0547928211"]);
        assert_eq!(config.discovery_results(), 0);

        let config = config.with_query(json!({"category": "textbooks"}), 45);
        assert_eq!(config.discovery_results(), 45);
    }

    #[test]
    fn test_category_serde_names() {
        assert_eq!(serde_json::to_string(&DataCategory::Pricing).unwrap(), "\"pricing\"");
        assert_eq!(DataCategory::Rank.to_string(), "rank");
    }
}
