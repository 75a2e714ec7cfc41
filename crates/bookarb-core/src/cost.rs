//! Token cost model for upstream calls.
//!
//! Unit costs mirror the provider's published pricing and are configuration,
//! not constants baked into call sites.

use serde::{Deserialize, Serialize};

/// Published per-operation token prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTable {
    /// Tokens charged per page of discovery (product finder) results
    pub discovery_page_cost: u64,

    /// Tokens charged per identifier detail lookup
    pub item_detail_cost: u64,

    /// Identifiers returned per discovery page
    pub discovery_page_size: u32,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            discovery_page_cost: 10,
            item_detail_cost: 1,
            discovery_page_size: 10,
        }
    }
}

/// Computes the token cost of prospective work without touching the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostEstimator {
    table: CostTable,
}

impl CostEstimator {
    /// Create an estimator over a cost table.
    pub fn new(table: CostTable) -> Self {
        Self { table }
    }

    /// The underlying price table.
    pub fn table(&self) -> &CostTable {
        &self.table
    }

    /// `pages × discovery_page_cost + items × item_detail_cost`.
    pub fn estimate(&self, discovery_pages: u32, item_count: usize) -> u64 {
        u64::from(discovery_pages) * self.table.discovery_page_cost
            + item_count as u64 * self.table.item_detail_cost
    }

    /// Number of discovery pages needed to return `results` identifiers.
    pub fn pages_for(&self, results: u32) -> u32 {
        if results == 0 {
            return 0;
        }
        results.div_ceil(self.table.discovery_page_size.max(1))
    }

    /// Largest item count that keeps the job within `max_tokens` given
    /// `discovery_pages` of discovery.
    pub fn max_items_within(&self, max_tokens: u64, discovery_pages: u32) -> u64 {
        let discovery = u64::from(discovery_pages) * self.table.discovery_page_cost;
        if self.table.item_detail_cost == 0 {
            return u64::MAX;
        }
        max_tokens.saturating_sub(discovery) / self.table.item_detail_cost
    }

    /// Human-readable hint for narrowing a job that exceeds `max_tokens`.
    pub fn suggest_scope(&self, max_tokens: u64, discovery_pages: u32, item_count: usize) -> String {
        let page_tokens = u64::from(discovery_pages) * self.table.discovery_page_cost;

        if page_tokens > max_tokens {
            let max_pages = max_tokens / self.table.discovery_page_cost.max(1);
            return format!(
                "Reduce discovery to at most {} page(s) ({} results) to fit the {} token cap",
                max_pages,
                max_pages * u64::from(self.table.discovery_page_size),
                max_tokens
            );
        }

        let fits = self.max_items_within(max_tokens, discovery_pages);
        format!(
            "Narrow the job from {} to at most {} identifiers, or lower the discovery result limit",
            item_count, fits
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_page_job() {
        let estimator = CostEstimator::default();
        let pages = estimator.pages_for(10);
        assert_eq!(pages, 1);
        assert_eq!(estimator.estimate(pages, 10), 20);
    }

    #[test]
    fn test_twenty_page_job() {
        let estimator = CostEstimator::default();
        let pages = estimator.pages_for(200);
        assert_eq!(pages, 20);
        assert_eq!(estimator.estimate(pages, 200), 400);
    }

    #[test]
    fn test_pages_round_up() {
        let estimator = CostEstimator::default();
        assert_eq!(estimator.pages_for(0), 0);
        assert_eq!(estimator.pages_for(1), 1);
        assert_eq!(estimator.pages_for(11), 2);
    }

    #[test]
    fn test_custom_pricing() {
        let estimator = CostEstimator::new(CostTable {
            discovery_page_cost: 5,
            item_detail_cost: 2,
            discovery_page_size: 50,
        });
        assert_eq!(estimator.estimate(3, 7), 29);
        assert_eq!(estimator.pages_for(120), 3);
    }

    #[test]
    fn test_suggestion_mentions_fitting_count() {
        let estimator = CostEstimator::default();
        // 5 pages = 50 tokens, leaving 150 for items under a 200 cap
        let hint = estimator.suggest_scope(200, 5, 200);
        assert!(hint.contains("150"));

        let hint = estimator.suggest_scope(30, 5, 10);
        assert!(hint.contains("3 page"));
    }

    proptest! {
        #[test]
        fn prop_estimate_is_linear(pages in 0u32..1000, items in 0usize..10_000) {
            let estimator = CostEstimator::default();
            prop_assert_eq!(
                estimator.estimate(pages, items),
                u64::from(pages) * 10 + items as u64
            );
        }

        #[test]
        fn prop_max_items_fits_cap(cap in 0u64..5000, pages in 0u32..50) {
            let estimator = CostEstimator::default();
            let fits = estimator.max_items_within(cap, pages);
            if u64::from(pages) * 10 <= cap {
                prop_assert!(estimator.estimate(pages, fits as usize) <= cap);
            }
        }
    }
}
