//! Tiered caching of provider responses.
//!
//! Each data category is cached with its own TTL matching how quickly that
//! data goes stale upstream. A short "quick" tier holds whole records so
//! rapid repeat lookups of the same identifier never reach the provider.
//! Cache hits spend no tokens.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use bookarb_core::{DataCategory, ProductRecord};

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for slow-changing attributes
    #[serde(with = "crate::config::humantime_serde")]
    pub metadata_ttl: Duration,

    /// TTL for prices and offers
    #[serde(with = "crate::config::humantime_serde")]
    pub pricing_ttl: Duration,

    /// TTL for sales rank data
    #[serde(with = "crate::config::humantime_serde")]
    pub rank_ttl: Duration,

    /// TTL for whole-record repeat lookups
    #[serde(with = "crate::config::humantime_serde")]
    pub quick_ttl: Duration,

    /// Whether the quick tier is used at all
    pub quick_tier_enabled: bool,

    /// Maximum entries per tier
    pub max_entries: u64,

    /// How often expired entries are reaped
    #[serde(with = "crate::config::humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metadata_ttl: Duration::from_secs(24 * 3600),
            pricing_ttl: Duration::from_secs(30 * 60),
            rank_ttl: Duration::from_secs(2 * 3600),
            quick_ttl: Duration::from_secs(5 * 60),
            quick_tier_enabled: true,
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// TTL for a category.
    pub fn ttl(&self, category: DataCategory) -> Duration {
        match category {
            DataCategory::Metadata => self.metadata_ttl,
            DataCategory::Pricing => self.pricing_ttl,
            DataCategory::Rank => self.rank_ttl,
        }
    }
}

/// A cached value for one identifier and category.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub category: DataCategory,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    inserted: Instant,
}

impl CacheEntry {
    fn new(value: Value, category: DataCategory, ttl: Duration) -> Self {
        Self {
            value,
            category,
            created_at: Utc::now(),
            ttl,
            inserted: Instant::now(),
        }
    }

    /// Readable only while `now < created + ttl`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.inserted + self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }
}

#[derive(Debug, Clone)]
struct QuickEntry {
    record: ProductRecord,
    inserted: Instant,
}

/// Hit/miss counters and sizes per tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub metadata_entries: u64,
    pub pricing_entries: u64,
    pub rank_entries: u64,
    pub quick_entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub quick_hits: u64,
}

/// Category-aware response cache using moka.
pub struct TieredCache {
    config: CacheConfig,
    metadata: Cache<String, CacheEntry>,
    pricing: Cache<String, CacheEntry>,
    rank: Cache<String, CacheEntry>,
    quick: Cache<String, QuickEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    quick_hits: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TieredCache {
    /// Create a new cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let tier = |ttl: Duration| {
            Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(ttl)
                .build()
        };

        Self {
            metadata: tier(config.metadata_ttl),
            pricing: tier(config.pricing_ttl),
            rank: tier(config.rank_ttl),
            quick: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.quick_ttl)
                .build(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            quick_hits: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    fn tier(&self, category: DataCategory) -> &Cache<String, CacheEntry> {
        match category {
            DataCategory::Metadata => &self.metadata,
            DataCategory::Pricing => &self.pricing,
            DataCategory::Rank => &self.rank,
        }
    }

    /// Get a fresh value for an identifier and category.
    pub async fn get(&self, identifier: &str, category: DataCategory) -> Option<Value> {
        self.get_entry(identifier, category).await.map(|e| e.value)
    }

    /// Get a fresh entry, counting the hit or miss.
    pub async fn get_entry(&self, identifier: &str, category: DataCategory) -> Option<CacheEntry> {
        let tier = self.tier(category);
        match tier.get(identifier).await {
            Some(entry) if entry.is_fresh() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                tier.invalidate(identifier).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a value, replacing any previous entry for the key.
    pub async fn put(&self, identifier: &str, category: DataCategory, value: Value) {
        let entry = CacheEntry::new(value, category, self.config.ttl(category));
        self.tier(category).insert(identifier.to_string(), entry).await;
    }

    /// Whole record for an identifier, from the quick tier or from all three
    /// category tiers being fresh.
    pub async fn get_record(&self, identifier: &str) -> Option<ProductRecord> {
        if self.config.quick_tier_enabled {
            if let Some(entry) = self.quick.get(identifier).await {
                if Instant::now() < entry.inserted + self.config.quick_ttl {
                    self.quick_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.record);
                }
                self.quick.invalidate(identifier).await;
            }
        }

        let metadata = self.get_entry(identifier, DataCategory::Metadata).await?;
        let pricing = self.get_entry(identifier, DataCategory::Pricing).await?;
        let rank = self.get_entry(identifier, DataCategory::Rank).await?;

        let fetched_at = metadata
            .created_at
            .min(pricing.created_at)
            .min(rank.created_at);

        Some(ProductRecord::from_parts(
            identifier,
            metadata.value,
            pricing.value,
            rank.value,
            fetched_at,
        ))
    }

    /// Store every category of a record, plus the quick tier.
    pub async fn put_record(&self, record: &ProductRecord) {
        for category in DataCategory::ALL {
            self.put(&record.identifier, category, record.category(category).clone())
                .await;
        }

        if self.config.quick_tier_enabled {
            self.quick
                .insert(
                    record.identifier.clone(),
                    QuickEntry {
                        record: record.clone(),
                        inserted: Instant::now(),
                    },
                )
                .await;
        }
    }

    /// Drop everything cached for an identifier.
    pub async fn invalidate(&self, identifier: &str) {
        for category in DataCategory::ALL {
            self.tier(category).invalidate(identifier).await;
        }
        self.quick.invalidate(identifier).await;
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.metadata.invalidate_all();
        self.pricing.invalidate_all();
        self.rank.invalidate_all();
        self.quick.invalidate_all();
    }

    /// Reap expired entries from every tier.
    pub async fn sweep(&self) {
        self.metadata.run_pending_tasks().await;
        self.pricing.run_pending_tasks().await;
        self.rank.run_pending_tasks().await;
        self.quick.run_pending_tasks().await;
    }

    /// Start the periodic sweep task. Stopped by [`TieredCache::shutdown`]
    /// or when the cache is dropped.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep().await;
                tracing::trace!(
                    entries = cache.metadata.entry_count() + cache.pricing.entry_count(),
                    "Cache sweep complete"
                );
            }
        }));

        tracing::debug!(interval = ?period, "Cache sweeper started");
    }

    /// Whether the sweep task is running.
    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the sweep task.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            tracing::debug!("Cache sweeper stopped");
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            metadata_entries: self.metadata.entry_count(),
            pricing_entries: self.pricing.entry_count(),
            rank_entries: self.rank.entry_count(),
            quick_entries: self.quick.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            quick_hits: self.quick_hits.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl Default for TieredCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> ProductRecord {
        ProductRecord::from_payload(
            id,
            &json!({"title": "Dune", "buy_box_price": 899, "sales_rank": 1200}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = TieredCache::default();

        // Cache miss
        assert!(cache.get("0441172717", DataCategory::Pricing).await.is_none());

        cache
            .put("0441172717", DataCategory::Pricing, json!({"buy_box_price": 899}))
            .await;

        // Cache hit
        let cached = cache.get("0441172717", DataCategory::Pricing).await;
        assert_eq!(cached.unwrap()["buy_box_price"], 899);

        // Categories are independent
        assert!(cache.get("0441172717", DataCategory::Rank).await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_entry_freshness_boundary() {
        let entry = CacheEntry::new(json!(1), DataCategory::Pricing, Duration::from_secs(10));
        let created = entry.inserted;

        assert!(entry.is_fresh_at(created));
        assert!(entry.is_fresh_at(created + Duration::from_millis(9_999)));
        assert!(!entry.is_fresh_at(created + Duration::from_secs(10)));
        assert!(!entry.is_fresh_at(created + Duration::from_secs(11)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_ttls_expire_independently() {
        let cache = TieredCache::new(CacheConfig {
            pricing_ttl: Duration::from_secs(30 * 60),
            ..Default::default()
        });

        cache.put("0441172717", DataCategory::Metadata, json!({"title": "Dune"})).await;
        cache.put("0441172717", DataCategory::Pricing, json!({"new_price": 999})).await;

        tokio::time::advance(Duration::from_secs(30 * 60 - 1)).await;
        assert!(cache.get("0441172717", DataCategory::Pricing).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("0441172717", DataCategory::Pricing).await.is_none());
        assert!(cache.get("0441172717", DataCategory::Metadata).await.is_some());
    }

    #[tokio::test]
    async fn test_record_round_trip_through_tiers() {
        let cache = TieredCache::new(CacheConfig {
            quick_tier_enabled: false,
            ..Default::default()
        });
        let original = record("0441172717");

        assert!(cache.get_record("0441172717").await.is_none());
        cache.put_record(&original).await;

        let cached = cache.get_record("0441172717").await.unwrap();
        assert_eq!(cached.metadata, original.metadata);
        assert_eq!(cached.pricing, original.pricing);
        assert_eq!(cached.rank, original.rank);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_needs_every_category_fresh() {
        let cache = TieredCache::new(CacheConfig {
            quick_tier_enabled: false,
            rank_ttl: Duration::from_secs(60),
            ..Default::default()
        });
        cache.put_record(&record("0441172717")).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get_record("0441172717").await.is_none());
        // Metadata alone is still usable
        assert!(cache.get("0441172717", DataCategory::Metadata).await.is_some());
    }

    #[tokio::test]
    async fn test_quick_tier_hit() {
        let cache = TieredCache::default();
        cache.put_record(&record("0441172717")).await;

        assert!(cache.get_record("0441172717").await.is_some());
        assert_eq!(cache.stats().quick_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_tier_expires_before_categories() {
        let cache = TieredCache::new(CacheConfig {
            quick_ttl: Duration::from_secs(5 * 60),
            ..Default::default()
        });
        cache.put_record(&record("0441172717")).await;

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert!(cache.get_record("0441172717").await.is_some());

        let stats = cache.stats();
        assert_eq!(stats.quick_hits, 0);
        assert_eq!(stats.hits, 3);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = TieredCache::default();
        cache.put_record(&record("0441172717")).await;
        cache.put_record(&record("0547928211")).await;

        cache.invalidate("0441172717").await;
        assert!(cache.get_record("0441172717").await.is_none());
        assert!(cache.get_record("0547928211").await.is_some());

        cache.invalidate_all();
        assert!(cache.get_record("0547928211").await.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_lifecycle() {
        let cache = Arc::new(TieredCache::new(CacheConfig {
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        }));

        assert!(!cache.sweeper_running());
        cache.start_sweeper();
        assert!(cache.sweeper_running());

        cache.shutdown();
        assert!(!cache.sweeper_running());
    }
}
