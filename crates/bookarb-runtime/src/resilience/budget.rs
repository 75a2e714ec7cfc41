//! Token-bucket budget for upstream quota.
//!
//! The provider meters every call in tokens that refill at a fixed rate.
//! Callers `acquire` the cost of a call before making it; when the bucket is
//! short they are suspended until enough tokens have refilled.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgetConfig {
    /// Maximum burst size
    pub capacity: u64,

    /// Tokens added per second
    pub refill_rate_per_second: f64,

    /// Starting balance (defaults to a full bucket)
    pub initial_tokens: Option<u64>,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        // 20 tokens/minute with a one-hour burst
        Self {
            capacity: 1200,
            refill_rate_per_second: 20.0 / 60.0,
            initial_tokens: None,
        }
    }
}

/// Read-only budget telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBudgetStats {
    pub balance: f64,
    pub capacity: u64,
    pub refill_rate_per_second: f64,
    pub requests_served: u64,
    pub total_wait_ms: u64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    total_wait: Duration,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Refillable token balance shared by every upstream call.
///
/// All balance mutation happens under one short-lived lock. Acquirers also
/// take a turn lock for the whole acquire, so a caller sleeping for refill
/// owns the tokens it is waiting for and concurrent callers queue behind it
/// in arrival order.
pub struct TokenBudget {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
    turn: tokio::sync::Mutex<()>,
    requests_served: AtomicU64,
}

impl TokenBudget {
    /// Create a new token budget.
    pub fn new(config: TokenBudgetConfig) -> Self {
        let capacity = config.capacity as f64;
        let initial = config
            .initial_tokens
            .map(|t| (t as f64).min(capacity))
            .unwrap_or(capacity);

        Self {
            capacity,
            // RuntimeConfig::validate rejects non-positive rates; the floor keeps waits finite
            rate: config.refill_rate_per_second.max(1e-6),
            state: Mutex::new(BucketState {
                tokens: initial,
                last_refill: Instant::now(),
                total_wait: Duration::ZERO,
            }),
            turn: tokio::sync::Mutex::new(()),
            requests_served: AtomicU64::new(0),
        }
    }

    /// Wait until `cost` tokens are available, then deduct them.
    ///
    /// Never fails. Dropping the future is the only way to abandon a wait.
    /// Returns how long the caller was suspended.
    pub async fn acquire(&self, cost: u64) -> Duration {
        let _turn = self.turn.lock().await;
        let cost = cost as f64;

        if cost > self.capacity {
            tracing::warn!(
                cost,
                capacity = self.capacity,
                "Requested cost exceeds bucket capacity"
            );
        }

        let wait = {
            let mut state = self.state.lock();
            state.refill(Instant::now(), self.capacity, self.rate);
            if state.tokens >= cost {
                state.tokens -= cost;
                None
            } else {
                Some(Duration::from_secs_f64((cost - state.tokens) / self.rate))
            }
        };

        let waited = match wait {
            None => Duration::ZERO,
            Some(wait) => {
                tracing::debug!(cost, wait_ms = wait.as_millis() as u64, "Waiting for token refill");
                tokio::time::sleep(wait).await;

                let mut state = self.state.lock();
                state.refill(Instant::now(), self.capacity, self.rate);
                // The wait was sized to produce exactly `cost` tokens
                state.tokens = (state.tokens - cost).max(0.0);
                state.total_wait += wait;
                wait
            }
        };

        self.requests_served.fetch_add(1, Ordering::Relaxed);
        waited
    }

    /// Deduct `cost` only if it is available right now and nobody is queued.
    pub fn try_acquire(&self, cost: u64) -> bool {
        let Ok(_turn) = self.turn.try_lock() else {
            return false;
        };

        let mut state = self.state.lock();
        state.refill(Instant::now(), self.capacity, self.rate);
        if state.tokens >= cost as f64 {
            state.tokens -= cost as f64;
            self.requests_served.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Return tokens for a call that was acquired but never made.
    pub fn refund(&self, tokens: u64) {
        let mut state = self.state.lock();
        state.refill(Instant::now(), self.capacity, self.rate);
        state.tokens = (state.tokens + tokens as f64).min(self.capacity);
    }

    /// Reconcile with the remaining quota reported by the provider.
    pub fn sync_balance(&self, tokens_left: u64) {
        let mut state = self.state.lock();
        let previous = state.tokens;
        state.tokens = (tokens_left as f64).min(self.capacity);
        state.last_refill = Instant::now();

        if (previous - state.tokens).abs() >= 1.0 {
            tracing::debug!(
                local = previous,
                upstream = tokens_left,
                "Token balance synced with provider"
            );
        }
    }

    /// Current balance including refill since the last mutation.
    pub fn balance(&self) -> f64 {
        let state = self.state.lock();
        let elapsed = Instant::now()
            .saturating_duration_since(state.last_refill)
            .as_secs_f64();
        (state.tokens + elapsed * self.rate).min(self.capacity)
    }

    /// Whole tokens currently available.
    pub fn balance_tokens(&self) -> u64 {
        self.balance().floor() as u64
    }

    /// Seconds until `tokens` would be available, from the current balance.
    pub fn time_until(&self, tokens: u64) -> Duration {
        let short = tokens as f64 - self.balance();
        if short <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(short / self.rate)
        }
    }

    /// Budget telemetry.
    pub fn stats(&self) -> TokenBudgetStats {
        let total_wait = self.state.lock().total_wait;
        TokenBudgetStats {
            balance: self.balance(),
            capacity: self.capacity as u64,
            refill_rate_per_second: self.rate,
            requests_served: self.requests_served.load(Ordering::Relaxed),
            total_wait_ms: total_wait.as_millis() as u64,
        }
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(TokenBudgetConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn budget(capacity: u64, rate: f64, initial: Option<u64>) -> TokenBudget {
        TokenBudget::new(TokenBudgetConfig {
            capacity,
            refill_rate_per_second: rate,
            initial_tokens: initial,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_acquire() {
        let budget = budget(100, 1.0, None);
        let waited = budget.acquire(30).await;
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(budget.balance_tokens(), 70);
        assert_eq!(budget.stats().requests_served, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let budget = budget(100, 2.0, Some(0));
        let start = Instant::now();

        let waited = budget.acquire(10).await;

        assert_eq!(waited, Duration::from_secs(5));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(budget.balance() < 1e-9);
        assert_eq!(budget.stats().total_wait_ms, 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let budget = budget(50, 10.0, Some(0));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(budget.balance(), 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_double_spend_under_concurrency() {
        let budget = Arc::new(budget(100, 10.0, None));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let budget = budget.clone();
            handles.push(tokio::spawn(async move { budget.acquire(10).await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // initial 100 + refill over the elapsed time - 200 spent
        let elapsed = start.elapsed().as_secs_f64();
        let expected = 100.0 + elapsed * 10.0 - 200.0;
        let balance = budget.balance();

        assert!(balance >= 0.0);
        assert!((balance - expected.max(0.0)).abs() < 1e-6);
        assert!((elapsed - 10.0).abs() < 1e-6);
        assert_eq!(budget.stats().requests_served, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_and_sync() {
        let budget = budget(100, 1.0, Some(40));
        budget.refund(10);
        assert_eq!(budget.balance_tokens(), 50);

        budget.refund(500);
        assert_eq!(budget.balance_tokens(), 100);

        budget.sync_balance(25);
        assert_eq!(budget.balance_tokens(), 25);

        budget.sync_balance(10_000);
        assert_eq!(budget.balance_tokens(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire() {
        let budget = budget(10, 1.0, Some(5));
        assert!(!budget.try_acquire(6));
        assert!(budget.try_acquire(5));
        assert_eq!(budget.balance_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until() {
        let budget = budget(100, 2.0, Some(10));
        assert_eq!(budget.time_until(5), Duration::ZERO);
        assert_eq!(budget.time_until(30), Duration::from_secs(10));
    }
}
