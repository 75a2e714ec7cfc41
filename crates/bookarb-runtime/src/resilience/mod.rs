//! Resilience patterns for bookarb-runtime.
//!
//! This module provides:
//! - Token budget (token-bucket rate limiter) for upstream quota
//! - Circuit breaker to stop calling an unhealthy provider
//! - Retry schedule for transient failures

mod budget;
mod circuit_breaker;
mod retry;

pub use budget::{TokenBudget, TokenBudgetConfig, TokenBudgetStats};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus, Permit,
};
pub use retry::RetryConfig;
