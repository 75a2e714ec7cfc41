//! Scripted provider for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};

use bookarb_core::DiscoveryQuery;

use crate::providers::{DataProvider, DiscoveryPage, ProviderError, ProviderResponse};

/// Provider whose answers are set up by the test.
///
/// Lookups first drain the per-identifier error script, then fall back to
/// `fail_all` if set, then answer with a canned payload.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<BTreeMap<String, VecDeque<ProviderError>>>,
    fail_all: Mutex<Option<ProviderError>>,
    payloads: Mutex<BTreeMap<String, JsonValue>>,
    discovery: Mutex<Vec<String>>,
    tokens_left: Mutex<Option<u64>>,
    latency: Mutex<Duration>,
    fetch_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next lookups of `identifier` with these errors, in order.
    pub fn script(&self, identifier: &str, errors: Vec<ProviderError>) {
        self.scripts
            .lock()
            .insert(identifier.to_string(), errors.into());
    }

    /// Fail every unscripted lookup with `error`, or stop failing with `None`.
    pub fn fail_all(&self, error: Option<ProviderError>) {
        *self.fail_all.lock() = error;
    }

    pub fn payload(&self, identifier: &str, payload: JsonValue) {
        self.payloads.lock().insert(identifier.to_string(), payload);
    }

    pub fn discovery(&self, identifiers: Vec<String>) {
        *self.discovery.lock() = identifiers;
    }

    pub fn report_tokens_left(&self, tokens_left: Option<u64>) {
        *self.tokens_left.lock() = tokens_left;
    }

    pub fn latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_error(&self, identifier: &str) -> Option<ProviderError> {
        if let Some(script) = self.scripts.lock().get_mut(identifier) {
            if let Some(error) = script.pop_front() {
                return Some(error);
            }
        }
        self.fail_all.lock().clone()
    }

    fn respond<T>(&self, data: T) -> ProviderResponse<T> {
        let mut response = ProviderResponse::new(data);
        response.tokens_left = *self.tokens_left.lock();
        response
    }
}

/// Payload with one field per category.
pub fn book_payload(identifier: &str) -> JsonValue {
    json!({
        "title": format!("Book {}", identifier),
        "buy_box_price": 1299,
        "sales_rank": 4200,
    })
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    async fn fetch_product(
        &self,
        identifier: &str,
    ) -> Result<ProviderResponse<JsonValue>, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.next_error(identifier) {
            return Err(error);
        }

        let payload = self
            .payloads
            .lock()
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| book_payload(identifier));
        Ok(self.respond(payload))
    }

    async fn discover(
        &self,
        query: &DiscoveryQuery,
        page: u32,
    ) -> Result<ProviderResponse<DiscoveryPage>, ProviderError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.fail_all.lock().clone() {
            return Err(error);
        }

        let all = self.discovery.lock().clone();
        let limit = (query.max_results as usize).min(all.len());
        let start = page as usize * 10;
        let end = (start + 10).min(limit);
        let identifiers = if start < end {
            all[start..end].to_vec()
        } else {
            Vec::new()
        };

        Ok(self.respond(DiscoveryPage {
            identifiers,
            total_results: Some(limit as u32),
        }))
    }

    async fn health_check(&self) -> bool {
        self.fail_all.lock().is_none()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
