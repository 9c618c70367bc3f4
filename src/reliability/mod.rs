//! Rate limiting, circuit breaking and retry around storage writes.

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::{RateLimitExceeded, RateLimiter};
pub use retry::RetryPolicy;

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::ReliabilityConfig;
use crate::storage::StorageError;

/// Guards storage calls for the service.
pub struct ReliabilityManager {
    config: ReliabilityConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    rate_limiter: Option<RateLimiter>,
    retry: RetryPolicy,
}

impl ReliabilityManager {
    pub fn new(config: ReliabilityConfig) -> Self {
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(&config.rate_limit));
        let retry = RetryPolicy::new(&config.retry);
        Self {
            config,
            breakers: DashMap::new(),
            rate_limiter,
            retry,
        }
    }

    /// Admit one event through the rate limiter, if enabled.
    pub fn check_rate_limit(&self) -> Result<(), RateLimitExceeded> {
        match &self.rate_limiter {
            Some(limiter) => limiter.check(),
            None => Ok(()),
        }
    }

    /// Breaker for `provider`, created on first use.
    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(provider) {
            return breaker.clone();
        }
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, &self.config.circuit_breaker)))
            .clone()
    }

    /// Run a storage call for `provider` behind its breaker and the retry
    /// policy. An open breaker rejects the call without running it.
    pub async fn execute<T, F, Fut>(&self, provider: &str, op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        if !self.config.circuit_breaker.enabled {
            return self.retry.run(op, |e: &StorageError| !e.is_capability_error()).await;
        }

        let breaker = self.breaker(provider);
        if !breaker.allow() {
            metrics::counter!("gg_telemetry_circuit_rejections_total", "provider" => provider.to_string())
                .increment(1);
            return Err(StorageError::CircuitOpen(provider.to_string()));
        }

        let result = self.retry.run(op, |e: &StorageError| !e.is_capability_error()).await;
        match &result {
            Ok(_) => breaker.record_success(),
            Err(e) if e.is_capability_error() => {}
            Err(_) => breaker.record_failure(),
        }
        result
    }

    /// Providers whose circuit is currently open.
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        open.sort();
        open
    }

    pub fn reset(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}
