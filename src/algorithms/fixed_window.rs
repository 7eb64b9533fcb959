//! Fixed window counting
//!
//! Hits are counted in discrete buckets of `window_seconds`, aligned to the
//! epoch. A timestamp exactly on a boundary belongs to the new window.
//! Up to twice the limit can be admitted across one boundary (the tail of one
//! window plus the head of the next); that burstiness is inherent to the
//! algorithm.

use super::{DecisionResult, ThrottleAlgorithm};
use crate::error::{ThrottleError, ThrottleResult};
use crate::store::CounterStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Counter state stored under the decision key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounter {
    pub window_id: u64,
    pub window_start: u64,
    pub count: u64,
}

pub struct FixedWindow {
    max_cas_retries: u32,
}

impl FixedWindow {
    pub fn new(max_cas_retries: u32) -> Self {
        Self {
            max_cas_retries: max_cas_retries.max(1),
        }
    }
}

impl Default for FixedWindow {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl ThrottleAlgorithm for FixedWindow {
    fn name(&self) -> &str {
        "fixed_window"
    }

    async fn evaluate(
        &self,
        key: &str,
        now: f64,
        max_requests: u64,
        window_seconds: u64,
        store: &dyn CounterStore,
    ) -> ThrottleResult<DecisionResult> {
        let window_id = (now / window_seconds as f64).floor() as u64;
        let window_start = window_id * window_seconds;
        let window_reset_at = window_start + window_seconds;

        for attempt in 1..=self.max_cas_retries {
            let stored = store.get(key).await?;
            let previous = match stored.as_deref() {
                Some(raw) => Some(serde_json::from_str::<WindowCounter>(raw)?),
                None => None,
            };

            let count = match previous {
                Some(counter) if counter.window_id == window_id => counter.count,
                _ => 0,
            } + 1;

            let next = WindowCounter {
                window_id,
                window_start,
                count,
            };
            let encoded = serde_json::to_string(&next)?;

            if !store
                .compare_and_set(key, stored.as_deref(), &encoded, window_seconds)
                .await?
            {
                debug!(key, attempt, "fixed window write conflict, retrying");
                continue;
            }

            let allowed = count <= max_requests;
            let wait_seconds = if allowed {
                0
            } else {
                (window_reset_at as f64 - now).ceil().max(0.0) as u64
            };

            return Ok(DecisionResult {
                allowed,
                current_count: count,
                max_requests,
                window_seconds,
                wait_seconds,
                window_reset_at,
            });
        }

        Err(ThrottleError::StoreContention {
            key: key.to_string(),
            attempts: self.max_cas_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_admits_up_to_limit_then_rejects() {
        let store = MemoryStore::new();
        let algorithm = FixedWindow::default();

        for expected in 1..=3 {
            let result = algorithm.evaluate("k", 1000.1, 3, 1, &store).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.current_requests(), expected);
        }

        let result = algorithm.evaluate("k", 1000.4, 3, 1, &store).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.wait_seconds(), 1);
        assert_eq!(result.window_reset_at, 1001);
    }

    #[tokio::test]
    async fn test_window_rollover_resets_count() {
        let store = MemoryStore::new();
        let algorithm = FixedWindow::default();

        for _ in 0..2 {
            algorithm.evaluate("k", 120.0, 2, 60, &store).await.unwrap();
        }
        let limited = algorithm.evaluate("k", 150.0, 2, 60, &store).await.unwrap();
        assert!(!limited.allowed);
        assert_eq!(limited.wait_seconds, 30);

        // Exactly on the boundary belongs to the next window.
        let fresh = algorithm.evaluate("k", 180.0, 2, 60, &store).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.current_count, 1);
        assert_eq!(fresh.window_reset_at, 240);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        let algorithm = FixedWindow::default();

        assert!(algorithm.evaluate("a", 10.0, 1, 60, &store).await.unwrap().allowed);
        assert!(!algorithm.evaluate("a", 10.0, 1, 60, &store).await.unwrap().allowed);
        assert!(algorithm.evaluate("b", 10.0, 1, 60, &store).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_state_is_stored_as_json() {
        let store = MemoryStore::new();
        FixedWindow::default()
            .evaluate("k", 125.5, 10, 60, &store)
            .await
            .unwrap();

        let raw = store.get("k").await.unwrap().unwrap();
        let counter: WindowCounter = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            counter,
            WindowCounter {
                window_id: 2,
                window_start: 120,
                count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported() {
        let store = MemoryStore::new();
        store.set("k", "not json", 60).await.unwrap();

        let err = FixedWindow::default()
            .evaluate("k", 1.0, 10, 60, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, ThrottleError::Serialization(_)));
    }
}
