//! Rate limiting algorithms
//!
//! Every algorithm implements [`ThrottleAlgorithm`] against a
//! [`CounterStore`] and keeps its own state shape under the decision key.
//! The engine picks one by [`AlgorithmId`] when it is built and never
//! re-resolves it per request.

pub mod fixed_window;

use crate::error::{ThrottleError, ThrottleResult};
use crate::store::CounterStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use fixed_window::FixedWindow;

/// Outcome of one evaluation. Request scoped, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecisionResult {
    pub allowed: bool,
    pub current_count: u64,
    pub max_requests: u64,
    pub window_seconds: u64,
    pub wait_seconds: u64,
    /// Epoch second at which the active window ends.
    pub window_reset_at: u64,
}

impl DecisionResult {
    pub fn current_requests(&self) -> u64 {
        self.current_count
    }

    pub fn wait_seconds(&self) -> u64 {
        self.wait_seconds
    }

    pub fn remaining(&self) -> u64 {
        self.max_requests.saturating_sub(self.current_count)
    }
}

/// Trait for rate limiting algorithms
#[async_trait]
pub trait ThrottleAlgorithm: Send + Sync {
    /// Identifier mixed into decision keys so algorithms never share state.
    fn name(&self) -> &str;

    /// Register one hit for `key` at `now` (epoch seconds) and decide.
    async fn evaluate(
        &self,
        key: &str,
        now: f64,
        max_requests: u64,
        window_seconds: u64,
        store: &dyn CounterStore,
    ) -> ThrottleResult<DecisionResult>;
}

/// The closed set of algorithm identifiers accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmId {
    #[default]
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

impl AlgorithmId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmId::FixedWindow => "fixed_window",
            AlgorithmId::SlidingWindow => "sliding_window",
            AlgorithmId::TokenBucket => "token_bucket",
            AlgorithmId::LeakyBucket => "leaky_bucket",
        }
    }

    /// Resolve the identifier to an implementation.
    ///
    /// Only fixed-window counting ships with this crate; the other variants
    /// have to be supplied through `ThrottleBuilder::algorithm_impl`.
    pub fn build(self, max_cas_retries: u32) -> ThrottleResult<Arc<dyn ThrottleAlgorithm>> {
        match self {
            AlgorithmId::FixedWindow => Ok(Arc::new(FixedWindow::new(max_cas_retries))),
            other => Err(ThrottleError::InvalidAlgorithm(format!(
                "'{}' has no built-in implementation; inject one with algorithm_impl",
                other
            ))),
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmId {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fixed_window" | "counter_fixed" => Ok(AlgorithmId::FixedWindow),
            "sliding_window" | "counter_slider" => Ok(AlgorithmId::SlidingWindow),
            "token_bucket" => Ok(AlgorithmId::TokenBucket),
            "leaky_bucket" => Ok(AlgorithmId::LeakyBucket),
            other => Err(ThrottleError::InvalidAlgorithm(format!(
                "unknown algorithm '{}'",
                other
            ))),
        }
    }
}
