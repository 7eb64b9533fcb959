//! Counter store adapters.
//!
//! The decision engine only needs a narrow contract from the shared store:
//! read a key, write a key with a TTL, and an atomic conditional write. Any
//! key-value system offering those three satisfies it, which is what lets
//! several server instances enforce one limit together.

pub mod memory;
pub mod redis_store;

use crate::error::ThrottleResult;
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name for logs and health reports.
    fn name(&self) -> &'static str;

    /// Current serialized state for `key`, `None` when absent or expired.
    async fn get(&self, key: &str) -> ThrottleResult<Option<String>>;

    /// Unconditionally store `value` for `ttl_seconds`.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> ThrottleResult<()>;

    /// Store `new` only if the current value equals `expected` (`None` meaning
    /// absent). Returns `false` when another writer got there first.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl_seconds: u64,
    ) -> ThrottleResult<bool>;

    /// Round-trip check used by the health endpoint.
    async fn ping(&self) -> ThrottleResult<()>;
}
