use super::CounterStore;
use crate::error::{ThrottleError, ThrottleResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult, Script};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Conditional write evaluated server-side so it is atomic across instances.
/// ARGV: has_expected ("1"/"0"), expected, new value, ttl seconds.
const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then
    return 0
  end
elseif current then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'EX', ARGV[4])
return 1
"#;

/// Counter store shared by every instance pointed at the same Redis.
pub struct RedisStore {
    client: Client,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
    cas_script: Script,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> ThrottleResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            ThrottleError::InvalidConfig(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
            cas_script: Script::new(COMPARE_AND_SET_SCRIPT),
        })
    }

    /// Open the connection eagerly instead of on first use.
    pub async fn connect(&self) -> ThrottleResult<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> ThrottleResult<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| ThrottleError::StoreUnavailable(format!("Failed to connect to Redis: {}", e)))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Forget a broken connection so the next call reconnects.
    async fn check<T>(&self, result: RedisResult<T>, op: &str) -> ThrottleResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    *self.connection.lock().await = None;
                }
                tracing::warn!(target: "throttle_gate::store", op, error = %e, "Redis command failed");
                Err(ThrottleError::StoreUnavailable(format!("{} failed: {}", op, e)))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> ThrottleResult<Option<String>> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await;
        self.check(result, "GET").await
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> ThrottleResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async::<_, ()>(&mut conn)
            .await;
        self.check(result, "SET").await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl_seconds: u64,
    ) -> ThrottleResult<bool> {
        let mut conn = self.connection().await?;
        let result = self
            .cas_script
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(new)
            .arg(ttl_seconds.max(1))
            .invoke_async::<_, i32>(&mut conn)
            .await;
        self.check(result, "compare-and-set").await.map(|written| written == 1)
    }

    async fn ping(&self) -> ThrottleResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("PING").query_async::<_, String>(&mut conn).await;
        self.check(result, "PING").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_url() {
        let err = RedisStore::new("not a url").err().unwrap();
        assert!(matches!(err, ThrottleError::InvalidConfig(_)));
    }

    #[test]
    fn test_accepts_redis_url_without_connecting() {
        let store = RedisStore::new("redis://127.0.0.1:6379").unwrap();
        assert_eq!(store.name(), "redis");
    }
}
