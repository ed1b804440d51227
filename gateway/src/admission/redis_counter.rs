//! Redis-backed quota counter shared by every gateway process.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

use super::{CounterError, QuotaCounter, WindowCount, WindowUsage};

/// Read, check, increment and expire in one server-side step.
///
/// Returns `{admitted, count, pttl_ms}`. A denied attempt leaves the count
/// untouched.
const INCREMENT_SCRIPT: &str = r#"
    local count = tonumber(redis.call("GET", KEYS[1]) or "0")
    local ceiling = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])
    local admitted = 0
    if count < ceiling then
        count = redis.call("INCR", KEYS[1])
        admitted = 1
    end
    local ttl = redis.call("PTTL", KEYS[1])
    if ttl < 0 then
        if admitted == 1 then
            redis.call("PEXPIRE", KEYS[1], window)
        end
        ttl = window
    end
    return {admitted, count, ttl}
"#;

pub struct RedisCounter {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    script: redis::Script,
}

impl RedisCounter {
    /// Create a counter for `redis_url`. No connection is made until first use.
    pub fn new(redis_url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            CounterError::Connection(format!("failed to open Redis client: {e}"))
        })?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            script: redis::Script::new(INCREMENT_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CounterError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CounterError::Connection(format!("failed to get connection: {e}")))?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn reset(&self) {
        *self.connection.lock().await = None;
    }
}

#[async_trait]
impl QuotaCounter for RedisCounter {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn increment_and_check(
        &self,
        key: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<WindowCount, CounterError> {
        let mut conn = self.connection().await?;

        let result: redis::RedisResult<(i64, i64, i64)> = self
            .script
            .key(key)
            .arg(ceiling)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await;

        let (admitted, count, ttl_ms) = match result {
            Ok(values) => values,
            Err(e) => {
                self.reset().await;
                return Err(CounterError::Operation(format!("increment script failed: {e}")));
            }
        };

        Ok(WindowCount {
            admitted: admitted == 1,
            count: count.max(0) as u32,
            resets_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn usage(&self, key: &str, _window: Duration) -> Result<WindowUsage, CounterError> {
        let mut conn = self.connection().await?;

        let result: redis::RedisResult<(Option<u32>, i64)> = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await;

        let (count, ttl_ms) = match result {
            Ok(values) => values,
            Err(e) => {
                self.reset().await;
                return Err(CounterError::Operation(format!("usage query failed: {e}")));
            }
        };

        Ok(match count {
            Some(count) if ttl_ms > 0 => WindowUsage {
                count,
                resets_in: Some(Duration::from_millis(ttl_ms as u64)),
            },
            _ => WindowUsage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let err = RedisCounter::new("not a url").err().unwrap();
        assert!(matches!(err, CounterError::Connection(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let counter = RedisCounter::new("redis://127.0.0.1:1").unwrap();
        let err = counter
            .increment_and_check("relay:test", 10, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, CounterError::Connection(_)));
    }

    fn live_url() -> String {
        std::env::var("RELAY_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    /// A fresh key on the live server.
    async fn live_key(counter: &RedisCounter, name: &str) -> String {
        let key = format!("relay:test:{}:{}", std::process::id(), name);
        let mut conn = counter.connection().await.unwrap();
        let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await.unwrap();
        key
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at RELAY_TEST_REDIS_URL"]
    async fn test_script_admits_up_to_ceiling() {
        let counter = RedisCounter::new(&live_url()).unwrap();
        let key = live_key(&counter, "ceiling").await;
        let window = Duration::from_secs(60);

        for n in 1..=3 {
            let result = counter.increment_and_check(&key, 3, window).await.unwrap();
            assert!(result.admitted);
            assert_eq!(result.count, n);
            assert!(result.resets_in <= window);
        }

        // Denied attempts leave the count alone
        for _ in 0..5 {
            let result = counter.increment_and_check(&key, 3, window).await.unwrap();
            assert!(!result.admitted);
            assert_eq!(result.count, 3);
        }

        let usage = counter.usage(&key, window).await.unwrap();
        assert_eq!(usage.count, 3);
        assert!(usage.resets_in.is_some());
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at RELAY_TEST_REDIS_URL"]
    async fn test_script_is_atomic_under_concurrency() {
        let counter = std::sync::Arc::new(RedisCounter::new(&live_url()).unwrap());
        let key = live_key(&counter, "concurrent").await;

        let attempts = (0..25).map(|_| {
            let counter = counter.clone();
            let key = key.clone();
            tokio::spawn(async move {
                counter
                    .increment_and_check(&key, 10, Duration::from_secs(60))
                    .await
                    .unwrap()
                    .admitted
            })
        });
        let admitted = futures_util::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(admitted, 10);

        let usage = counter.usage(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(usage.count, 10);
    }
}
