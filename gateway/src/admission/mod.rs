//! Per-account quota admission.
//!
//! Every attempt is counted against a fixed window keyed by account and
//! tier. The shared Redis counter is consulted first when configured; if it
//! errors or is slow the attempt is counted locally instead, so admission
//! never fails because the shared counter is down.

mod local;
mod redis_counter;

pub use local::LocalCounter;
pub use redis_counter::RedisCounter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_common::Tier;
use serde::Serialize;

use crate::config::QuotaConfig;

/// Shortest retry-after ever reported to a denied caller.
const MIN_RETRY_AFTER: Duration = Duration::from_millis(1);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Result of one increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub admitted: bool,
    /// Count after the attempt.
    pub count: u32,
    pub resets_in: Duration,
}

/// Current state of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowUsage {
    pub count: u32,
    /// `None` when no window is active for the key.
    pub resets_in: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("Counter connection failed: {0}")]
    Connection(String),

    #[error("Counter operation failed: {0}")]
    Operation(String),

    #[error("Counter did not answer within {0:?}")]
    Timeout(Duration),
}

/// Fixed-window request counter.
#[async_trait]
pub trait QuotaCounter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Atomically count one attempt unless the key is at `ceiling`.
    async fn increment_and_check(
        &self,
        key: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<WindowCount, CounterError>;

    /// Read the current window without counting.
    async fn usage(&self, key: &str, window: Duration) -> Result<WindowUsage, CounterError>;
}

/// Quota usage reported to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub tier: Tier,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub resets_in_secs: u64,
}

pub struct AdmissionController {
    config: QuotaConfig,
    durable: Option<Arc<dyn QuotaCounter>>,
    local: LocalCounter,
    durable_healthy: AtomicBool,
}

impl AdmissionController {
    /// Build the controller, with a Redis counter when `redis_url` is set.
    pub fn from_config(config: &QuotaConfig) -> Self {
        let durable = config.redis_url.as_deref().and_then(|url| match RedisCounter::new(url) {
            Ok(counter) => {
                tracing::info!("Quota counting shared through Redis");
                Some(Arc::new(counter) as Arc<dyn QuotaCounter>)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid Redis URL, counting quota locally");
                None
            }
        });
        Self::with_durable(config.clone(), durable)
    }

    pub fn with_durable(config: QuotaConfig, durable: Option<Arc<dyn QuotaCounter>>) -> Self {
        Self {
            config,
            durable,
            local: LocalCounter::new(),
            durable_healthy: AtomicBool::new(true),
        }
    }

    fn key(&self, account_id: &str, tier: Tier) -> String {
        format!("{}:{}:{}", self.config.key_prefix, tier, account_id)
    }

    /// Count one request for the account and decide whether it may proceed.
    pub async fn admit(&self, account_id: &str, tier: Tier) -> Admission {
        let key = self.key(account_id, tier);
        let ceiling = self.config.ceiling(tier);
        let window = self.config.window();

        let count = match self.durable_increment(&key, ceiling, window).await {
            Some(count) => count,
            None => self.local.increment(&key, ceiling, window).await,
        };

        if count.admitted {
            let remaining = ceiling.saturating_sub(count.count);
            tracing::debug!(account_id = %account_id, tier = %tier, remaining, "Request admitted");
            Admission::Allowed { remaining }
        } else {
            let retry_after = count.resets_in.max(MIN_RETRY_AFTER);
            tracing::debug!(
                account_id = %account_id,
                tier = %tier,
                retry_after_ms = retry_after.as_millis() as u64,
                "Request denied, quota exhausted"
            );
            Admission::Denied { retry_after }
        }
    }

    /// Current usage for the account, without counting a request.
    pub async fn usage(&self, account_id: &str, tier: Tier) -> UsageStats {
        let key = self.key(account_id, tier);
        let limit = self.config.ceiling(tier);
        let window = self.config.window();

        let usage = match self.durable_usage(&key, window).await {
            Some(usage) => usage,
            None => self.local.current(&key).await,
        };

        let resets_in = usage.resets_in.unwrap_or(window);
        UsageStats {
            tier,
            limit,
            used: usage.count,
            remaining: limit.saturating_sub(usage.count),
            resets_in_secs: ceil_secs(resets_in),
        }
    }

    async fn durable_increment(&self, key: &str, ceiling: u32, window: Duration) -> Option<WindowCount> {
        let durable = self.durable.as_ref()?;
        let timeout = self.config.redis_timeout();
        let result = tokio::time::timeout(timeout, durable.increment_and_check(key, ceiling, window))
            .await
            .unwrap_or(Err(CounterError::Timeout(timeout)));
        self.observe(durable.name(), result)
    }

    async fn durable_usage(&self, key: &str, window: Duration) -> Option<WindowUsage> {
        let durable = self.durable.as_ref()?;
        let timeout = self.config.redis_timeout();
        let result = tokio::time::timeout(timeout, durable.usage(key, window))
            .await
            .unwrap_or(Err(CounterError::Timeout(timeout)));
        self.observe(durable.name(), result)
    }

    /// Track durable counter health; errors become `None` so the caller
    /// counts locally.
    fn observe<T>(&self, counter: &str, result: Result<T, CounterError>) -> Option<T> {
        match result {
            Ok(value) => {
                if !self.durable_healthy.swap(true, Ordering::Relaxed) {
                    tracing::info!(counter, "Shared quota counter recovered");
                }
                Some(value)
            }
            Err(e) => {
                if self.durable_healthy.swap(false, Ordering::Relaxed) {
                    tracing::warn!(counter, error = %e, "Shared quota counter unavailable, counting locally");
                } else {
                    tracing::debug!(counter, error = %e, "Shared quota counter still unavailable");
                }
                None
            }
        }
    }
}

/// Whole seconds, rounded up.
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicU32;

    fn quota(free: u32) -> QuotaConfig {
        QuotaConfig {
            free,
            ..QuotaConfig::default()
        }
    }

    /// Shared counter that always fails.
    struct BrokenCounter {
        calls: AtomicU32,
    }

    #[async_trait]
    impl QuotaCounter for BrokenCounter {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn increment_and_check(&self, _: &str, _: u32, _: Duration) -> Result<WindowCount, CounterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CounterError::Operation("boom".to_string()))
        }

        async fn usage(&self, _: &str, _: Duration) -> Result<WindowUsage, CounterError> {
            Err(CounterError::Operation("boom".to_string()))
        }
    }

    /// Shared counter that never answers.
    struct HangingCounter;

    #[async_trait]
    impl QuotaCounter for HangingCounter {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn increment_and_check(&self, _: &str, _: u32, _: Duration) -> Result<WindowCount, CounterError> {
            std::future::pending().await
        }

        async fn usage(&self, _: &str, _: Duration) -> Result<WindowUsage, CounterError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nth_allowed_next_denied_then_rollover() {
        let controller = AdmissionController::with_durable(quota(10), None);

        for i in 1..=10 {
            match controller.admit("acct", Tier::Free).await {
                Admission::Allowed { remaining } => assert_eq!(remaining, 10 - i),
                denied => panic!("request {i} denied: {denied:?}"),
            }
        }

        let retry_after = match controller.admit("acct", Tier::Free).await {
            Admission::Denied { retry_after } => retry_after,
            allowed => panic!("11th request admitted: {allowed:?}"),
        };
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_secs(3600));

        tokio::time::advance(retry_after).await;
        assert!(controller.admit("acct", Tier::Free).await.is_allowed());
    }

    #[tokio::test]
    async fn test_concurrent_admits_exact() {
        let controller = Arc::new(AdmissionController::with_durable(quota(10), None));
        let attempts = (0..25).map(|_| {
            let controller = controller.clone();
            async move { controller.admit("racer", Tier::Free).await }
        });
        let outcomes = join_all(attempts).await;

        let allowed = outcomes.iter().filter(|a| a.is_allowed()).count();
        assert_eq!(allowed, 10);
        assert_eq!(outcomes.len() - allowed, 15);
    }

    #[tokio::test]
    async fn test_concurrent_admits_across_tasks() {
        let controller = Arc::new(AdmissionController::with_durable(quota(5), None));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move { controller.admit("spawned", Tier::Free).await }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn test_tiers_have_separate_ceilings() {
        let config = QuotaConfig {
            free: 1,
            premium: 2,
            ..QuotaConfig::default()
        };
        let controller = AdmissionController::with_durable(config, None);
        assert!(controller.admit("a", Tier::Free).await.is_allowed());
        assert!(!controller.admit("a", Tier::Free).await.is_allowed());
        assert!(controller.admit("a", Tier::Premium).await.is_allowed());
        assert!(controller.admit("a", Tier::Premium).await.is_allowed());
        assert!(!controller.admit("a", Tier::Premium).await.is_allowed());
    }

    #[tokio::test]
    async fn test_failing_durable_falls_back_to_local() {
        let broken = Arc::new(BrokenCounter {
            calls: AtomicU32::new(0),
        });
        let controller =
            AdmissionController::with_durable(quota(2), Some(broken.clone() as Arc<dyn QuotaCounter>));

        assert!(controller.admit("acct", Tier::Free).await.is_allowed());
        assert!(controller.admit("acct", Tier::Free).await.is_allowed());
        assert!(!controller.admit("acct", Tier::Free).await.is_allowed());
        assert_eq!(broken.calls.load(Ordering::SeqCst), 3);
        assert!(!controller.durable_healthy.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_durable_times_out_to_local() {
        let controller = AdmissionController::with_durable(quota(1), Some(Arc::new(HangingCounter)));
        assert!(controller.admit("acct", Tier::Free).await.is_allowed());
        assert!(!controller.admit("acct", Tier::Free).await.is_allowed());

        let stats = controller.usage("acct", Tier::Free).await;
        assert_eq!(stats.used, 1);
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back() {
        let config = QuotaConfig {
            free: 1,
            redis_url: Some("redis://127.0.0.1:1".to_string()),
            ..QuotaConfig::default()
        };
        let controller = AdmissionController::from_config(&config);
        assert!(controller.admit("acct", Tier::Free).await.is_allowed());
        assert!(!controller.admit("acct", Tier::Free).await.is_allowed());
    }

    #[tokio::test]
    async fn test_invalid_redis_url_counts_locally() {
        let config = QuotaConfig {
            redis_url: Some("not a url".to_string()),
            ..QuotaConfig::default()
        };
        let controller = AdmissionController::from_config(&config);
        assert!(controller.durable.is_none());
        assert!(controller.admit("acct", Tier::Free).await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_reports_window() {
        let controller = AdmissionController::with_durable(quota(10), None);

        let fresh = controller.usage("acct", Tier::Free).await;
        assert_eq!(
            fresh,
            UsageStats {
                tier: Tier::Free,
                limit: 10,
                used: 0,
                remaining: 10,
                resets_in_secs: 3600,
            }
        );

        for _ in 0..3 {
            controller.admit("acct", Tier::Free).await;
        }
        tokio::time::advance(Duration::from_millis(1500)).await;
        let stats = controller.usage("acct", Tier::Free).await;
        assert_eq!(stats.used, 3);
        assert_eq!(stats.remaining, 7);
        assert_eq!(stats.resets_in_secs, 3599);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_secs(5)), 5);
        assert_eq!(ceil_secs(Duration::from_millis(5001)), 6);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
