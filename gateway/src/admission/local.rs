//! Process-local quota counter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CounterError, QuotaCounter, WindowCount, WindowUsage};

/// Expired windows are swept once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed windows per key, all behind one mutex so check-then-increment is
/// atomic with respect to concurrent callers.
#[derive(Default)]
pub struct LocalCounter {
    windows: Mutex<HashMap<String, Window>>,
}

impl LocalCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one attempt against `key` unless it is already at `ceiling`.
    pub async fn increment(&self, key: &str, ceiling: u32, window: Duration) -> WindowCount {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, w| w.resets_at > now);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + window,
        });

        // Window rolled over
        if entry.resets_at <= now {
            entry.count = 0;
            entry.resets_at = now + window;
        }

        let admitted = entry.count < ceiling;
        if admitted {
            entry.count += 1;
        }

        WindowCount {
            admitted,
            count: entry.count,
            resets_in: entry.resets_at - now,
        }
    }

    /// Current count for `key`, without counting anything.
    pub async fn current(&self, key: &str) -> WindowUsage {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        match windows.get(key) {
            Some(w) if w.resets_at > now => WindowUsage {
                count: w.count,
                resets_in: Some(w.resets_at - now),
            },
            _ => WindowUsage::default(),
        }
    }
}

#[async_trait]
impl QuotaCounter for LocalCounter {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn increment_and_check(
        &self,
        key: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<WindowCount, CounterError> {
        Ok(self.increment(key, ceiling, window).await)
    }

    async fn usage(&self, key: &str, _window: Duration) -> Result<WindowUsage, CounterError> {
        Ok(self.current(key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_then_deny() {
        let counter = LocalCounter::new();
        for i in 1..=3 {
            let count = counter.increment("k", 3, HOUR).await;
            assert!(count.admitted);
            assert_eq!(count.count, i);
        }
        let denied = counter.increment("k", 3, HOUR).await;
        assert!(!denied.admitted);
        assert_eq!(denied.count, 3);
        assert!(denied.resets_in > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_attempt_does_not_count() {
        let counter = LocalCounter::new();
        counter.increment("k", 1, HOUR).await;
        for _ in 0..5 {
            counter.increment("k", 1, HOUR).await;
        }
        assert_eq!(counter.current("k").await.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rollover() {
        let counter = LocalCounter::new();
        counter.increment("k", 1, HOUR).await;
        assert!(!counter.increment("k", 1, HOUR).await.admitted);

        tokio::time::advance(HOUR).await;
        assert_eq!(counter.current("k").await, WindowUsage::default());

        let count = counter.increment("k", 1, HOUR).await;
        assert!(count.admitted);
        assert_eq!(count.resets_in, HOUR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let counter = LocalCounter::new();
        counter.increment("a", 1, HOUR).await;
        assert!(counter.increment("b", 1, HOUR).await.admitted);
        assert!(!counter.increment("a", 1, HOUR).await.admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resets_in_counts_down() {
        let counter = LocalCounter::new();
        counter.increment("k", 5, HOUR).await;
        tokio::time::advance(Duration::from_secs(600)).await;
        let usage = counter.current("k").await;
        assert_eq!(usage.count, 1);
        assert_eq!(usage.resets_in, Some(Duration::from_secs(3000)));
    }
}
