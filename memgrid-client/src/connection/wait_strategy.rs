//! Backoff between rounds of cluster connect attempts.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::ConnectionRetryConfig;

/// Exponential backoff with jitter, bounded by a total time budget.
///
/// One strategy is reset at the start of every attempt to connect to a
/// candidate cluster; `sleep` then returns `false` once the budget is spent.
#[derive(Debug, Clone)]
pub struct WaitStrategy {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
    cluster_connect_timeout: Option<Duration>,
    attempt: u32,
    current_backoff: Duration,
    cluster_connect_start: Instant,
}

impl WaitStrategy {
    /// Creates a strategy from the retry configuration. Call `reset` before
    /// the first round.
    pub fn new(config: &ConnectionRetryConfig) -> Self {
        let initial_backoff = config.initial_backoff().min(config.max_backoff());
        Self {
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: config.multiplier(),
            jitter: config.jitter(),
            cluster_connect_timeout: config.cluster_connect_timeout(),
            attempt: 0,
            current_backoff: initial_backoff,
            cluster_connect_start: Instant::now(),
        }
    }

    /// Starts a new time budget.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.cluster_connect_start = Instant::now();
        self.current_backoff = self.initial_backoff.min(self.max_backoff);
    }

    /// Number of `sleep` calls since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Backoff the next `sleep` is centered on.
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }

    /// Sleeps before the next round. Returns `false` without sleeping once
    /// the cluster connect timeout has elapsed.
    pub async fn sleep(&mut self) -> bool {
        self.attempt += 1;
        let elapsed = self.cluster_connect_start.elapsed();

        let remaining = match self.cluster_connect_timeout {
            Some(timeout) if elapsed >= timeout => {
                tracing::warn!(
                    attempt = self.attempt,
                    elapsed = ?elapsed,
                    timeout = ?timeout,
                    "unable to get live cluster connection, cluster connect timeout reached"
                );
                return false;
            }
            Some(timeout) => Some(timeout - elapsed),
            None => None,
        };

        let mut sleep_for = self.jittered(self.current_backoff);
        if let Some(remaining) = remaining {
            sleep_for = sleep_for.min(remaining);
        }

        tracing::warn!(
            attempt = self.attempt,
            elapsed = ?elapsed,
            sleep = ?sleep_for,
            "unable to get live cluster connection, retrying"
        );
        tokio::time::sleep(sleep_for).await;

        let next = self.current_backoff.as_secs_f64() * self.multiplier;
        self.current_backoff = Duration::try_from_secs_f64(next)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        true
    }

    fn jittered(&self, backoff: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return backoff;
        }
        let base = backoff.as_secs_f64();
        let delta = base * rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::try_from_secs_f64((base + delta).max(0.0)).unwrap_or(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionRetryConfigBuilder;

    fn config(timeout: Option<Duration>) -> ConnectionRetryConfig {
        let mut builder = ConnectionRetryConfigBuilder::new()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(400))
            .multiplier(2.0);
        if let Some(timeout) = timeout {
            builder = builder.cluster_connect_timeout(timeout);
        }
        builder.build().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_caps_at_max() {
        let mut strategy = WaitStrategy::new(&config(None));
        strategy.reset();

        let mut observed = Vec::new();
        for _ in 0..5 {
            let before = Instant::now();
            assert!(strategy.sleep().await);
            observed.push(before.elapsed());
        }

        assert_eq!(
            observed,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(400),
                Duration::from_millis(400),
            ]
        );
        assert_eq!(strategy.attempt(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_stops_after_timeout() {
        let mut strategy = WaitStrategy::new(&config(Some(Duration::from_millis(250))));
        strategy.reset();

        let start = Instant::now();
        assert!(strategy.sleep().await);
        assert!(strategy.sleep().await);
        // Clamped to the 50ms left in the budget.
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        assert!(!strategy.sleep().await);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_budget_and_backoff() {
        let mut strategy = WaitStrategy::new(&config(Some(Duration::from_millis(150))));
        strategy.reset();
        assert!(strategy.sleep().await);
        assert!(strategy.sleep().await);
        assert!(!strategy.sleep().await);

        strategy.reset();
        assert_eq!(strategy.attempt(), 0);
        assert_eq!(strategy.current_backoff(), Duration::from_millis(100));
        assert!(strategy.sleep().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_growth_saturates_at_huge_max() {
        let config = ConnectionRetryConfigBuilder::new()
            .initial_backoff(Duration::from_secs(1))
            .max_backoff(Duration::MAX)
            .multiplier(1e300)
            .cluster_connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        let mut strategy = WaitStrategy::new(&config);
        strategy.reset();

        assert!(strategy.sleep().await);
        assert_eq!(strategy.current_backoff(), Duration::MAX);
        assert!(strategy.sleep().await);
        assert!(!strategy.sleep().await);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = ConnectionRetryConfigBuilder::new()
            .initial_backoff(Duration::from_secs(1))
            .jitter(0.5)
            .build()
            .unwrap();
        let strategy = WaitStrategy::new(&config);
        for _ in 0..100 {
            let value = strategy.jittered(Duration::from_secs(1));
            assert!(value >= Duration::from_millis(500) && value <= Duration::from_millis(1500));
        }
    }
}
