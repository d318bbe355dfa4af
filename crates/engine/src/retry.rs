use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relationship_config::RetryPolicyConfig;
use relationship_errors::SchedulerResult;
use relationship_infrastructure::{MetricsCollector, StructuredLogger};

/// 存储调用的重试策略：指数退避 + 随机抖动，只重试暂时性错误
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn records_metrics(&self) -> bool {
        self.metrics.is_some()
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// 第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay = self.config.base_delay_ms as f64;
        let max_delay = self.config.max_delay_ms as f64;
        let multiplier = self.config.backoff_multiplier;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;

        let exponential_delay = base_delay * multiplier.powi(exponent);
        let capped_delay = exponential_delay.min(max_delay);

        // 添加随机抖动以避免雷群效应
        let jitter =
            capped_delay * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_delay = (capped_delay + jitter).max(base_delay);

        Duration::from_millis(final_delay as u64)
    }

    /// 执行操作，遇到 `is_retryable()` 的错误时按策略重试，其余错误直接返回
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> SchedulerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    StructuredLogger::log_store_retry(
                        operation,
                        attempt,
                        max_attempts,
                        delay.as_millis() as u64,
                        &e.to_string(),
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_store_retry();
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relationship_errors::SchedulerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryPolicyConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_delay_for_is_exponential_and_capped() {
        let policy = RetryPolicy::new(RetryPolicyConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_delay_with_jitter_stays_in_range() {
        let policy = RetryPolicy::new(RetryPolicyConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        });

        for _ in 0..50 {
            let delay = policy.delay_for(2).as_millis();
            assert!((180..=220).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let policy = fast_policy(3);
        let calls = AtomicU32::new(0);

        let result = policy
            .run("find_active", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SchedulerError::store_unavailable("连接池耗尽"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = fast_policy(2);
        let calls = AtomicU32::new(0);

        let result: SchedulerResult<()> = policy
            .run("create", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SchedulerError::store_unavailable("连接被拒绝")) }
            })
            .await;

        assert!(matches!(result, Err(SchedulerError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let policy = fast_policy(5);
        let calls = AtomicU32::new(0);

        let result: SchedulerResult<()> = policy
            .run("get", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SchedulerError::task_not_found(7)) }
            })
            .await;

        assert!(matches!(result, Err(SchedulerError::TaskNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
