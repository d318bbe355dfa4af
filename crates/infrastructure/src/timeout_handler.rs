//! 存储调用的超时控制
//!
//! 超时时间来自 `database.statement_timeout_seconds` 与
//! `database.migration_timeout_seconds`，到期返回可重试的 `Timeout`。

use relationship_errors::{SchedulerError, SchedulerResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// 单条语句
    pub statement_timeout: Duration,
    /// 建表迁移
    pub migration_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(30),
            migration_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutHandler {
    config: TimeoutConfig,
}

impl TimeoutHandler {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self, operation))]
    pub async fn statement<F, T>(&self, operation: F, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        Self::run(operation, self.config.statement_timeout, operation_name).await
    }

    #[instrument(skip(self, operation))]
    pub async fn migration<F, T>(&self, operation: F, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        Self::run(operation, self.config.migration_timeout, operation_name).await
    }

    async fn run<F, T>(operation: F, limit: Duration, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        match timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!("存储操作 '{operation_name}' 超时 (超时时间: {limit:?})");
                error!(operation = operation_name, "{}", message);
                Err(SchedulerError::timeout_error(message))
            }
        }
    }
}
