//! 时间线写入
//!
//! 时间线是任务变更之后的独立一步，写入失败不回滚任务，
//! 只通过结构化日志、指标和进程内计数对外暴露。

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use relationship_domain::{LogAction, LogEntry, LogQuery, NewLogEntry, Task, TaskLogRepository};
use relationship_errors::SchedulerResult;
use relationship_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, instrument};

use crate::retry::RetryPolicy;

pub struct AuditEmitter {
    log_repo: Arc<dyn TaskLogRepository>,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
    failures: AtomicU64,
}

impl AuditEmitter {
    pub fn new(
        log_repo: Arc<dyn TaskLogRepository>,
        retry: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            log_repo,
            retry,
            metrics,
            failures: AtomicU64::new(0),
        }
    }

    /// 追加一条时间线记录，失败时返回 `None`，永不向调用方传播错误
    #[instrument(skip(self, entry), fields(
        tenant_id = %entry.tenant_id,
        student_id = %entry.student_id,
        task_id = ?entry.task_id,
        action = %entry.action,
    ))]
    pub async fn record(&self, entry: NewLogEntry) -> Option<LogEntry> {
        let attempts = AtomicU32::new(0);
        let result = self
            .retry
            .run("append_log", || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.log_repo.append(&entry)
            })
            .await;

        match result {
            Ok(logged) => {
                debug!(log_id = logged.id, "时间线记录已写入");
                Some(logged)
            }
            Err(e) => {
                StructuredLogger::log_audit_write_failed(
                    entry.tenant_id,
                    entry.student_id,
                    entry.task_id,
                    entry.action,
                    attempts.load(Ordering::Relaxed),
                    &e.to_string(),
                );
                self.metrics.record_audit_write_failure();
                self.failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn record_for_task(
        &self,
        task: &Task,
        action: LogAction,
        meta: serde_json::Value,
    ) -> Option<LogEntry> {
        self.record(NewLogEntry::for_task(task, action, meta)).await
    }

    /// 进程启动以来写入失败的次数
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn timeline(&self, query: &LogQuery) -> SchedulerResult<Vec<LogEntry>> {
        self.retry
            .run("timeline", || self.log_repo.timeline(query))
            .await
    }
}
