use std::sync::Arc;

use relationship_config::AppConfig;
use relationship_domain::{StudentRepository, TaskLogRepository, TaskRepository, TemplateRepository};
use relationship_infrastructure::MetricsCollector;

use crate::audit::AuditEmitter;
use crate::ledger::TaskLedger;
use crate::manual::ManualOverrideChannel;
use crate::recalculation::RecalculationEngine;
use crate::retry::RetryPolicy;

/// 调度核心依赖的四个数据源
#[derive(Clone)]
pub struct Repositories {
    pub students: Arc<dyn StudentRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub logs: Arc<dyn TaskLogRepository>,
}

/// 组装好的调度核心：台账、重算引擎、人工登记和时间线共享同一组仓储
pub struct RelationshipScheduler {
    pub ledger: Arc<TaskLedger>,
    pub engine: Arc<RecalculationEngine>,
    pub manual: Arc<ManualOverrideChannel>,
    pub audit: Arc<AuditEmitter>,
}

impl RelationshipScheduler {
    pub fn new(repos: Repositories, config: &AppConfig, metrics: Arc<MetricsCollector>) -> Self {
        let (store_retry, audit_retry) = retry_policies(config, &metrics);

        let audit = Arc::new(AuditEmitter::new(repos.logs, audit_retry, metrics.clone()));
        let ledger = Arc::new(TaskLedger::new(
            repos.tasks.clone(),
            audit.clone(),
            store_retry.clone(),
            metrics.clone(),
        ));
        let engine = Arc::new(RecalculationEngine::new(
            repos.students.clone(),
            repos.templates,
            repos.tasks,
            ledger.clone(),
            config.engine.clone(),
            metrics,
        ));
        let manual = Arc::new(ManualOverrideChannel::new(
            repos.students,
            ledger.clone(),
            store_retry,
        ));

        Self {
            ledger,
            engine,
            manual,
            audit,
        }
    }
}

/// 存储重试与审计重试分别取各自的配置，重试次数都计入同一个指标
fn retry_policies(config: &AppConfig, metrics: &Arc<MetricsCollector>) -> (RetryPolicy, RetryPolicy) {
    let store_retry =
        RetryPolicy::new(config.engine.store_retry.clone()).with_metrics(metrics.clone());
    let audit_retry = RetryPolicy::new(config.audit.retry.clone()).with_metrics(metrics.clone());
    (store_retry, audit_retry)
}
