//! 任务台账
//!
//! 所有状态变更都以 (id, 期望状态) 做比较并写入，竞争失败时以胜出方的状态
//! 报告 `InvalidTransition`。每次成功的变更追加一条时间线记录。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use relationship_domain::{
    LogAction, LogQuery, NewTask, Task, TaskFilter, TaskRepository, TaskStatus, TransitionFields,
};
use relationship_errors::{SchedulerError, SchedulerResult};
use relationship_infrastructure::{MetricsCollector, StructuredLogger};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditEmitter;
use crate::retry::RetryPolicy;

/// 引擎自身执行的操作记录的操作人
pub const SYSTEM_ACTOR: &str = "system";

/// 某个日期区间内任务的分布，供分析看板使用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub tenant_id: Uuid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_anchor: BTreeMap<String, usize>,
}

pub struct TaskLedger {
    tasks: Arc<dyn TaskRepository>,
    audit: Arc<AuditEmitter>,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl TaskLedger {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        audit: Arc<AuditEmitter>,
        retry: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            tasks,
            audit,
            retry,
            metrics,
        }
    }

    pub fn audit(&self) -> &Arc<AuditEmitter> {
        &self.audit
    }

    pub async fn find_active_task(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
    ) -> SchedulerResult<Option<Task>> {
        self.retry
            .run("find_active", || {
                self.tasks.find_active(tenant_id, student_id, template_code)
            })
            .await
    }

    pub async fn find_cycle_task(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
        anchor_date: NaiveDate,
    ) -> SchedulerResult<Option<Task>> {
        self.retry
            .run("find_by_cycle", || {
                self.tasks
                    .find_by_cycle(tenant_id, student_id, template_code, anchor_date)
            })
            .await
    }

    /// 写入新任务并记录 `created`；键已被占用时返回 `DuplicateActiveTask`。
    ///
    /// 插入不是幂等操作：人工任务没有唯一键，只尝试一次；自动任务重试后遇到
    /// 唯一键冲突，说明先前那次写入可能已经提交，此时按周期键找回任务并补记 `created`。
    #[instrument(skip(self, new_task), fields(
        tenant_id = %new_task.tenant_id,
        student_id = %new_task.student_id,
        template_code = ?new_task.template_code,
    ))]
    pub async fn create_task(&self, new_task: &NewTask) -> SchedulerResult<Task> {
        let Some(template_code) = new_task.template_code.as_deref() else {
            let task = self.tasks.create(new_task).await?;
            return Ok(self.record_created(task).await);
        };

        let mut attempts = 0u32;
        let created = self
            .retry
            .run("create_task", || {
                attempts += 1;
                self.tasks.create(new_task)
            })
            .await;

        match created {
            Ok(task) => Ok(self.record_created(task).await),
            Err(e @ SchedulerError::DuplicateActiveTask { .. }) if attempts > 1 => {
                match self.recover_committed(new_task, template_code).await? {
                    Some(task) => Ok(self.record_created(task).await),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// 找回重试前已提交但确认丢失的任务；已有 `created` 记录说明是其他写入方
    async fn recover_committed(
        &self,
        new_task: &NewTask,
        template_code: &str,
    ) -> SchedulerResult<Option<Task>> {
        let (tenant_id, student_id) = (new_task.tenant_id, new_task.student_id);
        let stored = match new_task.anchor_date {
            Some(anchor_date) => {
                self.find_cycle_task(tenant_id, student_id, template_code, anchor_date)
                    .await?
            }
            None => self.find_active_task(tenant_id, student_id, template_code).await?,
        };
        let Some(task) = stored.filter(|task| {
            task.scheduled_for == new_task.scheduled_for
                && task.status == new_task.status
                && task.created_by == new_task.created_by
        }) else {
            return Ok(None);
        };

        let logged = self
            .audit
            .timeline(&LogQuery::for_student(tenant_id, student_id))
            .await?
            .iter()
            .any(|entry| entry.task_id == Some(task.id) && entry.action == LogAction::Created);
        if logged {
            return Ok(None);
        }

        warn!(
            task_id = task.id,
            tenant_id = %tenant_id,
            student_id = %student_id,
            template_code = %template_code,
            "插入确认丢失但任务已提交，补记 created"
        );
        Ok(Some(task))
    }

    async fn record_created(&self, task: Task) -> Task {
        StructuredLogger::log_task_created(&task, false);
        self.audit
            .record_for_task(
                &task,
                LogAction::Created,
                json!({
                    "status": task.status,
                    "scheduled_for": task.scheduled_for,
                    "created_by": task.created_by,
                }),
            )
            .await;
        task
    }

    pub async fn get(&self, task_id: i64) -> SchedulerResult<Task> {
        self.retry
            .run("get_task", || self.tasks.get_by_id(task_id))
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(task_id))
    }

    pub async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        self.retry.run("list_tasks", || self.tasks.list(filter)).await
    }

    /// 按状态机校验后变更任务状态
    #[instrument(skip(self, fields))]
    pub async fn transition(
        &self,
        task_id: i64,
        next: TaskStatus,
        fields: TransitionFields,
        actor: &str,
    ) -> SchedulerResult<Task> {
        let current = self.get(task_id).await?;
        self.transition_loaded(&current, next, fields, actor).await
    }

    /// 以已读取的快照为期望状态执行转换，引擎推进 due_today 时使用
    pub async fn transition_loaded(
        &self,
        current: &Task,
        next: TaskStatus,
        fields: TransitionFields,
        actor: &str,
    ) -> SchedulerResult<Task> {
        let notes = fields.notes.clone();
        let updated = current.transitioned(next, fields, Utc::now())?;
        self.commit(current, &updated).await?;

        self.metrics.record_transition();
        StructuredLogger::log_task_transitioned(&updated, current.status, actor);

        let mut meta = json!({
            "from": current.status,
            "to": updated.status,
            "actor": actor,
        });
        if let Some(notes) = notes {
            meta["notes"] = json!(notes);
        }
        if let Some(sent_at) = updated.sent_at.filter(|_| next == TaskStatus::Sent) {
            meta["sent_at"] = json!(sent_at);
        }
        self.audit
            .record_for_task(&updated, action_for(next), meta)
            .await;
        Ok(updated)
    }

    /// 改期：新日期晚于原计划日期时转为 snoozed，否则保持状态
    #[instrument(skip(self))]
    pub async fn postpone(
        &self,
        task_id: i64,
        new_date: NaiveDate,
        actor: &str,
    ) -> SchedulerResult<Task> {
        let current = self.get(task_id).await?;
        let updated = current.postponed_to(new_date, Utc::now())?;
        self.commit(&current, &updated).await?;

        if updated.status != current.status {
            self.metrics.record_transition();
            StructuredLogger::log_task_transitioned(&updated, current.status, actor);
        }

        self.audit
            .record_for_task(
                &updated,
                LogAction::Postponed,
                json!({
                    "from_date": current.scheduled_for,
                    "to_date": updated.scheduled_for,
                    "status_before": current.status,
                    "status_after": updated.status,
                    "actor": actor,
                }),
            )
            .await;
        Ok(updated)
    }

    /// 外部发送方确认成功后标记已发送
    pub async fn mark_sent(
        &self,
        task_id: i64,
        sent_at: Option<DateTime<Utc>>,
        actor: &str,
    ) -> SchedulerResult<Task> {
        let fields = TransitionFields {
            sent_at,
            ..Default::default()
        };
        self.transition(task_id, TaskStatus::Sent, fields, actor)
            .await
    }

    pub async fn skip(
        &self,
        task_id: i64,
        reason: Option<String>,
        actor: &str,
    ) -> SchedulerResult<Task> {
        let fields = TransitionFields {
            notes: reason,
            ..Default::default()
        };
        self.transition(task_id, TaskStatus::Skipped, fields, actor)
            .await
    }

    /// 统计 `[from, to]` 计划日期区间内的任务分布
    pub async fn summary(
        &self,
        tenant_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SchedulerResult<TaskSummary> {
        let filter = TaskFilter {
            scheduled_from: Some(from),
            scheduled_to: Some(to),
            ..TaskFilter::for_tenant(tenant_id)
        };
        let tasks = self.list(&filter).await?;

        let mut summary = TaskSummary {
            tenant_id,
            from,
            to,
            total: tasks.len(),
            ..Default::default()
        };
        for task in &tasks {
            *summary
                .by_status
                .entry(task.status.as_str().to_string())
                .or_default() += 1;
            *summary.by_anchor.entry(task.anchor.clone()).or_default() += 1;
        }
        Ok(summary)
    }

    async fn commit(&self, current: &Task, updated: &Task) -> SchedulerResult<()> {
        let written = self
            .retry
            .run("compare_and_update", || {
                self.tasks.compare_and_update(updated, current.status)
            })
            .await?;
        if written {
            return Ok(());
        }

        // 竞争失败：以存储中的最新状态报告
        let latest = self.get(current.id).await?;
        debug!(
            task_id = current.id,
            expected = %current.status,
            actual = %latest.status,
            "状态已被并发修改"
        );
        Err(SchedulerError::invalid_transition(
            current.id,
            latest.status,
            updated.status,
        ))
    }
}

fn action_for(status: TaskStatus) -> LogAction {
    match status {
        TaskStatus::Sent => LogAction::Sent,
        TaskStatus::Skipped => LogAction::Skipped,
        TaskStatus::Snoozed => LogAction::Snoozed,
        TaskStatus::DueToday | TaskStatus::Pending => LogAction::Due,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relationship_config::RetryPolicyConfig;
    use relationship_testing_utils::{date, MockTaskLogRepository, MockTaskRepository, TaskBuilder};

    struct Harness {
        ledger: TaskLedger,
        tasks: Arc<MockTaskRepository>,
        logs: Arc<MockTaskLogRepository>,
    }

    fn harness(tasks: MockTaskRepository) -> Harness {
        let tasks = Arc::new(tasks);
        let logs = Arc::new(MockTaskLogRepository::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let retry = RetryPolicy::new(RetryPolicyConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        });
        let audit = Arc::new(AuditEmitter::new(logs.clone(), retry.clone(), metrics.clone()));
        Harness {
            ledger: TaskLedger::new(tasks.clone(), audit, retry, metrics),
            tasks,
            logs,
        }
    }

    fn task_in(status: TaskStatus) -> Task {
        TaskBuilder::new(Uuid::new_v4(), Uuid::new_v4())
            .scheduled_for(date(2025, 3, 1))
            .with_status(status)
            .build(1)
    }

    #[tokio::test]
    async fn test_mark_sent_from_due_today() {
        let h = harness(MockTaskRepository::with_tasks(vec![task_in(TaskStatus::DueToday)]));

        let sent = h.ledger.mark_sent(1, None, "ana").await.unwrap();

        assert_eq!(sent.status, TaskStatus::Sent);
        assert!(sent.sent_at.is_some());
        let entries = h.logs.entries_for_task(1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, LogAction::Sent);
        assert_eq!(entries[0].meta["actor"], "ana");
    }

    #[tokio::test]
    async fn test_pending_cannot_be_sent_directly() {
        let h = harness(MockTaskRepository::with_tasks(vec![task_in(TaskStatus::Pending)]));

        let result = h.ledger.mark_sent(1, None, "ana").await;

        assert!(matches!(result, Err(SchedulerError::InvalidTransition { .. })));
        assert_eq!(h.logs.count(), 0);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        for status in [TaskStatus::Sent, TaskStatus::Skipped] {
            let h = harness(MockTaskRepository::with_tasks(vec![task_in(status)]));

            for next in [
                TaskStatus::Pending,
                TaskStatus::DueToday,
                TaskStatus::Snoozed,
                TaskStatus::Sent,
                TaskStatus::Skipped,
            ] {
                let result = h
                    .ledger
                    .transition(1, next, TransitionFields::default(), "ana")
                    .await;
                assert!(
                    matches!(result, Err(SchedulerError::InvalidTransition { .. })),
                    "{status} -> {next} should be rejected"
                );
            }

            let postponed = h.ledger.postpone(1, date(2025, 3, 5), "ana").await;
            assert!(matches!(postponed, Err(SchedulerError::InvalidTransition { .. })));
            assert_eq!(h.tasks.get_all_tasks()[0].status, status);
        }
    }

    #[tokio::test]
    async fn test_postpone_later_snoozes() {
        let h = harness(MockTaskRepository::with_tasks(vec![task_in(TaskStatus::DueToday)]));

        let task = h.ledger.postpone(1, date(2025, 3, 4), "ana").await.unwrap();

        assert_eq!(task.status, TaskStatus::Snoozed);
        assert_eq!(task.scheduled_for, date(2025, 3, 4));
        let entries = h.logs.entries_for_task(1);
        assert_eq!(entries[0].action, LogAction::Postponed);
        assert_eq!(entries[0].meta["status_after"], "snoozed");
    }

    #[tokio::test]
    async fn test_postpone_earlier_keeps_status() {
        let h = harness(MockTaskRepository::with_tasks(vec![task_in(TaskStatus::Pending)]));

        let task = h.ledger.postpone(1, date(2025, 2, 27), "ana").await.unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.scheduled_for, date(2025, 2, 27));
    }

    #[tokio::test]
    async fn test_lost_race_reports_winning_status() {
        let h = harness(MockTaskRepository::with_tasks(vec![task_in(TaskStatus::DueToday)]));
        let stale = h.ledger.get(1).await.unwrap();

        // 另一名操作人先完成了发送
        let mut winner = stale.clone();
        winner.status = TaskStatus::Sent;
        winner.sent_at = Some(Utc::now());
        h.tasks.overwrite(winner);

        let result = h
            .ledger
            .transition_loaded(&stale, TaskStatus::Skipped, TransitionFields::default(), "bruno")
            .await;

        match result {
            Err(SchedulerError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, "sent");
                assert_eq!(to, "skipped");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(h.logs.count(), 0);
    }

    #[tokio::test]
    async fn test_skip_records_reason() {
        let h = harness(MockTaskRepository::with_tasks(vec![task_in(TaskStatus::Snoozed)]));

        let task = h
            .ledger
            .skip(1, Some("aluno pediu pausa".to_string()), "ana")
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Skipped);
        assert_eq!(task.notes.as_deref(), Some("aluno pediu pausa"));
        assert_eq!(h.logs.entries_for_task(1)[0].meta["notes"], "aluno pediu pausa");
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let h = harness(MockTaskRepository::new());
        let result = h.ledger.postpone(99, date(2025, 3, 4), "ana").await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound { id: 99 })));
    }

    #[tokio::test]
    async fn test_summary_counts_by_status_and_anchor() {
        let tenant_id = Uuid::new_v4();
        let student_id = Uuid::new_v4();
        let tasks = vec![
            TaskBuilder::new(tenant_id, student_id)
                .with_template_code("A")
                .scheduled_for(date(2025, 3, 1))
                .build(1),
            TaskBuilder::new(tenant_id, student_id)
                .with_template_code("B")
                .scheduled_for(date(2025, 3, 2))
                .with_status(TaskStatus::Sent)
                .build(2),
            TaskBuilder::new(tenant_id, student_id)
                .with_template_code("C")
                .scheduled_for(date(2025, 4, 1))
                .build(3),
        ];
        let h = harness(MockTaskRepository::with_tasks(tasks));

        let summary = h
            .ledger
            .summary(tenant_id, date(2025, 3, 1), date(2025, 3, 31))
            .await
            .unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_status.get("pending"), Some(&1));
        assert_eq!(summary.by_status.get("sent"), Some(&1));
        assert_eq!(summary.by_anchor.get("first_workout"), Some(&2));
    }
}
