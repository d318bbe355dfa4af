//! 领域仓储抽象
//!
//! 学员与模板由外部系统维护（只读）；任务与时间线由调度核心写入。
//! 去重约束由存储层的唯一索引保证，进程内不加锁。

use async_trait::async_trait;
use chrono::NaiveDate;
use relationship_errors::SchedulerResult;
use uuid::Uuid;

use crate::entities::{LogEntry, NewLogEntry, NewTask, Student, Task, TaskStatus, Template};
use crate::value_objects::{LogQuery, TaskFilter};

/// 学员数据源（只读）
#[async_trait]
pub trait StudentRepository: Send + Sync {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> SchedulerResult<Option<Student>>;
    async fn find_active_by_tenant(&self, tenant_id: Uuid) -> SchedulerResult<Vec<Student>>;
}

/// 模板配置源（只读）
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_active_by_tenant(&self, tenant_id: Uuid) -> SchedulerResult<Vec<Template>>;
    async fn tenants_with_active_templates(&self) -> SchedulerResult<Vec<Uuid>>;
}

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 写入新任务；活跃任务键或周期键已被占用时返回 `DuplicateActiveTask`
    async fn create(&self, task: &NewTask) -> SchedulerResult<Task>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;
    async fn find_active(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
    ) -> SchedulerResult<Option<Task>>;
    async fn find_by_cycle(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
        anchor_date: NaiveDate,
    ) -> SchedulerResult<Option<Task>>;
    /// 仅当存储中的状态仍为 `expected` 时写入，返回是否写入成功
    async fn compare_and_update(&self, task: &Task, expected: TaskStatus) -> SchedulerResult<bool>;
    /// pending/snoozed 且计划日期不晚于运行日期的任务
    async fn find_promotable(
        &self,
        tenant_id: Uuid,
        run_date: NaiveDate,
    ) -> SchedulerResult<Vec<Task>>;
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;
}

/// 时间线仓储（只追加）
#[async_trait]
pub trait TaskLogRepository: Send + Sync {
    async fn append(&self, entry: &NewLogEntry) -> SchedulerResult<LogEntry>;
    async fn timeline(&self, query: &LogQuery) -> SchedulerResult<Vec<LogEntry>>;
}
