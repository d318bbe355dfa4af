//! 仓储接口的内存实现
//!
//! `MockTaskRepository` 在同一把锁内完成检查与写入，复现存储层唯一索引的语义：
//! 活跃任务键与周期键被占用时返回 `DuplicateActiveTask`。

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use relationship_domain::{
    LogEntry, LogQuery, NewLogEntry, NewTask, Student, StudentRepository, Task, TaskFilter,
    TaskLogRepository, TaskRepository, TaskStatus, Template, TemplateRepository,
};
use relationship_errors::{SchedulerError, SchedulerResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// 学员数据源
#[derive(Debug, Clone, Default)]
pub struct MockStudentRepository {
    students: Arc<Mutex<Vec<Student>>>,
}

impl MockStudentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_students(students: Vec<Student>) -> Self {
        Self {
            students: Arc::new(Mutex::new(students)),
        }
    }

    pub fn add_student(&self, student: Student) {
        self.students.lock().unwrap().push(student);
    }
}

#[async_trait]
impl StudentRepository for MockStudentRepository {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> SchedulerResult<Option<Student>> {
        let students = self.students.lock().unwrap();
        Ok(students
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .cloned())
    }

    async fn find_active_by_tenant(&self, tenant_id: Uuid) -> SchedulerResult<Vec<Student>> {
        let students = self.students.lock().unwrap();
        Ok(students
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.active)
            .cloned()
            .collect())
    }
}

/// 模板配置源
#[derive(Debug, Clone, Default)]
pub struct MockTemplateRepository {
    templates: Arc<Mutex<Vec<Template>>>,
}

impl MockTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: Vec<Template>) -> Self {
        Self {
            templates: Arc::new(Mutex::new(templates)),
        }
    }

    pub fn add_template(&self, template: Template) {
        self.templates.lock().unwrap().push(template);
    }
}

#[async_trait]
impl TemplateRepository for MockTemplateRepository {
    async fn find_active_by_tenant(&self, tenant_id: Uuid) -> SchedulerResult<Vec<Template>> {
        let templates = self.templates.lock().unwrap();
        Ok(templates
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.active)
            .cloned()
            .collect())
    }

    async fn tenants_with_active_templates(&self) -> SchedulerResult<Vec<Uuid>> {
        let templates = self.templates.lock().unwrap();
        let mut tenants: Vec<Uuid> = templates
            .iter()
            .filter(|t| t.active)
            .map(|t| t.tenant_id)
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}

/// 任务仓储
#[derive(Debug, Clone)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
    next_id: Arc<Mutex<i64>>,
    /// 之后若干次写入返回 `StoreUnavailable`
    failing_writes: Arc<AtomicU32>,
    /// 之后若干次插入先提交，再返回 `StoreUnavailable`
    lost_acks: Arc<AtomicU32>,
    create_calls: Arc<AtomicU32>,
    latency: Option<Duration>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            failing_writes: Arc::new(AtomicU32::new(0)),
            lost_acks: Arc::new(AtomicU32::new(0)),
            create_calls: Arc::new(AtomicU32::new(0)),
            latency: None,
        }
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let repo = Self::new();
        let mut max_id = 0;
        {
            let mut map = repo.tasks.lock().unwrap();
            for task in tasks {
                max_id = max_id.max(task.id);
                map.insert(task.id, task);
            }
        }
        *repo.next_id.lock().unwrap() = max_id + 1;
        repo
    }

    /// 每次调用前等待，用于触发处理单元超时
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// 模拟连接在提交之后断开：写入生效，调用方却收到暂时性错误
    pub fn lose_next_acks(&self, count: u32) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// 直接改写存储中的任务，模拟其他进程的并发修改
    pub fn overwrite(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(&self) -> SchedulerResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(SchedulerError::store_unavailable("模拟的存储故障")),
            Err(_) => Ok(()),
        }
    }
}

impl Default for MockTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, task: &NewTask) -> SchedulerResult<Task> {
        self.simulate_latency().await;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(code) = &task.template_code {
            let conflict = tasks.values().any(|existing| {
                existing.tenant_id == task.tenant_id
                    && existing.student_id == task.student_id
                    && existing.template_code.as_ref() == Some(code)
                    && (existing.is_active()
                        || (task.anchor_date.is_some() && existing.anchor_date == task.anchor_date))
            });
            if conflict {
                return Err(SchedulerError::DuplicateActiveTask {
                    tenant_id: task.tenant_id,
                    student_id: task.student_id,
                    template_code: code.clone(),
                });
            }
        }

        let mut next_id = self.next_id.lock().unwrap();
        let created = task.clone().into_task(*next_id, Utc::now());
        *next_id += 1;
        tasks.insert(created.id, created.clone());

        let lost = self
            .lost_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if lost.is_ok() {
            return Err(SchedulerError::store_unavailable("模拟的提交后连接中断"));
        }
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn find_active(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
    ) -> SchedulerResult<Option<Task>> {
        self.simulate_latency().await;
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .find(|t| {
                t.tenant_id == tenant_id
                    && t.student_id == student_id
                    && t.template_code.as_deref() == Some(template_code)
                    && t.is_active()
            })
            .cloned())
    }

    async fn find_by_cycle(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
        anchor_date: NaiveDate,
    ) -> SchedulerResult<Option<Task>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.student_id == student_id
                    && t.template_code.as_deref() == Some(template_code)
                    && t.anchor_date == Some(anchor_date)
            })
            .max_by_key(|t| t.id)
            .cloned())
    }

    async fn compare_and_update(&self, task: &Task, expected: TaskStatus) -> SchedulerResult<bool> {
        self.take_failure()?;
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&task.id) {
            Some(stored) if stored.status == expected => {
                *stored = task.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_promotable(
        &self,
        tenant_id: Uuid,
        run_date: NaiveDate,
    ) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut promotable: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && matches!(t.status, TaskStatus::Pending | TaskStatus::Snoozed)
                    && t.scheduled_for <= run_date
            })
            .cloned()
            .collect();
        promotable.sort_by_key(|t| (t.scheduled_for, t.id));
        Ok(promotable)
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut filtered: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        filtered.sort_by_key(|t| (t.scheduled_for, t.id));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }
}

/// 时间线仓储
#[derive(Debug, Clone, Default)]
pub struct MockTaskLogRepository {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MockTaskLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_for_task(&self, task_id: i64) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.task_id == Some(task_id))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskLogRepository for MockTaskLogRepository {
    async fn append(&self, entry: &NewLogEntry) -> SchedulerResult<LogEntry> {
        let mut entries = self.entries.lock().unwrap();
        let stored = entry.clone().into_entry(entries.len() as i64 + 1);
        entries.push(stored.clone());
        Ok(stored)
    }

    async fn timeline(&self, query: &LogQuery) -> SchedulerResult<Vec<LogEntry>> {
        let entries = self.entries.lock().unwrap();
        let mut matched: Vec<LogEntry> = entries
            .iter()
            .filter(|e| {
                e.tenant_id == query.tenant_id
                    && query.student_id.map_or(true, |id| e.student_id == id)
                    && query.in_range(e.created_at)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|e| (e.created_at, e.id));
        if let Some(limit) = query.limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }
}

/// 始终写入失败的时间线仓储，用于验证审计失败不影响主流程
#[derive(Debug, Clone, Default)]
pub struct FailingTaskLogRepository {
    attempts: Arc<AtomicU32>,
}

impl FailingTaskLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskLogRepository for FailingTaskLogRepository {
    async fn append(&self, _entry: &NewLogEntry) -> SchedulerResult<LogEntry> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SchedulerError::store_unavailable("时间线存储不可用"))
    }

    async fn timeline(&self, _query: &LogQuery) -> SchedulerResult<Vec<LogEntry>> {
        Err(SchedulerError::store_unavailable("时间线存储不可用"))
    }
}
