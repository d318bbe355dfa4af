//! 重算引擎
//!
//! 一次重算分三个阶段：
//!
//! 1. 模板校验：锚点或偏移量非法的模板只报告一次并排除
//! 2. 学员对账：按 `max_concurrency` 并发处理学员，每个学员内部按模板顺序评估，
//!    单个学员的处理单元有独立超时
//! 3. 到期推进：计划日期不晚于运行日期的 pending/snoozed 任务推进到 due_today
//!
//! 去重完全依赖存储层唯一索引；并发重算中插入失败的一方按"已存在"处理。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use relationship_config::EngineConfig;
use relationship_domain::{
    compute_due_date, is_eligible_today, resolve_anchor, AnchorKind, NewTask, Student,
    StudentRepository, TaskRepository, TaskStatus, Template, TemplateRepository,
    TransitionFields,
};
use relationship_errors::{SchedulerError, SchedulerResult};
use relationship_infrastructure::{MetricsCollector, StructuredLogger};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ledger::{TaskLedger, SYSTEM_ACTOR};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculationRequest {
    pub tenant_id: Uuid,
    pub run_date: NaiveDate,
    pub dry_run: bool,
    /// 只处理这些锚点的模板，为空表示全部
    pub anchors: Option<Vec<AnchorKind>>,
}

impl RecalculationRequest {
    pub fn new(tenant_id: Uuid, run_date: NaiveDate, dry_run: bool) -> Self {
        Self {
            tenant_id,
            run_date,
            dry_run,
            anchors: None,
        }
    }

    pub fn with_anchors(mut self, anchors: Vec<AnchorKind>) -> Self {
        self.anchors = Some(anchors);
        self
    }
}

/// 单行错误，student_id 为空表示模板级或租户级错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub tenant_id: Uuid,
    pub student_id: Option<Uuid>,
    pub template_code: Option<String>,
    pub code: String,
    pub message: String,
}

impl RowError {
    fn new(
        tenant_id: Uuid,
        student_id: Option<Uuid>,
        template_code: Option<&str>,
        error: &SchedulerError,
    ) -> Self {
        Self {
            tenant_id,
            student_id,
            template_code: template_code.map(str::to_string),
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalculationReport {
    pub tenant_id: Uuid,
    pub run_date: NaiveDate,
    pub dry_run: bool,
    pub students: usize,
    /// 新建（或试运行中将要新建）的任务，按学员和模板排序
    pub created: Vec<NewTask>,
    /// 已存在的活跃任务 id
    pub confirmed: Vec<i64>,
    /// 推进到 due_today 的任务 id
    pub promoted: Vec<i64>,
    pub unresolved: usize,
    pub not_eligible: usize,
    pub already_handled: usize,
    pub errors: Vec<RowError>,
    pub cancelled: bool,
    pub not_started: usize,
    pub duration_ms: u64,
}

impl RecalculationReport {
    fn empty(request: &RecalculationRequest) -> Self {
        Self {
            tenant_id: request.tenant_id,
            run_date: request.run_date,
            dry_run: request.dry_run,
            ..Default::default()
        }
    }
}

/// 单个 (学员, 模板) 的评估结果
#[derive(Debug)]
enum PairOutcome {
    Created(NewTask),
    Confirmed(i64),
    Unresolved,
    NotEligible,
    AlreadyHandled,
    Failed(RowError),
}

enum UnitResult {
    Completed(Vec<PairOutcome>),
    /// 超时前已经完成的组合照常计入报告
    TimedOut(Uuid, Vec<PairOutcome>),
    NotStarted,
}

pub struct RecalculationEngine {
    students: Arc<dyn StudentRepository>,
    templates: Arc<dyn TemplateRepository>,
    tasks: Arc<dyn TaskRepository>,
    ledger: Arc<TaskLedger>,
    config: EngineConfig,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl RecalculationEngine {
    pub fn new(
        students: Arc<dyn StudentRepository>,
        templates: Arc<dyn TemplateRepository>,
        tasks: Arc<dyn TaskRepository>,
        ledger: Arc<TaskLedger>,
        config: EngineConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let retry = RetryPolicy::new(config.store_retry.clone()).with_metrics(metrics.clone());
        Self {
            students,
            templates,
            tasks,
            ledger,
            config,
            retry,
            metrics,
        }
    }

    /// 重算一个租户。租户级读取失败返回错误，单行失败记录在报告中。
    #[instrument(skip(self, request, cancel), fields(
        tenant_id = %request.tenant_id,
        run_date = %request.run_date,
        dry_run = request.dry_run,
    ))]
    pub async fn recalculate(
        &self,
        request: RecalculationRequest,
        cancel: watch::Receiver<bool>,
    ) -> SchedulerResult<RecalculationReport> {
        let started = Instant::now();
        let tenant_id = request.tenant_id;
        let mut report = RecalculationReport::empty(&request);

        let templates = self
            .retry
            .run("load_templates", || self.templates.find_active_by_tenant(tenant_id))
            .await?;
        let templates = self.validate_templates(&request, templates, &mut report);

        let students = self
            .retry
            .run("load_students", || self.students.find_active_by_tenant(tenant_id))
            .await?;
        report.students = students.len();

        StructuredLogger::log_recalculation_started(
            tenant_id,
            request.run_date,
            request.dry_run,
            templates.len(),
            students.len(),
        );

        let max_concurrency = self.config.max_concurrency.max(1);
        let unit_timeout = Duration::from_millis(self.config.unit_timeout_ms);

        let results: Vec<UnitResult> = stream::iter(students)
            .map(|student| {
                let engine = self;
                let templates = &templates;
                let request = &request;
                let cancel = cancel.clone();
                async move {
                    if *cancel.borrow() {
                        return UnitResult::NotStarted;
                    }
                    let mut outcomes = Vec::with_capacity(templates.len());
                    let finished = tokio::time::timeout(
                        unit_timeout,
                        engine.process_student(request, &student, templates, &mut outcomes),
                    )
                    .await;
                    match finished {
                        Ok(()) => UnitResult::Completed(outcomes),
                        Err(_) => UnitResult::TimedOut(student.id, outcomes),
                    }
                }
            })
            .buffer_unordered(max_concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                UnitResult::Completed(outcomes) => {
                    for outcome in outcomes {
                        Self::apply_outcome(&mut report, outcome);
                    }
                }
                UnitResult::TimedOut(student_id, outcomes) => {
                    for outcome in outcomes {
                        Self::apply_outcome(&mut report, outcome);
                    }
                    let error = SchedulerError::timeout_error(format!(
                        "学员 {student_id} 的处理超过 {} 毫秒",
                        self.config.unit_timeout_ms
                    ));
                    report
                        .errors
                        .push(RowError::new(tenant_id, Some(student_id), None, &error));
                }
                UnitResult::NotStarted => report.not_started += 1,
            }
        }

        if report.not_started > 0 {
            report.cancelled = true;
            StructuredLogger::log_recalculation_cancelled(tenant_id, report.not_started);
        } else if *cancel.borrow() {
            report.cancelled = true;
        } else {
            self.promote_due_tasks(&request, &mut report).await;
        }

        report.created.sort_by(|a, b| {
            (a.student_id, &a.template_code, a.scheduled_for).cmp(&(
                b.student_id,
                &b.template_code,
                b.scheduled_for,
            ))
        });
        report.confirmed.sort_unstable();
        report.confirmed.dedup();
        report.promoted.sort_unstable();

        for error in &report.errors {
            StructuredLogger::log_row_error(
                error.tenant_id,
                error.student_id,
                error.template_code.as_deref(),
                &error.code,
                &error.message,
            );
            self.metrics.record_row_error(&error.code);
        }

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        if !request.dry_run {
            self.metrics.record_tasks_created(report.created.len());
            self.metrics.record_tasks_promoted(report.promoted.len());
        }
        self.metrics.record_tasks_confirmed(report.confirmed.len());
        self.metrics
            .record_recalculation(report.students, elapsed.as_secs_f64());

        StructuredLogger::log_recalculation_completed(
            tenant_id,
            request.run_date,
            request.dry_run,
            report.created.len(),
            report.confirmed.len(),
            report.promoted.len(),
            report.errors.len(),
            report.duration_ms,
        );

        Ok(report)
    }

    /// 依次重算所有存在活跃模板的租户，租户之间互不影响
    pub async fn recalculate_all(
        &self,
        run_date: NaiveDate,
        dry_run: bool,
        anchors: Option<Vec<AnchorKind>>,
        cancel: watch::Receiver<bool>,
    ) -> SchedulerResult<Vec<RecalculationReport>> {
        let tenants = self
            .retry
            .run("load_tenants", || self.templates.tenants_with_active_templates())
            .await?;
        info!("开始重算 {} 个租户 (运行日期: {})", tenants.len(), run_date);

        let mut reports = Vec::with_capacity(tenants.len());
        for tenant_id in tenants {
            let request = RecalculationRequest {
                tenant_id,
                run_date,
                dry_run,
                anchors: anchors.clone(),
            };
            if *cancel.borrow() {
                let mut report = RecalculationReport::empty(&request);
                report.cancelled = true;
                reports.push(report);
                continue;
            }

            match self.recalculate(request.clone(), cancel.clone()).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(tenant_id = %tenant_id, error = %e, "租户重算失败");
                    self.metrics.record_row_error(e.code());
                    let mut report = RecalculationReport::empty(&request);
                    report.errors.push(RowError::new(tenant_id, None, None, &e));
                    reports.push(report);
                }
            }
        }
        Ok(reports)
    }

    fn validate_templates(
        &self,
        request: &RecalculationRequest,
        templates: Vec<Template>,
        report: &mut RecalculationReport,
    ) -> Vec<(Template, AnchorKind)> {
        let mut valid = Vec::with_capacity(templates.len());
        for template in templates {
            match template.validate() {
                Ok(kind) => {
                    let selected = request
                        .anchors
                        .as_ref()
                        .map_or(true, |anchors| anchors.contains(&kind));
                    if selected {
                        valid.push((template, kind));
                    }
                }
                Err(e) => {
                    StructuredLogger::log_template_rejected(
                        request.tenant_id,
                        &template.code,
                        &e.to_string(),
                    );
                    report.errors.push(RowError::new(
                        request.tenant_id,
                        None,
                        Some(&template.code),
                        &e,
                    ));
                }
            }
        }
        valid
    }

    async fn process_student(
        &self,
        request: &RecalculationRequest,
        student: &Student,
        templates: &[(Template, AnchorKind)],
        outcomes: &mut Vec<PairOutcome>,
    ) {
        for (template, kind) in templates {
            let outcome = match self.evaluate(request, student, template, *kind).await {
                Ok(outcome) => outcome,
                Err(e) => PairOutcome::Failed(RowError::new(
                    request.tenant_id,
                    Some(student.id),
                    Some(&template.code),
                    &e,
                )),
            };
            outcomes.push(outcome);
        }
    }

    /// 评估一个 (学员, 模板) 组合
    async fn evaluate(
        &self,
        request: &RecalculationRequest,
        student: &Student,
        template: &Template,
        kind: AnchorKind,
    ) -> SchedulerResult<PairOutcome> {
        let run_date = request.run_date;
        let resolved = resolve_anchor(student, kind, run_date, template.offset_days);

        let (anchor_date, due_date) = match template.offset_days {
            // 立即发送的模板不依赖锚点，解析到的出现日只作为周期键
            None => (resolved.ok().flatten(), run_date),
            Some(_) => {
                let Some(anchor_date) = resolved? else {
                    return Ok(PairOutcome::Unresolved);
                };
                let due_date = compute_due_date(anchor_date, template.offset_days, run_date)?;
                (Some(anchor_date), due_date)
            }
        };
        if !is_eligible_today(due_date, run_date, self.config.tolerance_days) {
            return Ok(PairOutcome::NotEligible);
        }

        // 同一周期已有任务：终态视为已处理，活跃则保持不变
        if let Some(anchor_date) = anchor_date {
            if let Some(existing) = self
                .ledger
                .find_cycle_task(request.tenant_id, student.id, &template.code, anchor_date)
                .await?
            {
                if existing.status.is_terminal() {
                    return Ok(PairOutcome::AlreadyHandled);
                }
                StructuredLogger::log_task_confirmed(&existing);
                return Ok(PairOutcome::Confirmed(existing.id));
            }
        }

        if let Some(existing) = self
            .ledger
            .find_active_task(request.tenant_id, student.id, &template.code)
            .await?
        {
            StructuredLogger::log_task_confirmed(&existing);
            return Ok(PairOutcome::Confirmed(existing.id));
        }

        let new_task = Self::plan_task(request, student, template, kind, anchor_date, due_date);
        if request.dry_run {
            debug!(
                event = "task_planned",
                tenant_id = %new_task.tenant_id,
                student_id = %new_task.student_id,
                template_code = %template.code,
                scheduled_for = %new_task.scheduled_for,
                status = %new_task.status,
                "试运行：将创建任务"
            );
            return Ok(PairOutcome::Created(new_task));
        }

        match self.ledger.create_task(&new_task).await {
            Ok(_) => Ok(PairOutcome::Created(new_task)),
            Err(SchedulerError::DuplicateActiveTask { .. }) => {
                // 并发重算已经写入
                let winner = self
                    .ledger
                    .find_active_task(request.tenant_id, student.id, &template.code)
                    .await?;
                Ok(match winner {
                    Some(task) => PairOutcome::Confirmed(task.id),
                    None => PairOutcome::AlreadyHandled,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn plan_task(
        request: &RecalculationRequest,
        student: &Student,
        template: &Template,
        kind: AnchorKind,
        anchor_date: Option<NaiveDate>,
        due_date: NaiveDate,
    ) -> NewTask {
        let status = if due_date <= request.run_date {
            TaskStatus::DueToday
        } else {
            TaskStatus::Pending
        };

        NewTask {
            tenant_id: request.tenant_id,
            student_id: student.id,
            template_code: Some(template.code.clone()),
            anchor: kind.code().to_string(),
            anchor_date,
            scheduled_for: due_date,
            channel: template.channel.clone(),
            status,
            payload: json!({
                "description": kind.describe(template.offset_days),
                "due_date": due_date,
                "anchor_date": anchor_date,
                "offset_days": template.offset_days,
            }),
            created_by: SYSTEM_ACTOR.to_string(),
            sent_at: None,
            notes: None,
        }
    }

    /// 推进已到期的 pending/snoozed 任务；试运行只报告
    async fn promote_due_tasks(&self, request: &RecalculationRequest, report: &mut RecalculationReport) {
        let tenant_id = request.tenant_id;
        let promotable = match self
            .retry
            .run("find_promotable", || {
                self.tasks.find_promotable(tenant_id, request.run_date)
            })
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                report.errors.push(RowError::new(tenant_id, None, None, &e));
                return;
            }
        };

        for task in promotable {
            if request.dry_run {
                report.promoted.push(task.id);
                continue;
            }
            match self
                .ledger
                .transition_loaded(&task, TaskStatus::DueToday, TransitionFields::default(), SYSTEM_ACTOR)
                .await
            {
                Ok(promoted) => report.promoted.push(promoted.id),
                // 已被人工处理
                Err(SchedulerError::InvalidTransition { .. }) => {
                    debug!(task_id = task.id, "任务状态已变化，跳过推进");
                }
                Err(e) => report.errors.push(RowError::new(
                    tenant_id,
                    Some(task.student_id),
                    task.template_code.as_deref(),
                    &e,
                )),
            }
        }
    }

    fn apply_outcome(report: &mut RecalculationReport, outcome: PairOutcome) {
        match outcome {
            PairOutcome::Created(task) => report.created.push(task),
            PairOutcome::Confirmed(id) => report.confirmed.push(id),
            PairOutcome::Unresolved => report.unresolved += 1,
            PairOutcome::NotEligible => report.not_eligible += 1,
            PairOutcome::AlreadyHandled => report.already_handled += 1,
            PairOutcome::Failed(error) => report.errors.push(error),
        }
    }
}
