//! 结构化日志事件
//!
//! 每个函数对应一个具名 `event`，字段名在各组件之间保持一致，便于日志平台检索。

use chrono::NaiveDate;
use relationship_domain::{LogAction, Task, TaskStatus};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_recalculation_started(
        tenant_id: Uuid,
        run_date: NaiveDate,
        dry_run: bool,
        templates: usize,
        students: usize,
    ) {
        info!(
            event = "recalculation_started",
            tenant_id = %tenant_id,
            run_date = %run_date,
            dry_run = dry_run,
            templates = templates,
            students = students,
            "开始重算触达任务"
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_recalculation_completed(
        tenant_id: Uuid,
        run_date: NaiveDate,
        dry_run: bool,
        created: usize,
        confirmed: usize,
        promoted: usize,
        errors: usize,
        duration_ms: u64,
    ) {
        info!(
            event = "recalculation_completed",
            tenant_id = %tenant_id,
            run_date = %run_date,
            dry_run = dry_run,
            created = created,
            confirmed = confirmed,
            promoted = promoted,
            errors = errors,
            duration_ms = duration_ms,
            "重算完成"
        );
    }

    pub fn log_recalculation_cancelled(tenant_id: Uuid, not_started: usize) {
        warn!(
            event = "recalculation_cancelled",
            tenant_id = %tenant_id,
            not_started = not_started,
            "重算被取消，剩余学员未处理"
        );
    }

    pub fn log_template_rejected(tenant_id: Uuid, template_code: &str, reason: &str) {
        warn!(
            event = "template_rejected",
            tenant_id = %tenant_id,
            template_code = template_code,
            reason = reason,
            "模板校验失败，本次重算跳过该模板"
        );
    }

    pub fn log_task_created(task: &Task, dry_run: bool) {
        info!(
            event = "task_created",
            tenant_id = %task.tenant_id,
            student_id = %task.student_id,
            task_id = task.id,
            template_code = ?task.template_code,
            scheduled_for = %task.scheduled_for,
            status = %task.status,
            dry_run = dry_run,
            "创建触达任务"
        );
    }

    pub fn log_task_transitioned(task: &Task, from: TaskStatus, actor: &str) {
        info!(
            event = "task_transitioned",
            tenant_id = %task.tenant_id,
            task_id = task.id,
            template_code = ?task.template_code,
            from = %from,
            to = %task.status,
            actor = actor,
            "任务状态变更"
        );
    }

    pub fn log_task_confirmed(task: &Task) {
        debug!(
            event = "task_confirmed",
            tenant_id = %task.tenant_id,
            student_id = %task.student_id,
            task_id = task.id,
            template_code = ?task.template_code,
            "已存在活跃任务，保持不变"
        );
    }

    pub fn log_row_error(
        tenant_id: Uuid,
        student_id: Option<Uuid>,
        template_code: Option<&str>,
        code: &str,
        message: &str,
    ) {
        warn!(
            event = "row_error",
            tenant_id = %tenant_id,
            student_id = ?student_id,
            template_code = ?template_code,
            error_code = code,
            error = message,
            "单行处理失败"
        );
    }

    pub fn log_store_retry(operation: &str, attempt: u32, max_attempts: u32, delay_ms: u64, reason: &str) {
        warn!(
            event = "store_retry",
            operation = operation,
            attempt = attempt,
            max_attempts = max_attempts,
            delay_ms = delay_ms,
            reason = reason,
            "存储暂时不可用，准备重试"
        );
    }

    pub fn log_audit_write_failed(
        tenant_id: Uuid,
        student_id: Uuid,
        task_id: Option<i64>,
        action: LogAction,
        attempts: u32,
        error_message: &str,
    ) {
        error!(
            event = "audit_write_failed",
            tenant_id = %tenant_id,
            student_id = %student_id,
            task_id = ?task_id,
            action = %action,
            attempts = attempts,
            error = error_message,
            "时间线写入失败，任务已提交但缺少对应记录"
        );
    }

    pub fn log_manual_message(task: &Task, classification_tag: Option<&str>) {
        info!(
            event = "manual_message_logged",
            tenant_id = %task.tenant_id,
            student_id = %task.student_id,
            task_id = task.id,
            channel = %task.channel,
            created_by = %task.created_by,
            classification_tag = ?classification_tag,
            "记录人工触达"
        );
    }
}
