//! 调度核心的指标
//!
//! 指标通过 `metrics` 门面记录，未安装导出器时为空操作。

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

pub struct MetricsCollector {
    tasks_created_total: Counter,
    tasks_confirmed_total: Counter,
    tasks_promoted_total: Counter,
    task_transitions_total: Counter,
    recalculation_duration: Histogram,
    audit_write_failures_total: Counter,
    store_retries_total: Counter,
    last_recalculation_students: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tasks_created_total: counter!("relationship_tasks_created_total"),
            tasks_confirmed_total: counter!("relationship_tasks_confirmed_total"),
            tasks_promoted_total: counter!("relationship_tasks_promoted_total"),
            task_transitions_total: counter!("relationship_task_transitions_total"),
            recalculation_duration: histogram!("relationship_recalculation_duration_seconds"),
            audit_write_failures_total: counter!("relationship_audit_write_failures_total"),
            store_retries_total: counter!("relationship_store_retries_total"),
            last_recalculation_students: gauge!("relationship_last_recalculation_students"),
        })
    }

    pub fn record_tasks_created(&self, count: usize) {
        self.tasks_created_total.increment(count as u64);
    }

    pub fn record_tasks_confirmed(&self, count: usize) {
        self.tasks_confirmed_total.increment(count as u64);
    }

    pub fn record_tasks_promoted(&self, count: usize) {
        self.tasks_promoted_total.increment(count as u64);
    }

    pub fn record_transition(&self) {
        self.task_transitions_total.increment(1);
    }

    /// 按错误码区分的单行错误
    pub fn record_row_error(&self, code: &str) {
        counter!("relationship_row_errors_total", "code" => code.to_string()).increment(1);
    }

    pub fn record_recalculation(&self, students: usize, duration_seconds: f64) {
        self.recalculation_duration.record(duration_seconds);
        self.last_recalculation_students.set(students as f64);

        debug!(
            students = students,
            duration_seconds = duration_seconds,
            "Recalculation metrics recorded"
        );
    }

    pub fn record_audit_write_failure(&self) {
        self.audit_write_failures_total.increment(1);
    }

    pub fn record_store_retry(&self) {
        self.store_retries_total.increment(1);
    }
}
