use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Task, TaskStatus};

/// 看板/日历查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub tenant_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub anchor: Option<String>,
    pub template_code: Option<String>,
    /// 计划日期下界（含）
    pub scheduled_from: Option<NaiveDate>,
    /// 计划日期上界（含）
    pub scheduled_to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskFilter {
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.tenant_id.map_or(true, |id| task.tenant_id == id)
            && self.student_id.map_or(true, |id| task.student_id == id)
            && self.status.map_or(true, |s| task.status == s)
            && self.anchor.as_ref().map_or(true, |a| &task.anchor == a)
            && self
                .template_code
                .as_ref()
                .map_or(true, |c| task.template_code.as_ref() == Some(c))
            && self.scheduled_from.map_or(true, |d| task.scheduled_for >= d)
            && self.scheduled_to.map_or(true, |d| task.scheduled_for <= d)
    }
}

/// 时间线查询：租户 + 可选学员 + `[from, to)` 时间区间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQuery {
    pub tenant_id: Uuid,
    pub student_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl LogQuery {
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            student_id: None,
            from: None,
            to: None,
            limit: None,
        }
    }

    pub fn for_student(tenant_id: Uuid, student_id: Uuid) -> Self {
        Self {
            student_id: Some(student_id),
            ..Self::for_tenant(tenant_id)
        }
    }

    pub fn in_range(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}
