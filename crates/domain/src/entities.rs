use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use relationship_errors::SchedulerError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 学员（由外部业务系统维护，调度核心只读取其中的日期属性）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub first_workout_date: Option<NaiveDate>,
    pub last_workout_date: Option<NaiveDate>,
    pub birth_date: Option<NaiveDate>,
    pub plan_end_date: Option<NaiveDate>,
    /// 学员登记的各条事件的跟进提醒日期，升序
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub occurrence_reminders: Vec<NaiveDate>,
    /// 存储中无法解析的日期列：列名 -> 原始值
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub malformed_dates: BTreeMap<String, String>,
}

impl Student {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            active: true,
            created_at,
            first_workout_date: None,
            last_workout_date: None,
            birth_date: None,
            plan_end_date: None,
            occurrence_reminders: Vec::new(),
            malformed_dates: BTreeMap::new(),
        }
    }

    pub fn entity_description(&self) -> String {
        format!("学员 '{}' (ID: {})", self.name, self.id)
    }
}

/// 触达模板：一条按锚点与偏移量循环生效的规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub tenant_id: Uuid,
    pub code: String,
    /// 原始锚点编码，评估前必须能解析为 `AnchorKind`
    pub anchor: String,
    /// 为空表示立即发送，不等待锚点偏移
    pub offset_days: Option<i32>,
    pub channel: String,
    pub active: bool,
}

impl Template {
    pub fn entity_description(&self) -> String {
        format!("模板 '{}' (锚点: {})", self.code, self.anchor)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    DueToday,
    Sent,
    Snoozed,
    Skipped,
}

impl TaskStatus {
    /// 非终态，参与去重约束
    pub const ACTIVE: [TaskStatus; 3] = [TaskStatus::Pending, TaskStatus::DueToday, TaskStatus::Snoozed];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::DueToday => "due_today",
            TaskStatus::Sent => "sent",
            TaskStatus::Snoozed => "snoozed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "due_today" => Ok(TaskStatus::DueToday),
            "sent" => Ok(TaskStatus::Sent),
            "snoozed" => Ok(TaskStatus::Snoozed),
            "skipped" => Ok(TaskStatus::Skipped),
            _ => Err(SchedulerError::validation_error(format!(
                "无效的任务状态: {s}"
            ))),
        }
    }
}

/// 调度任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub tenant_id: Uuid,
    pub student_id: Uuid,
    /// 为空表示人工创建的任务
    pub template_code: Option<String>,
    pub anchor: String,
    /// 本周期对应的锚点日期，人工任务为空
    pub anchor_date: Option<NaiveDate>,
    pub scheduled_for: NaiveDate,
    pub channel: String,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub created_by: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_manual(&self) -> bool {
        self.template_code.is_none()
    }

    pub fn entity_description(&self) -> String {
        match &self.template_code {
            Some(code) => format!("任务 (ID: {}, 模板: {})", self.id, code),
            None => format!("人工任务 (ID: {})", self.id),
        }
    }
}

/// 待写入的新任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub tenant_id: Uuid,
    pub student_id: Uuid,
    pub template_code: Option<String>,
    pub anchor: String,
    pub anchor_date: Option<NaiveDate>,
    pub scheduled_for: NaiveDate,
    pub channel: String,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub created_by: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl NewTask {
    /// 按新任务字段生成完整实体，时间戳由调用方提供
    pub fn into_task(self, id: i64, now: DateTime<Utc>) -> Task {
        Task {
            id,
            tenant_id: self.tenant_id,
            student_id: self.student_id,
            template_code: self.template_code,
            anchor: self.anchor,
            anchor_date: self.anchor_date,
            scheduled_for: self.scheduled_for,
            channel: self.channel,
            status: self.status,
            payload: self.payload,
            created_by: self.created_by,
            sent_at: self.sent_at,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 时间线动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Created,
    Sent,
    Postponed,
    Skipped,
    Snoozed,
    /// 引擎把任务推进到 due_today
    Due,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Created => "created",
            LogAction::Sent => "sent",
            LogAction::Postponed => "postponed",
            LogAction::Skipped => "skipped",
            LogAction::Snoozed => "snoozed",
            LogAction::Due => "due",
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogAction {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(LogAction::Created),
            "sent" => Ok(LogAction::Sent),
            "postponed" => Ok(LogAction::Postponed),
            "skipped" => Ok(LogAction::Skipped),
            "snoozed" => Ok(LogAction::Snoozed),
            "due" => Ok(LogAction::Due),
            _ => Err(SchedulerError::validation_error(format!(
                "无效的时间线动作: {s}"
            ))),
        }
    }
}

/// 不可变的时间线记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub tenant_id: Uuid,
    pub student_id: Uuid,
    pub task_id: Option<i64>,
    pub action: LogAction,
    pub channel: String,
    pub template_code: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewLogEntry {
    pub tenant_id: Uuid,
    pub student_id: Uuid,
    pub task_id: Option<i64>,
    pub action: LogAction,
    pub channel: String,
    pub template_code: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewLogEntry {
    /// 以任务当前快照构造一条时间线记录
    pub fn for_task(task: &Task, action: LogAction, meta: serde_json::Value) -> Self {
        Self {
            tenant_id: task.tenant_id,
            student_id: task.student_id,
            task_id: Some(task.id),
            action,
            channel: task.channel.clone(),
            template_code: task.template_code.clone(),
            meta,
            created_at: Utc::now(),
        }
    }

    pub fn into_entry(self, id: i64) -> LogEntry {
        LogEntry {
            id,
            tenant_id: self.tenant_id,
            student_id: self.student_id,
            task_id: self.task_id,
            action: self.action,
            channel: self.channel,
            template_code: self.template_code,
            meta: self.meta,
            created_at: self.created_at,
        }
    }
}
