use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("锚点无法解析: 学员 {student_id} 缺少 {anchor} 对应的日期")]
    AnchorUnresolved { student_id: Uuid, anchor: String },
    #[error("活跃任务已存在: 租户 {tenant_id} 学员 {student_id} 模板 {template_code}")]
    DuplicateActiveTask {
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: String,
    },
    #[error("非法状态转换: 任务 {task_id} 不能从 {from} 转换到 {to}")]
    InvalidTransition {
        task_id: i64,
        from: String,
        to: String,
    },
    #[error("未知锚点: {0}")]
    UnknownAnchor(String),
    #[error("无效的模板配置: 模板 {code} - {reason}")]
    InvalidTemplate { code: String, reason: String },
    #[error("锚点日期格式错误: 字段 {field} 的值 '{value}' 无法解析")]
    MalformedAnchorDate { field: String, value: String },
    #[error("存储不可用: {0}")]
    StoreUnavailable(String),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("学员未找到: {id}")]
    StudentNotFound { id: Uuid },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn student_not_found(id: Uuid) -> Self {
        Self::StudentNotFound { id }
    }
    pub fn invalid_transition<F: ToString, T: ToString>(task_id: i64, from: F, to: T) -> Self {
        Self::InvalidTransition {
            task_id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn invalid_template<C: Into<String>, R: Into<String>>(code: C, reason: R) -> Self {
        Self::InvalidTemplate {
            code: code.into(),
            reason: reason.into(),
        }
    }
    pub fn malformed_date<F: Into<String>, V: Into<String>>(field: F, value: V) -> Self {
        Self::MalformedAnchorDate {
            field: field.into(),
            value: value.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn timeout_error<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// 良性错误：调用方按跳过或已存在处理，不计为失败
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SchedulerError::AnchorUnresolved { .. } | SchedulerError::DuplicateActiveTask { .. }
        )
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Internal(_) | SchedulerError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::StoreUnavailable(_) | SchedulerError::Timeout(_)
        )
    }

    /// 稳定的错误码，写入批处理报告和指标标签
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::AnchorUnresolved { .. } => "anchor_unresolved",
            SchedulerError::DuplicateActiveTask { .. } => "duplicate_active_task",
            SchedulerError::InvalidTransition { .. } => "invalid_transition",
            SchedulerError::UnknownAnchor(_) => "unknown_anchor",
            SchedulerError::InvalidTemplate { .. } => "invalid_template",
            SchedulerError::MalformedAnchorDate { .. } => "malformed_anchor_date",
            SchedulerError::StoreUnavailable(_) => "store_unavailable",
            SchedulerError::DatabaseOperation(_) => "database_operation",
            SchedulerError::TaskNotFound { .. } => "task_not_found",
            SchedulerError::StudentNotFound { .. } => "student_not_found",
            SchedulerError::Serialization(_) => "serialization",
            SchedulerError::Configuration(_) => "configuration",
            SchedulerError::ValidationError(_) => "validation",
            SchedulerError::Timeout(_) => "timeout",
            SchedulerError::Internal(_) => "internal",
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            SchedulerError::TaskNotFound { .. } => "请求的任务不存在",
            SchedulerError::StudentNotFound { .. } => "请求的学员不存在",
            SchedulerError::InvalidTransition { .. } => "任务当前状态不允许该操作",
            SchedulerError::DuplicateActiveTask { .. } => "该学员已有进行中的同类任务",
            SchedulerError::UnknownAnchor(_) | SchedulerError::InvalidTemplate { .. } => {
                "模板配置有误"
            }
            SchedulerError::ValidationError(_) => "输入数据验证失败",
            SchedulerError::Timeout(_) => "操作超时，请稍后重试",
            SchedulerError::StoreUnavailable(_) => "存储暂时不可用，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                SchedulerError::StoreUnavailable("数据库连接池超时".to_string())
            }
            sqlx::Error::PoolClosed => {
                SchedulerError::StoreUnavailable("数据库连接池已关闭".to_string())
            }
            sqlx::Error::Io(e) => SchedulerError::StoreUnavailable(format!("I/O错误: {e}")),
            sqlx::Error::Tls(e) => SchedulerError::StoreUnavailable(format!("TLS错误: {e}")),
            sqlx::Error::Protocol(msg) => {
                SchedulerError::StoreUnavailable(format!("协议错误: {msg}"))
            }
            sqlx::Error::WorkerCrashed => {
                SchedulerError::StoreUnavailable("数据库工作线程崩溃".to_string())
            }
            other => SchedulerError::DatabaseOperation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
