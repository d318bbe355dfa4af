//! 仓储操作的错误上下文
//!
//! 把 sqlx 错误按操作与实体信息归类为 `SchedulerError`，并输出结构化日志。
//! 唯一约束冲突在任务写入路径上被识别为 `DuplicateActiveTask`。

use chrono::{DateTime, Utc};
use relationship_errors::SchedulerError;
use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// 仓储操作类型
#[derive(Debug, Clone)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Query,
    Append,
    Migrate,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::Append => write!(f, "追加"),
            RepositoryOperation::Migrate => write!(f, "迁移"),
        }
    }
}

/// 任务与时间线操作的上下文
#[derive(Debug, Clone)]
pub struct TaskOperationContext {
    pub operation: RepositoryOperation,
    pub task_id: Option<i64>,
    pub tenant_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub template_code: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub additional_info: Option<String>,
}

impl TaskOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            task_id: None,
            tenant_id: None,
            student_id: None,
            template_code: None,
            timestamp: Utc::now(),
            additional_info: None,
        }
    }

    pub fn with_task_id(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_student_id(mut self, student_id: Uuid) -> Self {
        self.student_id = Some(student_id);
        self
    }

    pub fn with_template_code(mut self, template_code: Option<String>) -> Self {
        self.template_code = template_code;
        self
    }

    pub fn with_additional_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.task_id, &self.template_code) {
            (Some(id), Some(code)) => format!("任务 '{}' (ID: {})", code, id),
            (Some(id), None) => format!("任务 (ID: {})", id),
            (None, Some(code)) => format!("任务 '{}'", code),
            (None, None) => "任务".to_string(),
        }
    }
}

/// 仓储错误转换工具
pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// 连接类错误统一归为存储不可用，其余为数据库操作错误
    fn classify(error_msg: String, error: &SqlxError) -> SchedulerError {
        match error {
            SqlxError::PoolClosed
            | SqlxError::PoolTimedOut
            | SqlxError::Io(_)
            | SqlxError::Tls(_)
            | SqlxError::Protocol(_)
            | SqlxError::WorkerCrashed => SchedulerError::store_unavailable(error_msg),
            _ => SchedulerError::database_error(error_msg),
        }
    }

    fn describe(operation_desc: &str, entity_desc: &str, error: &SqlxError) -> String {
        match error {
            SqlxError::Database(db_error) => match db_error.constraint() {
                Some(constraint) => format!(
                    "{}{}时发生数据库约束冲突: {}",
                    operation_desc, entity_desc, constraint
                ),
                None => format!("{}{}时发生数据库错误: {}", operation_desc, entity_desc, db_error),
            },
            SqlxError::PoolClosed => format!("{}{}时数据库连接池已关闭", operation_desc, entity_desc),
            SqlxError::PoolTimedOut => format!("{}{}时数据库连接池超时", operation_desc, entity_desc),
            SqlxError::Io(io_error) => {
                format!("{}{}时发生I/O错误: {}", operation_desc, entity_desc, io_error)
            }
            _ => format!("{}{}时发生未知数据库错误: {}", operation_desc, entity_desc, error),
        }
    }

    /// 任务写入/查询的数据库错误
    #[instrument(skip_all, fields(
        operation = %context.operation,
        task_id = ?context.task_id,
        tenant_id = ?context.tenant_id,
        student_id = ?context.student_id,
        template_code = ?context.template_code,
    ))]
    pub fn task_database_error(context: TaskOperationContext, error: SqlxError) -> SchedulerError {
        let entity_desc = context.entity_description();
        let operation_desc = context.operation.to_string();

        if let SqlxError::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                if let (Some(tenant_id), Some(student_id), Some(template_code)) = (
                    context.tenant_id,
                    context.student_id,
                    context.template_code.clone(),
                ) {
                    warn!(
                        constraint = ?db_error.constraint(),
                        "{}{}时命中唯一约束，视为已调度",
                        operation_desc,
                        entity_desc
                    );
                    return SchedulerError::DuplicateActiveTask {
                        tenant_id,
                        student_id,
                        template_code,
                    };
                }
            }
        }

        let error_msg = Self::describe(&operation_desc, &entity_desc, &error);
        error!(error = %error, "{}", error_msg);
        Self::classify(error_msg, &error)
    }

    /// 学员、模板等只读数据源的数据库错误
    pub fn catalog_database_error(
        operation: RepositoryOperation,
        entity_desc: &str,
        error: SqlxError,
    ) -> SchedulerError {
        let error_msg = Self::describe(&operation.to_string(), entity_desc, &error);
        error!(error = %error, "{}", error_msg);
        Self::classify(error_msg, &error)
    }

    /// 行数据无法映射为领域对象
    pub fn task_serialization_error(
        context: TaskOperationContext,
        error: impl fmt::Display,
    ) -> SchedulerError {
        let error_msg = format!(
            "{}{}时序列化失败: {}",
            context.operation,
            context.entity_description(),
            error
        );
        error!("{}", error_msg);
        SchedulerError::Serialization(error_msg)
    }

    pub fn log_operation_success(
        context: TaskOperationContext,
        entity_desc: &str,
        additional_info: Option<&str>,
    ) {
        let base_msg = format!("{}{}成功", context.operation, entity_desc);
        match additional_info {
            Some(info) => debug!("{}: {}", base_msg, info),
            None => debug!("{}", base_msg),
        }
    }
}

/// 快速构造任务操作上下文
#[macro_export]
macro_rules! task_context {
    ($operation:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation)
    };
    ($operation:expr, task_id = $task_id:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation).with_task_id($task_id)
    };
    ($operation:expr, tenant_id = $tenant_id:expr, student_id = $student_id:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation)
            .with_tenant_id($tenant_id)
            .with_student_id($student_id)
    };
}
