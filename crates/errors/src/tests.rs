use crate::*;
use uuid::Uuid;

#[test]
fn test_scheduler_error_display() {
    let task_error = SchedulerError::TaskNotFound { id: 123 };
    assert_eq!(task_error.to_string(), "任务未找到: 123");

    let transition = SchedulerError::invalid_transition(7, "sent", "snoozed");
    assert_eq!(
        transition.to_string(),
        "非法状态转换: 任务 7 不能从 sent 转换到 snoozed"
    );

    let anchor = SchedulerError::UnknownAnchor("occurrence_followup".to_string());
    assert_eq!(anchor.to_string(), "未知锚点: occurrence_followup");

    let malformed = SchedulerError::malformed_date("birth_date", "31/02/1990");
    assert_eq!(
        malformed.to_string(),
        "锚点日期格式错误: 字段 birth_date 的值 '31/02/1990' 无法解析"
    );

    let unavailable = SchedulerError::store_unavailable("connection refused");
    assert_eq!(unavailable.to_string(), "存储不可用: connection refused");
}

#[test]
fn test_error_classification() {
    let tenant = Uuid::new_v4();
    let student = Uuid::new_v4();

    let duplicate = SchedulerError::DuplicateActiveTask {
        tenant_id: tenant,
        student_id: student,
        template_code: "MSG1".to_string(),
    };
    assert!(duplicate.is_benign());
    assert!(!duplicate.is_retryable());

    let unresolved = SchedulerError::AnchorUnresolved {
        student_id: student,
        anchor: "birthday".to_string(),
    };
    assert!(unresolved.is_benign());

    assert!(SchedulerError::store_unavailable("down").is_retryable());
    assert!(SchedulerError::timeout_error("slow").is_retryable());
    assert!(!SchedulerError::database_error("constraint").is_retryable());
    assert!(!SchedulerError::invalid_transition(1, "sent", "skipped").is_retryable());

    assert!(SchedulerError::config_error("bad").is_fatal());
    assert!(!SchedulerError::UnknownAnchor("x".to_string()).is_fatal());
}

#[test]
fn test_error_codes_are_stable() {
    assert_eq!(
        SchedulerError::UnknownAnchor("x".to_string()).code(),
        "unknown_anchor"
    );
    assert_eq!(
        SchedulerError::invalid_template("MSG1", "offset").code(),
        "invalid_template"
    );
    assert_eq!(SchedulerError::timeout_error("t").code(), "timeout");
    assert_eq!(
        SchedulerError::student_not_found(Uuid::nil()).code(),
        "student_not_found"
    );
}

#[test]
fn test_sqlx_error_conversion() {
    let err: SchedulerError = sqlx::Error::PoolTimedOut.into();
    assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
    assert!(err.is_retryable());

    let err: SchedulerError = sqlx::Error::PoolClosed.into();
    assert!(matches!(err, SchedulerError::StoreUnavailable(_)));

    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
    let err: SchedulerError = sqlx::Error::Io(io).into();
    assert!(err.is_retryable());

    let err: SchedulerError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, SchedulerError::DatabaseOperation(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_serde_json_error_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let err: SchedulerError = json_err.into();
    assert!(matches!(err, SchedulerError::Serialization(_)));
}

#[test]
fn test_user_messages() {
    assert_eq!(
        SchedulerError::task_not_found(1).user_message(),
        "请求的任务不存在"
    );
    assert_eq!(
        SchedulerError::invalid_transition(1, "sent", "skipped").user_message(),
        "任务当前状态不允许该操作"
    );
    assert_eq!(
        SchedulerError::Internal("boom".to_string()).user_message(),
        "系统繁忙，请稍后重试"
    );
}
