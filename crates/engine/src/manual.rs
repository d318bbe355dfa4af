use std::sync::Arc;

use chrono::Utc;
use relationship_domain::{LogAction, NewTask, StudentRepository, Task, TaskStatus, MANUAL_ANCHOR};
use relationship_errors::{SchedulerError, SchedulerResult};
use relationship_infrastructure::StructuredLogger;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::ledger::TaskLedger;
use crate::retry::RetryPolicy;

/// 运营人员在系统外完成的一次触达
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualMessage {
    pub tenant_id: Uuid,
    pub student_id: Uuid,
    pub channel: String,
    pub body: String,
    pub created_by: String,
    /// 分析用的分类标签
    pub classification_tag: Option<String>,
}

/// 人工触达登记：不经过去重键，直接写入一条已发送的任务
pub struct ManualOverrideChannel {
    students: Arc<dyn StudentRepository>,
    ledger: Arc<TaskLedger>,
    retry: RetryPolicy,
}

impl ManualOverrideChannel {
    pub fn new(
        students: Arc<dyn StudentRepository>,
        ledger: Arc<TaskLedger>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            students,
            ledger,
            retry,
        }
    }

    /// 任务与两条时间线记录不在同一事务内：任务提交后时间线写入失败只记日志和指标
    #[instrument(skip(self, message), fields(
        tenant_id = %message.tenant_id,
        student_id = %message.student_id,
        channel = %message.channel,
    ))]
    pub async fn log_manual_message(&self, message: ManualMessage) -> SchedulerResult<Task> {
        if message.channel.trim().is_empty() {
            return Err(SchedulerError::validation_error("渠道不能为空"));
        }
        if message.created_by.trim().is_empty() {
            return Err(SchedulerError::validation_error("操作人不能为空"));
        }

        let tenant_id = message.tenant_id;
        let student_id = message.student_id;
        self.retry
            .run("find_student", || self.students.find_by_id(tenant_id, student_id))
            .await?
            .ok_or_else(|| SchedulerError::student_not_found(student_id))?;

        let now = Utc::now();
        let mut payload = json!({ "body": message.body });
        if let Some(tag) = &message.classification_tag {
            payload["classification_tag"] = json!(tag);
        }

        let new_task = NewTask {
            tenant_id,
            student_id,
            template_code: None,
            anchor: MANUAL_ANCHOR.to_string(),
            anchor_date: None,
            scheduled_for: now.date_naive(),
            channel: message.channel.clone(),
            status: TaskStatus::Sent,
            payload,
            created_by: message.created_by.clone(),
            sent_at: Some(now),
            notes: None,
        };

        // create_task 记录 created，随后补记 sent
        let task = self.ledger.create_task(&new_task).await?;
        StructuredLogger::log_manual_message(&task, message.classification_tag.as_deref());

        let mut meta = json!({
            "actor": message.created_by,
            "sent_at": now,
            "manual": true,
        });
        if let Some(tag) = message.classification_tag {
            meta["classification_tag"] = json!(tag);
        }
        self.ledger
            .audit()
            .record_for_task(&task, LogAction::Sent, meta)
            .await;

        Ok(task)
    }
}
