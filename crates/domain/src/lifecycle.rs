//! 任务生命周期状态机
//!
//! ```text
//! pending   -> due_today | snoozed
//! due_today -> sent | skipped | snoozed
//! snoozed   -> due_today | sent | skipped
//! ```
//! sent 与 skipped 为终态。

use chrono::{DateTime, NaiveDate, Utc};
use relationship_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

use crate::entities::{Task, TaskStatus};

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Sent | TaskStatus::Skipped)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, DueToday)
                | (Pending, Snoozed)
                | (DueToday, Sent)
                | (DueToday, Skipped)
                | (DueToday, Snoozed)
                | (Snoozed, DueToday)
                | (Snoozed, Sent)
                | (Snoozed, Skipped)
        )
    }

    /// 允许改期的状态
    pub fn can_postpone(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::DueToday | TaskStatus::Snoozed
        )
    }
}

/// 状态转换时附带更新的字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionFields {
    pub sent_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub scheduled_for: Option<NaiveDate>,
}

impl Task {
    /// 校验并生成转换后的任务快照，不修改自身
    pub fn transitioned(
        &self,
        next: TaskStatus,
        fields: TransitionFields,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Task> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::invalid_transition(self.id, self.status, next));
        }

        let mut updated = self.clone();
        updated.status = next;
        updated.updated_at = now;
        if let Some(date) = fields.scheduled_for {
            updated.scheduled_for = date;
        }
        if fields.notes.is_some() {
            updated.notes = fields.notes;
        }
        if next == TaskStatus::Sent {
            updated.sent_at = Some(fields.sent_at.unwrap_or(now));
        }
        Ok(updated)
    }

    /// 改期：新日期晚于原计划日期时进入 snoozed，否则保持原状态
    pub fn postponed_to(&self, new_date: NaiveDate, now: DateTime<Utc>) -> SchedulerResult<Task> {
        if !self.status.can_postpone() {
            return Err(SchedulerError::invalid_transition(
                self.id,
                self.status,
                TaskStatus::Snoozed,
            ));
        }

        let mut updated = self.clone();
        if new_date > self.scheduled_for {
            updated.status = TaskStatus::Snoozed;
        }
        updated.scheduled_for = new_date;
        updated.updated_at = now;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::NewTask;
    use uuid::Uuid;

    fn task_with_status(status: TaskStatus) -> Task {
        NewTask {
            tenant_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            template_code: Some("MSG1".to_string()),
            anchor: "first_workout".to_string(),
            anchor_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            scheduled_for: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
            channel: "whatsapp".to_string(),
            status,
            payload: serde_json::json!({}),
            created_by: "system".to_string(),
            sent_at: None,
            notes: None,
        }
        .into_task(1, Utc::now())
    }

    #[test]
    fn test_allowed_edges() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(DueToday));
        assert!(Pending.can_transition_to(Snoozed));
        assert!(!Pending.can_transition_to(Sent));
        assert!(!Pending.can_transition_to(Skipped));
        assert!(DueToday.can_transition_to(Sent));
        assert!(DueToday.can_transition_to(Skipped));
        assert!(DueToday.can_transition_to(Snoozed));
        assert!(!DueToday.can_transition_to(Pending));
        assert!(Snoozed.can_transition_to(DueToday));
        assert!(Snoozed.can_transition_to(Sent));
        assert!(Snoozed.can_transition_to(Skipped));
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::DueToday,
            TaskStatus::Sent,
            TaskStatus::Snoozed,
            TaskStatus::Skipped,
        ];
        for terminal in [TaskStatus::Sent, TaskStatus::Skipped] {
            assert!(terminal.is_terminal());
            for next in all {
                assert!(!terminal.can_transition_to(next));
            }

            let task = task_with_status(terminal);
            let err = task
                .transitioned(TaskStatus::DueToday, TransitionFields::default(), Utc::now())
                .unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidTransition { .. }));

            let later = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
            let err = task.postponed_to(later, Utc::now()).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn test_send_stamps_sent_at() {
        let task = task_with_status(TaskStatus::DueToday);
        let now = Utc::now();
        let sent = task
            .transitioned(TaskStatus::Sent, TransitionFields::default(), now)
            .unwrap();
        assert_eq!(sent.status, TaskStatus::Sent);
        assert_eq!(sent.sent_at, Some(now));
    }

    #[test]
    fn test_postpone_later_date_snoozes() {
        let task = task_with_status(TaskStatus::DueToday);
        let later = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let postponed = task.postponed_to(later, Utc::now()).unwrap();
        assert_eq!(postponed.status, TaskStatus::Snoozed);
        assert_eq!(postponed.scheduled_for, later);
    }

    #[test]
    fn test_postpone_earlier_date_keeps_status() {
        let task = task_with_status(TaskStatus::Pending);
        let earlier = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let postponed = task.postponed_to(earlier, Utc::now()).unwrap();
        assert_eq!(postponed.status, TaskStatus::Pending);
        assert_eq!(postponed.scheduled_for, earlier);
    }
}
