//! 测试数据构造器

use chrono::{DateTime, NaiveDate, Utc};
use relationship_domain::{NewTask, Student, Task, TaskStatus, Template};
use uuid::Uuid;

pub struct StudentBuilder {
    student: Student,
}

impl StudentBuilder {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            student: Student::new(tenant_id, "Aluno Teste", Utc::now()),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.student.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.student.name = name.to_string();
        self
    }

    pub fn with_first_workout(mut self, date: NaiveDate) -> Self {
        self.student.first_workout_date = Some(date);
        self
    }

    pub fn with_last_workout(mut self, date: NaiveDate) -> Self {
        self.student.last_workout_date = Some(date);
        self
    }

    pub fn with_birth_date(mut self, date: NaiveDate) -> Self {
        self.student.birth_date = Some(date);
        self
    }

    pub fn with_plan_end(mut self, date: NaiveDate) -> Self {
        self.student.plan_end_date = Some(date);
        self
    }

    pub fn with_occurrence_reminder(mut self, date: NaiveDate) -> Self {
        self.student.occurrence_reminders.push(date);
        self.student.occurrence_reminders.sort_unstable();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.student.created_at = created_at;
        self
    }

    /// 模拟存储中无法解析的日期列
    pub fn with_malformed(mut self, field: &str, raw: &str) -> Self {
        self.student
            .malformed_dates
            .insert(field.to_string(), raw.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.student.active = false;
        self
    }

    pub fn build(self) -> Student {
        self.student
    }
}

pub struct TemplateBuilder {
    template: Template,
}

impl TemplateBuilder {
    pub fn new(tenant_id: Uuid, code: &str) -> Self {
        Self {
            template: Template {
                tenant_id,
                code: code.to_string(),
                anchor: "first_workout".to_string(),
                offset_days: Some(0),
                channel: "whatsapp".to_string(),
                active: true,
            },
        }
    }

    pub fn with_anchor(mut self, anchor: &str) -> Self {
        self.template.anchor = anchor.to_string();
        self
    }

    pub fn with_offset(mut self, offset_days: i32) -> Self {
        self.template.offset_days = Some(offset_days);
        self
    }

    pub fn immediate(mut self) -> Self {
        self.template.offset_days = None;
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.template.channel = channel.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.template.active = false;
        self
    }

    pub fn build(self) -> Template {
        self.template
    }
}

pub struct TaskBuilder {
    task: NewTask,
}

impl TaskBuilder {
    pub fn new(tenant_id: Uuid, student_id: Uuid) -> Self {
        let today = Utc::now().date_naive();
        Self {
            task: NewTask {
                tenant_id,
                student_id,
                template_code: Some("test_template".to_string()),
                anchor: "first_workout".to_string(),
                anchor_date: Some(today),
                scheduled_for: today,
                channel: "whatsapp".to_string(),
                status: TaskStatus::Pending,
                payload: serde_json::json!({}),
                created_by: "system".to_string(),
                sent_at: None,
                notes: None,
            },
        }
    }

    pub fn with_template_code(mut self, code: &str) -> Self {
        self.task.template_code = Some(code.to_string());
        self
    }

    pub fn with_anchor_date(mut self, anchor_date: NaiveDate) -> Self {
        self.task.anchor_date = Some(anchor_date);
        self
    }

    pub fn scheduled_for(mut self, date: NaiveDate) -> Self {
        self.task.scheduled_for = date;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        if status == TaskStatus::Sent {
            self.task.sent_at = Some(Utc::now());
        }
        self
    }

    pub fn build_new(self) -> NewTask {
        self.task
    }

    pub fn build(self, id: i64) -> Task {
        self.task.into_task(id, Utc::now())
    }
}
