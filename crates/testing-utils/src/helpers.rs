//! 测试辅助工具

use std::sync::Arc;

use chrono::NaiveDate;
use relationship_domain::{Student, Template};
use uuid::Uuid;

use crate::mocks::{
    MockStudentRepository, MockTaskLogRepository, MockTaskRepository, MockTemplateRepository,
};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// 一个租户的完整内存仓储组合，测试可直接检查各仓储的内容
#[derive(Clone)]
pub struct RepositoryFixture {
    pub tenant_id: Uuid,
    pub students: Arc<MockStudentRepository>,
    pub templates: Arc<MockTemplateRepository>,
    pub tasks: Arc<MockTaskRepository>,
    pub logs: Arc<MockTaskLogRepository>,
}

impl RepositoryFixture {
    pub fn new() -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            students: Arc::new(MockStudentRepository::new()),
            templates: Arc::new(MockTemplateRepository::new()),
            tasks: Arc::new(MockTaskRepository::new()),
            logs: Arc::new(MockTaskLogRepository::new()),
        }
    }

    pub fn with_task_repository(mut self, tasks: MockTaskRepository) -> Self {
        self.tasks = Arc::new(tasks);
        self
    }

    pub fn add_student(&self, student: Student) -> Uuid {
        let id = student.id;
        self.students.add_student(student);
        id
    }

    pub fn add_template(&self, template: Template) {
        self.templates.add_template(template);
    }
}

impl Default for RepositoryFixture {
    fn default() -> Self {
        Self::new()
    }
}
