//! 学员与模板的只读数据源（PostgreSQL）

use async_trait::async_trait;
use relationship_domain::{Student, StudentRepository, Template, TemplateRepository};
use relationship_errors::SchedulerResult;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    database::mapping::{MappingHelpers, STUDENT_DATE_COLUMNS},
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
};

// 日期列转成文本读取，交给宽松解析统一处理
const STUDENT_SELECT: &str = "SELECT id, tenant_id, name, active, created_at, \
     first_workout_date::TEXT AS first_workout_date, \
     last_workout_date::TEXT AS last_workout_date, \
     birth_date::TEXT AS birth_date, \
     plan_end_date::TEXT AS plan_end_date, \
     (SELECT string_agg(o.reminder_at::TEXT, ',' ORDER BY o.reminder_at) \
      FROM student_occurrences o \
      WHERE o.tenant_id = students.tenant_id AND o.student_id = students.id \
      AND o.reminder_at IS NOT NULL) AS occurrence_reminders \
     FROM students";

pub struct PostgresStudentRepository {
    pool: PgPool,
}

impl PostgresStudentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_student(row: &sqlx::postgres::PgRow) -> SchedulerResult<Student> {
        let mut student = Student {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            first_workout_date: None,
            last_workout_date: None,
            birth_date: None,
            plan_end_date: None,
            occurrence_reminders: Vec::new(),
            malformed_dates: Default::default(),
        };

        let [first, last, birth, plan_end] = STUDENT_DATE_COLUMNS;
        let raw_dates = [
            (first, row.try_get::<Option<String>, _>(first)?),
            (last, row.try_get::<Option<String>, _>(last)?),
            (birth, row.try_get::<Option<String>, _>(birth)?),
            (plan_end, row.try_get::<Option<String>, _>(plan_end)?),
        ];
        MappingHelpers::apply_student_dates(&mut student, raw_dates);
        MappingHelpers::apply_occurrence_reminders(
            &mut student,
            row.try_get::<Option<String>, _>("occurrence_reminders")?,
        );
        Ok(student)
    }
}

#[async_trait]
impl StudentRepository for PostgresStudentRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> SchedulerResult<Option<Student>> {
        let row = sqlx::query(&format!("{STUDENT_SELECT} WHERE tenant_id = $1 AND id = $2"))
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::catalog_database_error(RepositoryOperation::Read, "学员", e)
            })?;

        row.as_ref().map(Self::row_to_student).transpose()
    }

    #[instrument(skip(self))]
    async fn find_active_by_tenant(&self, tenant_id: Uuid) -> SchedulerResult<Vec<Student>> {
        let rows = sqlx::query(&format!(
            "{STUDENT_SELECT} WHERE tenant_id = $1 AND active = TRUE ORDER BY created_at ASC, id ASC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::catalog_database_error(RepositoryOperation::Query, "学员列表", e)
        })?;

        rows.iter().map(Self::row_to_student).collect()
    }
}

pub struct PostgresTemplateRepository {
    pool: PgPool,
}

impl PostgresTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_template(row: &sqlx::postgres::PgRow) -> SchedulerResult<Template> {
        Ok(Template {
            tenant_id: row.try_get("tenant_id")?,
            code: row.try_get("code")?,
            anchor: row.try_get("anchor")?,
            offset_days: row.try_get("offset_days")?,
            channel: row.try_get("channel")?,
            active: row.try_get("active")?,
        })
    }
}

#[async_trait]
impl TemplateRepository for PostgresTemplateRepository {
    #[instrument(skip(self))]
    async fn find_active_by_tenant(&self, tenant_id: Uuid) -> SchedulerResult<Vec<Template>> {
        let rows = sqlx::query(
            "SELECT tenant_id, code, anchor, offset_days, channel, active \
             FROM relationship_templates WHERE tenant_id = $1 AND active = TRUE ORDER BY code ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::catalog_database_error(RepositoryOperation::Query, "模板列表", e)
        })?;

        rows.iter().map(Self::row_to_template).collect()
    }

    #[instrument(skip(self))]
    async fn tenants_with_active_templates(&self) -> SchedulerResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT DISTINCT tenant_id FROM relationship_templates WHERE active = TRUE ORDER BY tenant_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::catalog_database_error(RepositoryOperation::Query, "租户列表", e)
        })?;

        Ok(rows
            .iter()
            .map(|row| row.try_get("tenant_id"))
            .collect::<Result<Vec<Uuid>, _>>()?)
    }
}
