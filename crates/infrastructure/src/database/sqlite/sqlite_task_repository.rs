use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use relationship_domain::{NewTask, Task, TaskFilter, TaskRepository, TaskStatus};
use relationship_errors::SchedulerResult;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    database::{
        mapping::MappingHelpers,
        migrations::run_sqlite_migrations,
        task_query_builder::{TaskQueryBuilder, TaskQueryParam, TASK_COLUMNS},
    },
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    task_context,
    timeout_handler::TimeoutHandler,
};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
    timeouts: TimeoutHandler,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool, timeouts: TimeoutHandler) -> Self {
        Self { pool, timeouts }
    }

    /// 创建嵌入式SQLite任务仓库，自动初始化数据库
    pub async fn new_embedded(database_path: &str) -> SchedulerResult<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        debug!("Creating embedded SQLite task repository at: {}", database_path);

        let connect_options = SqliteConnectOptions::from_str(database_path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(connect_options)
            .await?;

        run_sqlite_migrations(&pool).await?;
        Ok(Self { pool, timeouts: TimeoutHandler::default() })
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            tenant_id: MappingHelpers::parse_uuid_sqlite(row, "tenant_id")?,
            student_id: MappingHelpers::parse_uuid_sqlite(row, "student_id")?,
            template_code: row.try_get("template_code")?,
            anchor: row.try_get("anchor")?,
            anchor_date: row.try_get("anchor_date")?,
            scheduled_for: row.try_get("scheduled_for")?,
            channel: row.try_get("channel")?,
            status: row.try_get("status")?,
            payload: MappingHelpers::parse_json_sqlite(row, "payload")?,
            created_by: row.try_get("created_by")?,
            sent_at: row.try_get("sent_at")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn bind_query_params<'q>(
        mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        params: &'q [TaskQueryParam],
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        for param in params {
            query = match param {
                TaskQueryParam::Uuid(value) => query.bind(value.to_string()),
                TaskQueryParam::Text(value) => query.bind(value.as_str()),
                TaskQueryParam::Status(status) => query.bind(status.as_str()),
                TaskQueryParam::Date(date) => query.bind(*date),
                TaskQueryParam::Int64(value) => query.bind(*value),
            };
        }
        query
    }

    fn rows_to_tasks(rows: &[sqlx::sqlite::SqliteRow]) -> SchedulerResult<Vec<Task>> {
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(
        tenant_id = %task.tenant_id,
        student_id = %task.student_id,
        template_code = ?task.template_code,
    ))]
    async fn create(&self, task: &NewTask) -> SchedulerResult<Task> {
        let context = task_context!(
            RepositoryOperation::Create,
            tenant_id = task.tenant_id,
            student_id = task.student_id
        )
        .with_template_code(task.template_code.clone());

        let now = Utc::now();
        let payload = serde_json::to_string(&task.payload)?;

        let row = self.timeouts.statement(
            async {
                sqlx::query(
                    r#"
                    INSERT INTO relationship_tasks (
                        tenant_id, student_id, template_code, anchor, anchor_date,
                        scheduled_for, channel, status, payload, created_by,
                        sent_at, notes, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    RETURNING id
                    "#,
                )
                .bind(task.tenant_id.to_string())
                .bind(task.student_id.to_string())
                .bind(&task.template_code)
                .bind(&task.anchor)
                .bind(task.anchor_date)
                .bind(task.scheduled_for)
                .bind(&task.channel)
                .bind(task.status)
                .bind(&payload)
                .bind(&task.created_by)
                .bind(task.sent_at)
                .bind(&task.notes)
                .bind(now)
                .bind(now)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))
            },
            &format!("创建任务 {:?}", task.template_code),
        )
        .await?;

        let id: i64 = row.try_get("id")?;
        let created = task.clone().into_task(id, now);

        RepositoryErrorHelpers::log_operation_success(
            context.with_task_id(id),
            &created.entity_description(),
            Some(&format!("计划日期: {}, 状态: {}", created.scheduled_for, created.status)),
        );
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let context = task_context!(RepositoryOperation::Read, task_id = id);

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM relationship_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn find_active(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
    ) -> SchedulerResult<Option<Task>> {
        let context = task_context!(
            RepositoryOperation::Query,
            tenant_id = tenant_id,
            student_id = student_id
        )
        .with_template_code(Some(template_code.to_string()));

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM relationship_tasks \
             WHERE tenant_id = $1 AND student_id = $2 AND template_code = $3 \
             AND status IN ('pending', 'due_today', 'snoozed') \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(tenant_id.to_string())
        .bind(student_id.to_string())
        .bind(template_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_cycle(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        template_code: &str,
        anchor_date: NaiveDate,
    ) -> SchedulerResult<Option<Task>> {
        let context = task_context!(
            RepositoryOperation::Query,
            tenant_id = tenant_id,
            student_id = student_id
        )
        .with_template_code(Some(template_code.to_string()));

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM relationship_tasks \
             WHERE tenant_id = $1 AND student_id = $2 AND template_code = $3 AND anchor_date = $4 \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(tenant_id.to_string())
        .bind(student_id.to_string())
        .bind(template_code)
        .bind(anchor_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, status = %task.status, expected = %expected))]
    async fn compare_and_update(&self, task: &Task, expected: TaskStatus) -> SchedulerResult<bool> {
        let context = task_context!(RepositoryOperation::Update, task_id = task.id)
            .with_template_code(task.template_code.clone());

        let result = self.timeouts.statement(
            async {
                sqlx::query(
                    r#"
                    UPDATE relationship_tasks
                    SET status = $1, scheduled_for = $2, sent_at = $3, notes = $4, updated_at = $5
                    WHERE id = $6 AND status = $7
                    "#,
                )
                .bind(task.status)
                .bind(task.scheduled_for)
                .bind(task.sent_at)
                .bind(&task.notes)
                .bind(task.updated_at)
                .bind(task.id)
                .bind(expected)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))
            },
            &format!("更新任务 {}", task.id),
        )
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn find_promotable(
        &self,
        tenant_id: Uuid,
        run_date: NaiveDate,
    ) -> SchedulerResult<Vec<Task>> {
        let context = task_context!(RepositoryOperation::Query).with_tenant_id(tenant_id);

        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM relationship_tasks \
             WHERE tenant_id = $1 AND status IN ('pending', 'snoozed') AND scheduled_for <= $2 \
             ORDER BY scheduled_for ASC, id ASC"
        ))
        .bind(tenant_id.to_string())
        .bind(run_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        Self::rows_to_tasks(&rows)
    }

    #[instrument(skip(self, filter))]
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let context = task_context!(RepositoryOperation::Query);
        let (sql, params) = TaskQueryBuilder::build_select_query(filter);

        let rows = Self::bind_query_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        debug!("查询到 {} 条任务", rows.len());
        Self::rows_to_tasks(&rows)
    }
}
