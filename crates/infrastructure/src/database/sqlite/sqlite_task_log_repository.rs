use async_trait::async_trait;
use relationship_domain::{LogEntry, LogQuery, NewLogEntry, TaskLogRepository};
use relationship_errors::SchedulerResult;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::{
    database::mapping::MappingHelpers,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation, TaskOperationContext},
    timeout_handler::TimeoutHandler,
};

pub struct SqliteTaskLogRepository {
    pool: SqlitePool,
    timeouts: TimeoutHandler,
}

impl SqliteTaskLogRepository {
    pub fn new(pool: SqlitePool, timeouts: TimeoutHandler) -> Self {
        Self { pool, timeouts }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<LogEntry> {
        Ok(LogEntry {
            id: row.try_get("id")?,
            tenant_id: MappingHelpers::parse_uuid_sqlite(row, "tenant_id")?,
            student_id: MappingHelpers::parse_uuid_sqlite(row, "student_id")?,
            task_id: row.try_get("task_id")?,
            action: row.try_get("action")?,
            channel: row.try_get("channel")?,
            template_code: row.try_get("template_code")?,
            meta: MappingHelpers::parse_json_sqlite(row, "meta")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TaskLogRepository for SqliteTaskLogRepository {
    #[instrument(skip(self, entry), fields(
        tenant_id = %entry.tenant_id,
        task_id = ?entry.task_id,
        action = %entry.action,
    ))]
    async fn append(&self, entry: &NewLogEntry) -> SchedulerResult<LogEntry> {
        let mut context = TaskOperationContext::new(RepositoryOperation::Append)
            .with_tenant_id(entry.tenant_id)
            .with_student_id(entry.student_id);
        if let Some(task_id) = entry.task_id {
            context = context.with_task_id(task_id);
        }

        let meta = serde_json::to_string(&entry.meta)?;

        let row = self.timeouts.statement(
            async {
                sqlx::query(
                    r#"
                    INSERT INTO relationship_logs (
                        tenant_id, student_id, task_id, action, channel, template_code, meta, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING id
                    "#,
                )
                .bind(entry.tenant_id.to_string())
                .bind(entry.student_id.to_string())
                .bind(entry.task_id)
                .bind(entry.action)
                .bind(&entry.channel)
                .bind(&entry.template_code)
                .bind(&meta)
                .bind(entry.created_at)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))
            },
            "追加时间线记录",
        )
        .await?;

        let id: i64 = row.try_get("id")?;
        Ok(entry.clone().into_entry(id))
    }

    #[instrument(skip(self, query), fields(tenant_id = %query.tenant_id))]
    async fn timeline(&self, query: &LogQuery) -> SchedulerResult<Vec<LogEntry>> {
        let context = TaskOperationContext::new(RepositoryOperation::Query)
            .with_tenant_id(query.tenant_id);

        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, student_id, task_id, action, channel, template_code, meta, created_at
            FROM relationship_logs
            WHERE tenant_id = $1
              AND ($2 IS NULL OR student_id = $2)
              AND ($3 IS NULL OR created_at >= $3)
              AND ($4 IS NULL OR created_at < $4)
            ORDER BY created_at ASC, id ASC
            LIMIT $5
            "#,
        )
        .bind(query.tenant_id.to_string())
        .bind(query.student_id.map(|id| id.to_string()))
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}
