//! 建表与索引
//!
//! 活跃任务唯一索引与周期唯一索引是去重的唯一同步手段。
//! `student_occurrences` 由学员事件模块写入，这里只读取提醒日期。

use relationship_errors::SchedulerResult;
use sqlx::{PgPool, SqlitePool};
use tracing::{debug, info};

/// 活跃任务键：同一租户、学员、模板至多一条非终态任务
const ACTIVE_TASK_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS ux_relationship_tasks_active \
     ON relationship_tasks(tenant_id, student_id, template_code) \
     WHERE template_code IS NOT NULL AND status IN ('pending', 'due_today', 'snoozed')";

/// 周期键：同一锚点日期只生成一次任务，终态后也不重复生成
const CYCLE_TASK_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS ux_relationship_tasks_cycle \
     ON relationship_tasks(tenant_id, student_id, template_code, anchor_date) \
     WHERE template_code IS NOT NULL AND anchor_date IS NOT NULL";

const SECONDARY_INDEXES: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS idx_students_tenant ON students(tenant_id, active)",
    "CREATE INDEX IF NOT EXISTS idx_student_occurrences_student ON student_occurrences(tenant_id, student_id)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_tasks_scheduled ON relationship_tasks(tenant_id, scheduled_for)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_tasks_status ON relationship_tasks(tenant_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_logs_student ON relationship_logs(tenant_id, student_id)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_logs_created_at ON relationship_logs(tenant_id, created_at)",
];

pub async fn run_sqlite_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");

    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            first_workout_date TEXT,
            last_workout_date TEXT,
            birth_date TEXT,
            plan_end_date TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS student_occurrences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            reminder_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS relationship_templates (
            tenant_id TEXT NOT NULL,
            code TEXT NOT NULL,
            anchor TEXT NOT NULL,
            offset_days INTEGER,
            channel TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT 1,
            PRIMARY KEY (tenant_id, code)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS relationship_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            template_code TEXT,
            anchor TEXT NOT NULL,
            anchor_date TEXT,
            scheduled_for TEXT NOT NULL,
            channel TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            created_by TEXT NOT NULL,
            sent_at TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS relationship_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            task_id INTEGER,
            action TEXT NOT NULL,
            channel TEXT NOT NULL,
            template_code TEXT,
            meta TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    ];

    for table_sql in tables {
        sqlx::query(table_sql).execute(pool).await?;
    }

    for index_sql in [ACTIVE_TASK_INDEX, CYCLE_TASK_INDEX]
        .into_iter()
        .chain(SECONDARY_INDEXES)
    {
        sqlx::query(index_sql).execute(pool).await?;
    }

    info!("SQLite 数据库迁移完成");
    Ok(())
}

pub async fn run_postgres_migrations(pool: &PgPool) -> SchedulerResult<()> {
    debug!("Running PostgreSQL database migrations");

    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL,
            name VARCHAR(255) NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            first_workout_date DATE,
            last_workout_date DATE,
            birth_date DATE,
            plan_end_date DATE
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS student_occurrences (
            id BIGSERIAL PRIMARY KEY,
            tenant_id UUID NOT NULL,
            student_id UUID NOT NULL,
            reminder_at DATE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS relationship_templates (
            tenant_id UUID NOT NULL,
            code VARCHAR(128) NOT NULL,
            anchor VARCHAR(64) NOT NULL,
            offset_days INTEGER,
            channel VARCHAR(64) NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            PRIMARY KEY (tenant_id, code)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS relationship_tasks (
            id BIGSERIAL PRIMARY KEY,
            tenant_id UUID NOT NULL,
            student_id UUID NOT NULL,
            template_code VARCHAR(128),
            anchor VARCHAR(64) NOT NULL,
            anchor_date DATE,
            scheduled_for DATE NOT NULL,
            channel VARCHAR(64) NOT NULL,
            status VARCHAR(32) NOT NULL,
            payload JSONB NOT NULL DEFAULT '{}',
            created_by VARCHAR(255) NOT NULL,
            sent_at TIMESTAMPTZ,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS relationship_logs (
            id BIGSERIAL PRIMARY KEY,
            tenant_id UUID NOT NULL,
            student_id UUID NOT NULL,
            task_id BIGINT,
            action VARCHAR(32) NOT NULL,
            channel VARCHAR(64) NOT NULL,
            template_code VARCHAR(128),
            meta JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ];

    for table_sql in tables {
        sqlx::query(table_sql).execute(pool).await?;
    }

    for index_sql in [ACTIVE_TASK_INDEX, CYCLE_TASK_INDEX]
        .into_iter()
        .chain(SECONDARY_INDEXES)
    {
        sqlx::query(index_sql).execute(pool).await?;
    }

    info!("PostgreSQL 数据库迁移完成");
    Ok(())
}
