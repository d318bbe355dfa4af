use chrono::{Duration, NaiveDate, Utc};
use relationship_domain::{
    LogAction, LogQuery, NewLogEntry, NewTask, TaskFilter, TaskStatus, MANUAL_ANCHOR,
};
use relationship_errors::SchedulerError;
use relationship_infrastructure::{
    DatabaseManager, DatabasePool, PoolSettings,
};
use sqlx::SqlitePool;
use uuid::Uuid;

async fn setup() -> (DatabaseManager, SqlitePool) {
    let manager = DatabaseManager::new("sqlite::memory:", &PoolSettings::default())
        .await
        .unwrap();
    manager.migrate().await.unwrap();
    let pool = match manager.pool() {
        DatabasePool::SQLite(pool) => pool.clone(),
        DatabasePool::PostgreSQL(_) => panic!("期望 SQLite 连接池"),
    };
    (manager, pool)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn new_task(tenant_id: Uuid, student_id: Uuid, code: &str, anchor_date: NaiveDate) -> NewTask {
    NewTask {
        tenant_id,
        student_id,
        template_code: Some(code.to_string()),
        anchor: "first_workout".to_string(),
        anchor_date: Some(anchor_date),
        scheduled_for: anchor_date + Duration::days(8),
        channel: "whatsapp".to_string(),
        status: TaskStatus::Pending,
        payload: serde_json::json!({ "description": "8 dias após primeiro treino" }),
        created_by: "system".to_string(),
        sent_at: None,
        notes: None,
    }
}

#[tokio::test]
async fn test_create_and_read_task() {
    let (manager, _pool) = setup().await;
    let repo = manager.task_repository();
    let (tenant_id, student_id) = (Uuid::new_v4(), Uuid::new_v4());

    let created = repo
        .create(&new_task(tenant_id, student_id, "welcome", date(2025, 1, 1)))
        .await
        .unwrap();
    assert!(created.id > 0);
    assert_eq!(created.scheduled_for, date(2025, 1, 9));

    let found = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(found.tenant_id, tenant_id);
    assert_eq!(found.status, TaskStatus::Pending);
    assert_eq!(found.anchor_date, Some(date(2025, 1, 1)));
    assert_eq!(found.payload["description"], "8 dias após primeiro treino");

    let active = repo
        .find_active(tenant_id, student_id, "welcome")
        .await
        .unwrap();
    assert_eq!(active.map(|t| t.id), Some(created.id));

    assert!(repo.get_by_id(created.id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_active_task_is_rejected() {
    let (manager, _pool) = setup().await;
    let repo = manager.task_repository();
    let (tenant_id, student_id) = (Uuid::new_v4(), Uuid::new_v4());

    repo.create(&new_task(tenant_id, student_id, "welcome", date(2025, 1, 1)))
        .await
        .unwrap();
    let result = repo
        .create(&new_task(tenant_id, student_id, "welcome", date(2025, 2, 1)))
        .await;

    match result {
        Err(SchedulerError::DuplicateActiveTask { template_code, .. }) => {
            assert_eq!(template_code, "welcome")
        }
        other => panic!("期望 DuplicateActiveTask, 实际: {other:?}"),
    }
}

#[tokio::test]
async fn test_cycle_key_survives_terminal_status() {
    let (manager, _pool) = setup().await;
    let repo = manager.task_repository();
    let (tenant_id, student_id) = (Uuid::new_v4(), Uuid::new_v4());

    let task = repo
        .create(&new_task(tenant_id, student_id, "birthday", date(2025, 3, 10)))
        .await
        .unwrap();

    let mut sent = task.clone();
    sent.status = TaskStatus::Sent;
    sent.sent_at = Some(Utc::now());
    sent.updated_at = Utc::now();
    assert!(repo.compare_and_update(&sent, TaskStatus::Pending).await.unwrap());

    // 同一周期不再生成
    let same_cycle = repo
        .create(&new_task(tenant_id, student_id, "birthday", date(2025, 3, 10)))
        .await;
    assert!(matches!(
        same_cycle,
        Err(SchedulerError::DuplicateActiveTask { .. })
    ));

    let by_cycle = repo
        .find_by_cycle(tenant_id, student_id, "birthday", date(2025, 3, 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_cycle.status, TaskStatus::Sent);

    // 下一周期可以生成
    let next_cycle = repo
        .create(&new_task(tenant_id, student_id, "birthday", date(2026, 3, 10)))
        .await;
    assert!(next_cycle.is_ok());
}

#[tokio::test]
async fn test_compare_and_update_detects_stale_status() {
    let (manager, _pool) = setup().await;
    let repo = manager.task_repository();
    let task = repo
        .create(&new_task(Uuid::new_v4(), Uuid::new_v4(), "welcome", date(2025, 1, 1)))
        .await
        .unwrap();

    let mut due = task.clone();
    due.status = TaskStatus::DueToday;
    assert!(repo.compare_and_update(&due, TaskStatus::Pending).await.unwrap());

    let mut skipped = task.clone();
    skipped.status = TaskStatus::Skipped;
    skipped.notes = Some("aluno pediu pausa".to_string());
    // 存储中的状态已经不是 pending
    assert!(!repo.compare_and_update(&skipped, TaskStatus::Pending).await.unwrap());

    let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::DueToday);
    assert!(stored.notes.is_none());
}

#[tokio::test]
async fn test_manual_tasks_bypass_active_key() {
    let (manager, _pool) = setup().await;
    let repo = manager.task_repository();
    let (tenant_id, student_id) = (Uuid::new_v4(), Uuid::new_v4());

    for _ in 0..2 {
        let manual = NewTask {
            template_code: None,
            anchor: MANUAL_ANCHOR.to_string(),
            anchor_date: None,
            status: TaskStatus::Sent,
            sent_at: Some(Utc::now()),
            created_by: "coach@academia".to_string(),
            ..new_task(tenant_id, student_id, "unused", date(2025, 1, 1))
        };
        let created = repo.create(&manual).await.unwrap();
        assert!(created.is_manual());
    }

    let all = repo.list(&TaskFilter::for_tenant(tenant_id)).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_find_promotable_and_list_filters() {
    let (manager, _pool) = setup().await;
    let repo = manager.task_repository();
    let tenant_id = Uuid::new_v4();

    let early = repo
        .create(&new_task(tenant_id, Uuid::new_v4(), "welcome", date(2025, 1, 1)))
        .await
        .unwrap();
    let late = repo
        .create(&new_task(tenant_id, Uuid::new_v4(), "welcome", date(2025, 2, 1)))
        .await
        .unwrap();
    // 其他租户的任务不可见
    repo.create(&new_task(Uuid::new_v4(), Uuid::new_v4(), "welcome", date(2025, 1, 1)))
        .await
        .unwrap();

    let promotable = repo.find_promotable(tenant_id, date(2025, 1, 10)).await.unwrap();
    assert_eq!(promotable.iter().map(|t| t.id).collect::<Vec<_>>(), vec![early.id]);

    let filter = TaskFilter {
        scheduled_from: Some(date(2025, 2, 1)),
        ..TaskFilter::for_tenant(tenant_id)
    };
    let listed = repo.list(&filter).await.unwrap();
    assert_eq!(listed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![late.id]);

    let paged = TaskFilter {
        limit: Some(1),
        offset: Some(1),
        ..TaskFilter::for_tenant(tenant_id)
    };
    let page = repo.list(&paged).await.unwrap();
    assert_eq!(page.iter().map(|t| t.id).collect::<Vec<_>>(), vec![late.id]);

    let by_status = TaskFilter {
        status: Some(TaskStatus::Sent),
        ..TaskFilter::for_tenant(tenant_id)
    };
    assert!(repo.list(&by_status).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timeline_append_and_range_query() {
    let (manager, _pool) = setup().await;
    let logs = manager.task_log_repository();
    let (tenant_id, student_id) = (Uuid::new_v4(), Uuid::new_v4());
    let base = Utc::now() - Duration::hours(3);

    for (offset, action) in [(0, LogAction::Created), (1, LogAction::Sent), (2, LogAction::Skipped)] {
        let entry = NewLogEntry {
            tenant_id,
            student_id,
            task_id: Some(1),
            action,
            channel: "whatsapp".to_string(),
            template_code: Some("welcome".to_string()),
            meta: serde_json::json!({ "step": offset }),
            created_at: base + Duration::hours(offset),
        };
        let stored = logs.append(&entry).await.unwrap();
        assert!(stored.id > 0);
    }

    let all = logs
        .timeline(&LogQuery::for_student(tenant_id, student_id))
        .await
        .unwrap();
    assert_eq!(
        all.iter().map(|e| e.action).collect::<Vec<_>>(),
        vec![LogAction::Created, LogAction::Sent, LogAction::Skipped]
    );
    assert_eq!(all[1].meta["step"], 1);

    let ranged = LogQuery {
        from: Some(base + Duration::minutes(30)),
        to: Some(base + Duration::hours(2)),
        ..LogQuery::for_tenant(tenant_id)
    };
    let window = logs.timeline(&ranged).await.unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].action, LogAction::Sent);

    let other_tenant = logs.timeline(&LogQuery::for_tenant(Uuid::new_v4())).await.unwrap();
    assert!(other_tenant.is_empty());
}

#[tokio::test]
async fn test_catalog_reads_students_and_templates() {
    let (manager, pool) = setup().await;
    let tenant_id = Uuid::new_v4();
    let ana = Uuid::new_v4();
    let bia = Uuid::new_v4();

    for (id, name, active, first_workout, birth) in [
        (ana, "Ana", true, Some("2025-01-01"), Some("1990-02-29")),
        (bia, "Bia", true, None, Some("29/02/1990")),
        (Uuid::new_v4(), "Caio", false, Some("2025-01-01"), None),
    ] {
        sqlx::query(
            "INSERT INTO students (id, tenant_id, name, active, created_at, first_workout_date, birth_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(name)
        .bind(active)
        .bind(Utc::now())
        .bind(first_workout)
        .bind(birth)
        .execute(&pool)
        .await
        .unwrap();
    }

    for (code, anchor, offset, active) in [
        ("welcome", "first_workout", Some(8), true),
        ("birthday", "birthday", None, true),
        ("legacy", "first_workout", Some(30), false),
    ] {
        sqlx::query(
            "INSERT INTO relationship_templates (tenant_id, code, anchor, offset_days, channel, active) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(tenant_id.to_string())
        .bind(code)
        .bind(anchor)
        .bind(offset)
        .bind("whatsapp")
        .bind(active)
        .execute(&pool)
        .await
        .unwrap();
    }

    let students = manager.student_repository();
    let active = students.find_active_by_tenant(tenant_id).await.unwrap();
    assert_eq!(active.len(), 2);

    let ana_row = students.find_by_id(tenant_id, ana).await.unwrap().unwrap();
    assert_eq!(ana_row.first_workout_date, Some(date(2025, 1, 1)));
    // 1990 年没有 2 月 29 日
    assert!(ana_row.malformed_dates.contains_key("birth_date"));

    let bia_row = students.find_by_id(tenant_id, bia).await.unwrap().unwrap();
    assert_eq!(bia_row.first_workout_date, None);
    assert_eq!(
        bia_row.malformed_dates.get("birth_date").map(String::as_str),
        Some("29/02/1990")
    );

    assert!(students
        .find_by_id(Uuid::new_v4(), ana)
        .await
        .unwrap()
        .is_none());

    let templates = manager.template_repository();
    let active_templates = templates.find_active_by_tenant(tenant_id).await.unwrap();
    assert_eq!(
        active_templates.iter().map(|t| t.code.as_str()).collect::<Vec<_>>(),
        vec!["birthday", "welcome"]
    );
    assert_eq!(active_templates[0].offset_days, None);
    assert_eq!(
        templates.tenants_with_active_templates().await.unwrap(),
        vec![tenant_id]
    );
}

#[tokio::test]
async fn test_students_carry_occurrence_reminders() {
    let (manager, pool) = setup().await;
    let tenant_id = Uuid::new_v4();
    let ana = Uuid::new_v4();
    let bia = Uuid::new_v4();

    for id in [ana, bia] {
        sqlx::query(
            "INSERT INTO students (id, tenant_id, name, active, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind("Aluno")
        .bind(true)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
    }

    for (student_id, reminder_at) in [
        (ana, Some("2025-03-10")),
        (ana, Some("2025-01-05")),
        (ana, None),
        (Uuid::new_v4(), Some("2025-02-01")),
    ] {
        sqlx::query(
            "INSERT INTO student_occurrences (tenant_id, student_id, reminder_at, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(tenant_id.to_string())
        .bind(student_id.to_string())
        .bind(reminder_at)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
    }

    let students = manager.student_repository();
    let ana_row = students.find_by_id(tenant_id, ana).await.unwrap().unwrap();
    assert_eq!(
        ana_row.occurrence_reminders,
        vec![date(2025, 1, 5), date(2025, 3, 10)]
    );

    let bia_row = students.find_by_id(tenant_id, bia).await.unwrap().unwrap();
    assert!(bia_row.occurrence_reminders.is_empty());
    assert!(bia_row.malformed_dates.is_empty());
}
