#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relationship_config::AppConfig;
    use relationship_domain::{
        LogAction, LogQuery, SchedulerError, TaskRepository, TaskStatus, MANUAL_ANCHOR,
    };
    use relationship_engine::{ManualMessage, RelationshipScheduler, Repositories};
    use relationship_infrastructure::MetricsCollector;
    use relationship_testing_utils::{date, RepositoryFixture, StudentBuilder, TaskBuilder};
    use uuid::Uuid;

    fn build_scheduler(fixture: &RepositoryFixture) -> RelationshipScheduler {
        let repos = Repositories {
            students: fixture.students.clone(),
            templates: fixture.templates.clone(),
            tasks: fixture.tasks.clone(),
            logs: fixture.logs.clone(),
        };
        RelationshipScheduler::new(
            repos,
            &AppConfig::default(),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    fn message(tenant_id: Uuid, student_id: Uuid) -> ManualMessage {
        ManualMessage {
            tenant_id,
            student_id,
            channel: "whatsapp".to_string(),
            body: "Oi! Tudo certo com os treinos?".to_string(),
            created_by: "coach.marina".to_string(),
            classification_tag: None,
        }
    }

    #[tokio::test]
    async fn test_manual_message_bypasses_active_task() {
        let fixture = RepositoryFixture::new();
        let student_id = fixture.add_student(StudentBuilder::new(fixture.tenant_id).build());
        let automatic = fixture
            .tasks
            .create(
                &TaskBuilder::new(fixture.tenant_id, student_id)
                    .with_template_code("D8")
                    .with_status(TaskStatus::DueToday)
                    .scheduled_for(date(2025, 1, 9))
                    .build_new(),
            )
            .await
            .unwrap();
        let scheduler = build_scheduler(&fixture);

        let task = scheduler
            .manual
            .log_manual_message(message(fixture.tenant_id, student_id))
            .await
            .unwrap();

        assert_ne!(task.id, automatic.id);
        assert_eq!(task.status, TaskStatus::Sent);
        assert_eq!(task.template_code, None);
        assert_eq!(task.anchor, MANUAL_ANCHOR);
        assert_eq!(task.created_by, "coach.marina");
        assert!(task.sent_at.is_some());
        assert_eq!(fixture.tasks.count(), 2);

        let actions: Vec<LogAction> = fixture
            .logs
            .entries_for_task(task.id)
            .iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![LogAction::Created, LogAction::Sent]);
    }

    #[tokio::test]
    async fn test_repeated_manual_messages_each_create_a_task() {
        let fixture = RepositoryFixture::new();
        let student_id = fixture.add_student(StudentBuilder::new(fixture.tenant_id).build());
        let scheduler = build_scheduler(&fixture);

        for _ in 0..3 {
            scheduler
                .manual
                .log_manual_message(message(fixture.tenant_id, student_id))
                .await
                .unwrap();
        }

        assert_eq!(fixture.tasks.count(), 3);
        assert_eq!(fixture.logs.count(), 6);
    }

    #[tokio::test]
    async fn test_classification_tag_is_carried() {
        let fixture = RepositoryFixture::new();
        let student_id = fixture.add_student(StudentBuilder::new(fixture.tenant_id).build());
        let scheduler = build_scheduler(&fixture);
        let mut msg = message(fixture.tenant_id, student_id);
        msg.classification_tag = Some("retencao".to_string());

        let task = scheduler.manual.log_manual_message(msg).await.unwrap();

        assert_eq!(task.payload["classification_tag"], "retencao");
        assert_eq!(task.payload["body"], "Oi! Tudo certo com os treinos?");
        let entries = fixture.logs.entries_for_task(task.id);
        assert_eq!(entries[1].meta["classification_tag"], "retencao");
    }

    #[tokio::test]
    async fn test_unknown_student_is_rejected() {
        let fixture = RepositoryFixture::new();
        let scheduler = build_scheduler(&fixture);
        let missing = Uuid::new_v4();

        let result = scheduler
            .manual
            .log_manual_message(message(fixture.tenant_id, missing))
            .await;

        assert!(matches!(result, Err(SchedulerError::StudentNotFound { id }) if id == missing));
        assert_eq!(fixture.tasks.count(), 0);
        assert_eq!(fixture.logs.count(), 0);
    }

    #[tokio::test]
    async fn test_student_from_other_tenant_is_rejected() {
        let fixture = RepositoryFixture::new();
        let student_id = fixture.add_student(StudentBuilder::new(Uuid::new_v4()).build());
        let scheduler = build_scheduler(&fixture);

        let result = scheduler
            .manual
            .log_manual_message(message(fixture.tenant_id, student_id))
            .await;

        assert!(matches!(result, Err(SchedulerError::StudentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_manual_entries_appear_in_student_timeline() {
        let fixture = RepositoryFixture::new();
        let student_id = fixture.add_student(StudentBuilder::new(fixture.tenant_id).build());
        let scheduler = build_scheduler(&fixture);

        scheduler
            .manual
            .log_manual_message(message(fixture.tenant_id, student_id))
            .await
            .unwrap();

        let timeline = scheduler
            .audit
            .timeline(&LogQuery::for_student(fixture.tenant_id, student_id))
            .await
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert!(timeline.iter().all(|e| e.template_code.is_none()));
    }

    #[tokio::test]
    async fn test_manual_insert_is_not_retried_after_lost_ack() {
        let fixture = RepositoryFixture::new();
        let student_id = fixture.add_student(StudentBuilder::new(fixture.tenant_id).build());
        fixture.tasks.lose_next_acks(1);
        let scheduler = build_scheduler(&fixture);

        let err = scheduler
            .manual
            .log_manual_message(message(fixture.tenant_id, student_id))
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
        assert_eq!(fixture.tasks.create_calls(), 1);
        assert_eq!(fixture.tasks.count(), 1);
    }
}
