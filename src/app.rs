use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use relationship_config::AppConfig;
use relationship_domain::{AnchorKind, LogQuery, TaskFilter, TaskStatus};
use relationship_engine::{
    ManualMessage, RecalculationRequest, RelationshipScheduler, Repositories,
};
use relationship_infrastructure::{DatabaseManager, MetricsCollector, PoolSettings};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::info;

use crate::cli::{Commands, ManualArgs, RecalculateArgs, TaskListArgs};

/// 主应用程序：持有数据库连接和组装好的调度核心
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    scheduler: RelationshipScheduler,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        let settings = PoolSettings {
            max_connections: config.database.max_connections,
            min_connections: config.database.min_connections,
            acquire_timeout: Duration::from_secs(config.database.connection_timeout_seconds),
            idle_timeout: Duration::from_secs(config.database.idle_timeout_seconds),
            statement_timeout: Duration::from_secs(config.database.statement_timeout_seconds),
            migration_timeout: Duration::from_secs(config.database.migration_timeout_seconds),
        };
        let database = DatabaseManager::new(&config.database.url, &settings)
            .await
            .context("连接数据库失败")?;

        let metrics = Arc::new(MetricsCollector::new().context("创建指标收集器失败")?);
        let repos = Repositories {
            students: database.student_repository(),
            templates: database.template_repository(),
            tasks: database.task_repository(),
            logs: database.task_log_repository(),
        };
        let scheduler = RelationshipScheduler::new(repos, &config, metrics);

        Ok(Self {
            config,
            database,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    pub fn scheduler(&self) -> &RelationshipScheduler {
        &self.scheduler
    }

    pub async fn migrate(&self) -> Result<()> {
        self.database.migrate().await.context("数据库迁移失败")?;
        info!("数据库迁移完成");
        Ok(())
    }

    /// 执行一条命令，返回写到标准输出的 JSON
    pub async fn execute(&self, command: Commands, cancel: watch::Receiver<bool>) -> Result<Value> {
        match command {
            Commands::Recalculate(args) => self.recalculate(args, cancel).await,
            Commands::Migrate => {
                self.migrate().await?;
                Ok(json!({ "migrated": true }))
            }
            Commands::Manual(args) => self.manual(args).await,
            Commands::Send { task_id, actor } => {
                let task = self.scheduler.ledger.mark_sent(task_id, None, &actor).await?;
                Ok(serde_json::to_value(task)?)
            }
            Commands::Skip {
                task_id,
                actor,
                reason,
            } => {
                let task = self.scheduler.ledger.skip(task_id, reason, &actor).await?;
                Ok(serde_json::to_value(task)?)
            }
            Commands::Postpone {
                task_id,
                date,
                actor,
            } => {
                let task = self.scheduler.ledger.postpone(task_id, date, &actor).await?;
                Ok(serde_json::to_value(task)?)
            }
            Commands::Tasks(args) => self.list_tasks(args).await,
            Commands::Timeline {
                tenant,
                student,
                limit,
            } => {
                let query = LogQuery {
                    student_id: student,
                    limit,
                    ..LogQuery::for_tenant(tenant)
                };
                let entries = self.scheduler.audit.timeline(&query).await?;
                Ok(serde_json::to_value(entries)?)
            }
            Commands::Summary { tenant, from, to } => {
                let summary = self.scheduler.ledger.summary(tenant, from, to).await?;
                Ok(serde_json::to_value(summary)?)
            }
        }
    }

    async fn recalculate(
        &self,
        args: RecalculateArgs,
        cancel: watch::Receiver<bool>,
    ) -> Result<Value> {
        let anchors = parse_anchors(&args.anchors)?;
        let engine = &self.scheduler.engine;

        if args.all_tenants {
            let reports = engine
                .recalculate_all(args.run_date, args.dry_run, anchors, cancel)
                .await?;
            return Ok(serde_json::to_value(reports)?);
        }

        let tenant_id = args
            .tenant
            .ok_or_else(|| anyhow::anyhow!("必须指定 --tenant 或 --all-tenants"))?;
        let request = RecalculationRequest {
            tenant_id,
            run_date: args.run_date,
            dry_run: args.dry_run,
            anchors,
        };
        let report = engine.recalculate(request, cancel).await?;
        Ok(serde_json::to_value(report)?)
    }

    async fn manual(&self, args: ManualArgs) -> Result<Value> {
        let message = ManualMessage {
            tenant_id: args.tenant,
            student_id: args.student,
            channel: args.channel,
            body: args.body,
            created_by: args.created_by,
            classification_tag: args.tag,
        };
        let task = self.scheduler.manual.log_manual_message(message).await?;
        Ok(serde_json::to_value(task)?)
    }

    async fn list_tasks(&self, args: TaskListArgs) -> Result<Value> {
        let status = args
            .status
            .as_deref()
            .map(str::parse::<TaskStatus>)
            .transpose()?;
        let filter = TaskFilter {
            tenant_id: Some(args.tenant),
            student_id: args.student,
            status,
            anchor: args.anchor,
            template_code: None,
            scheduled_from: args.from,
            scheduled_to: args.to,
            limit: args.limit,
            offset: args.offset,
        };
        let tasks = self.scheduler.ledger.list(&filter).await?;
        Ok(serde_json::to_value(tasks)?)
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}

fn parse_anchors(codes: &[String]) -> Result<Option<Vec<AnchorKind>>> {
    if codes.is_empty() {
        return Ok(None);
    }
    let anchors = codes
        .iter()
        .map(|code| code.parse::<AnchorKind>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(anchors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_anchors() {
        assert_eq!(parse_anchors(&[]).unwrap(), None);
        assert_eq!(
            parse_anchors(&["birthday".to_string(), "first_workout".to_string()]).unwrap(),
            Some(vec![AnchorKind::Birthday, AnchorKind::FirstWorkout])
        );
        assert!(parse_anchors(&["graduation".to_string()]).is_err());
    }
}
