use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use relationship_scheduler::app::Application;
use relationship_scheduler::cli::CliApp;
use relationship_scheduler::common::{init_logging, install_metrics_exporter, load_config};
use relationship_scheduler::shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliApp::parse();

    // 加载配置
    let config = load_config(
        cli.config.as_deref(),
        cli.log_level.as_deref(),
        cli.log_format.as_deref(),
    )?;

    // 初始化日志系统，日志写到标准错误，标准输出只输出结果
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    install_metrics_exporter(&config.observability)?;

    info!("启动学员关系触达调度系统");
    if let Some(path) = &cli.config {
        info!("配置文件: {path}");
    }

    let app = Application::new(config).await?;

    // Ctrl+C 后不再启动新的学员处理单元，已开始的单元执行完毕
    let shutdown_manager = ShutdownManager::new();
    shutdown_manager.listen_for_signals();

    let result = app.execute(cli.command, shutdown_manager.subscribe()).await;
    app.close().await;

    match result {
        Ok(output) => {
            let rendered = serde_json::to_string_pretty(&output).context("序列化输出失败")?;
            println!("{rendered}");
            Ok(())
        }
        Err(e) => {
            error!("命令执行失败: {e:#}");
            Err(e)
        }
    }
}
