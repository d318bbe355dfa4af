use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use relationship_config::{AppConfig, ObservabilityConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统，RUST_LOG 优先于配置的级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载并校验配置，命令行参数覆盖日志设置
pub fn load_config(
    config_path: Option<&str>,
    log_level: Option<&str>,
    log_format: Option<&str>,
) -> Result<AppConfig> {
    let mut config = match config_path {
        Some(path) => {
            AppConfig::load(Some(path)).with_context(|| format!("加载配置文件失败: {path}"))?
        }
        None => AppConfig::load(None).context("加载默认配置失败")?,
    };

    if let Some(level) = log_level {
        config.observability.log_level = level.to_string();
    }
    if let Some(format) = log_format {
        config.observability.log_format = format.to_string();
    }

    Ok(config)
}

/// 按配置安装 Prometheus 导出器，未启用时不做任何事
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus导出器失败")?;

    info!("指标导出已启用: http://{}/metrics", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_with_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
url = "sqlite::memory:"

[engine]
tolerance_days = 2
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = load_config(Some(&path), Some("debug"), Some("json")).unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.engine.tolerance_days, 2);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Some("/nonexistent/relationship.toml"), None, None).is_err());
    }

    #[test]
    fn test_metrics_exporter_disabled_is_noop() {
        let config = ObservabilityConfig::default();
        assert!(install_metrics_exporter(&config).is_ok());
    }
}
