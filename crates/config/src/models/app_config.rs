use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    engine::{AuditConfig, EngineConfig},
    observability::ObservabilityConfig,
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 默认值 <- 配置文件 <- `RELATIONSHIP_` 前缀环境变量（`__` 分隔层级）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("database.url", defaults.database.url.clone())?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default("database.min_connections", defaults.database.min_connections)?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds,
            )?
            .set_default(
                "database.idle_timeout_seconds",
                defaults.database.idle_timeout_seconds,
            )?
            .set_default("engine.tolerance_days", defaults.engine.tolerance_days)?
            .set_default(
                "engine.max_concurrency",
                defaults.engine.max_concurrency as u64,
            )?
            .set_default("engine.unit_timeout_ms", defaults.engine.unit_timeout_ms)?
            .set_default(
                "observability.log_level",
                defaults.observability.log_level.clone(),
            )?
            .set_default(
                "observability.log_format",
                defaults.observability.log_format.clone(),
            )?
            .set_default(
                "observability.metrics_enabled",
                defaults.observability.metrics_enabled,
            )?
            .set_default(
                "observability.metrics_bind_address",
                defaults.observability.metrics_bind_address.clone(),
            )?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/relationship.toml",
                "relationship.toml",
                "/etc/relationship-scheduler/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("RELATIONSHIP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.engine.validate()?;
        self.audit.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.engine.tolerance_days, 1);
        assert_eq!(config.audit.retry.max_attempts, 3);
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_app_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[database]
url = "postgresql://localhost/relationship"
max_connections = 20
min_connections = 2
connection_timeout_seconds = 30
idle_timeout_seconds = 600

[engine]
tolerance_days = 2
max_concurrency = 4
unit_timeout_ms = 5000

[engine.store_retry]
max_attempts = 5
base_delay_ms = 50
max_delay_ms = 1000
backoff_multiplier = 2.0
jitter_factor = 0.0

[observability]
log_level = "debug"
log_format = "json"
metrics_enabled = true
metrics_bind_address = "127.0.0.1:9100"
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.engine.tolerance_days, 2);
        assert_eq!(config.engine.store_retry.max_attempts, 5);
        // 未出现的段落使用默认值
        assert_eq!(config.audit.retry, crate::RetryPolicyConfig::default());
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_app_config_from_toml_rejects_invalid() {
        let toml_str = r#"
[observability]
log_level = "info"
log_format = "xml"
metrics_enabled = false
metrics_bind_address = ""
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_app_config_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.database.url, config.database.url);
        assert_eq!(parsed.engine.unit_timeout_ms, config.engine.unit_timeout_ms);
    }
}
