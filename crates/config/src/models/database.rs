use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// postgres:// 或 sqlite: 开头，运行时据此选择驱动
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    /// 单条存储语句的上限，到期按可重试的超时处理
    pub statement_timeout_seconds: u64,
    pub migration_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://relationship.db?mode=rwc".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            statement_timeout_seconds: 30,
            migration_timeout_seconds: 300,
        }
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_database_url(&self.url, "database.url")?;

        ValidationUtils::validate_count(self.max_connections as usize, "database.max_connections")?;
        ValidationUtils::validate_count(self.min_connections as usize, "database.min_connections")?;

        if self.min_connections > self.max_connections {
            return Err(crate::ConfigError::Validation(
                "database.min_connections must be less than or equal to max_connections"
                    .to_string(),
            ));
        }

        ValidationUtils::validate_timeout_seconds(
            self.connection_timeout_seconds,
            "database.connection_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.idle_timeout_seconds,
            "database.idle_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.statement_timeout_seconds,
            "database.statement_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.migration_timeout_seconds,
            "database.migration_timeout_seconds",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_validation() {
        let config = DatabaseConfig {
            url: "postgresql://localhost/test".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.url = "".to_string();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.max_connections = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.min_connections = 15;
        invalid_config.max_connections = 10;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.connection_timeout_seconds = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.statement_timeout_seconds = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config;
        invalid_config.migration_timeout_seconds = 7200;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_default_database_is_sqlite() {
        let config = DatabaseConfig::default();
        assert!(config.url.starts_with("sqlite:"));
        assert!(config.validate().is_ok());
    }
}
