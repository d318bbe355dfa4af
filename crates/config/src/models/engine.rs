use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// 重试策略配置（指数退避 + 随机抖动）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ConfigValidator for RetryPolicyConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be between 1 and 10".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Validation(
                "retry.base_delay_ms must be less than or equal to max_delay_ms".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        ValidationUtils::validate_ratio(self.jitter_factor, "retry.jitter_factor")
    }
}

/// 重算引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 到期日前后容差天数
    pub tolerance_days: i64,
    /// 同时处理的学员数上限
    pub max_concurrency: usize,
    /// 单个学员处理单元的超时（毫秒）
    pub unit_timeout_ms: u64,
    /// 存储暂时不可用时的重试策略
    pub store_retry: RetryPolicyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance_days: 1,
            max_concurrency: 8,
            unit_timeout_ms: 10_000,
            store_retry: RetryPolicyConfig::default(),
        }
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if !(0..=7).contains(&self.tolerance_days) {
            return Err(ConfigError::Validation(
                "engine.tolerance_days must be between 0 and 7".to_string(),
            ));
        }
        ValidationUtils::validate_count(self.max_concurrency, "engine.max_concurrency")?;
        if self.unit_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "engine.unit_timeout_ms must be greater than 0".to_string(),
            ));
        }
        self.store_retry.validate()
    }
}

/// 时间线写入配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub retry: RetryPolicyConfig,
}

impl ConfigValidator for AuditConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.retry.validate()
    }
}
