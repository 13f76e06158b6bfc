use std::path::Path;

use serde::Deserialize;

use relmesh_core::engine::EngineConfig;
use relmesh_storage::{BreakerSettings, RetrySettings};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, String),

    #[error("failed to parse config file: {0}")]
    ParseToml(String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineValues,
    pub cache: CacheValues,
    pub retry: RetryValues,
    pub breaker: BreakerValues,
    pub log: LogValues,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineValues {
    pub max_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheValues {
    pub schema_cache_max_cost_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryValues {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerValues {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogValues {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for EngineValues {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            max_depth: defaults.max_depth,
        }
    }
}

impl Default for CacheValues {
    fn default() -> Self {
        Self {
            schema_cache_max_cost_bytes: 1 << 26,
        }
    }
}

impl Default for RetryValues {
    fn default() -> Self {
        let defaults = RetrySettings::default();
        Self {
            max_retries: defaults.max_retries,
            base_delay_ms: defaults.base_delay_ms,
            max_delay_ms: defaults.max_delay_ms,
        }
    }
}

impl Default for BreakerValues {
    fn default() -> Self {
        let defaults = BreakerSettings::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            cooldown_ms: defaults.cooldown_ms,
        }
    }
}

impl Default for LogValues {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key).ok());
    }

    fn apply_env_overrides_with(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("RELMESH_ENGINE_MAX_DEPTH")
            && let Ok(n) = v.parse()
        {
            self.engine.max_depth = n;
        }
        if let Some(v) = env("RELMESH_CACHE_MAX_COST_BYTES")
            && let Ok(n) = v.parse()
        {
            self.cache.schema_cache_max_cost_bytes = n;
        }
        if let Some(v) = env("RELMESH_RETRY_MAX_RETRIES")
            && let Ok(n) = v.parse()
        {
            self.retry.max_retries = n;
        }
        if let Some(v) = env("RELMESH_BREAKER_FAILURE_THRESHOLD")
            && let Ok(n) = v.parse()
        {
            self.breaker.failure_threshold = n;
        }
        if let Some(v) = env("RELMESH_BREAKER_COOLDOWN_MS")
            && let Ok(n) = v.parse()
        {
            self.breaker.cooldown_ms = n;
        }
        if let Some(v) = env("RELMESH_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = env("RELMESH_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_depth == 0 {
            return Err(ConfigError::Validation(
                "engine.max_depth must be non-zero".to_string(),
            ));
        }
        if self.cache.schema_cache_max_cost_bytes == 0 {
            return Err(ConfigError::Validation(
                "cache.schema_cache_max_cost_bytes must be non-zero".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breaker.failure_threshold must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_depth: self.engine.max_depth,
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_retries: self.retry.max_retries,
            base_delay_ms: self.retry.base_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
        }
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.breaker.failure_threshold,
            cooldown_ms: self.breaker.cooldown_ms,
        }
    }
}
