use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "workload.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            database: DatabaseConfig::default(),
            pool: PoolConfig::default(),
            metrics: MetricsConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

/// Connection pool towards the SQL gateway
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://root@localhost:26257/workload?sslmode=disable".to_string(),
            max_connections: 75,
            min_connections: 75,
            acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Worker pool sizing. `size: 0` derives the size from the CPU count.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PoolConfig {
    pub size: usize,
}

impl PoolConfig {
    pub fn effective_size(&self) -> usize {
        if self.size > 0 {
            self.size
        } else {
            crate::engine::default_pool_size()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetricsConfig {
    pub report_interval_secs: u64,
    /// Latency samples retained per operation id
    pub sample_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 5,
            sample_capacity: 10_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SamplerConfig {
    pub capacity: usize,
    pub interval_secs: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            capacity: 720,
            interval_secs: 1,
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`.
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
