//! Configuration types for the faucet service

mod store;

pub use store::{PostgresConfig, StorageConfig, StorageType};

use {
    serde::{Deserialize, Serialize},
    std::{fs, path::Path, time::Duration},
};

use crate::errors::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub withdrawal: WithdrawalJobConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Shared secret expected in `x-callback-token` on partner callbacks
    pub callback_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_latest_incomes")]
    pub latest_incomes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalJobConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_withdrawal_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub min_balance: i64,
}

impl ServiceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Self>(&contents)?)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            hub: HubConfig::default(),
            withdrawal: WithdrawalJobConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            path_prefix: default_path_prefix(),
            callback_token: None,
        }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            latest_incomes: default_latest_incomes(),
        }
    }
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl WithdrawalJobConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for WithdrawalJobConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_withdrawal_interval(),
            min_balance: 0,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_path_prefix() -> String {
    "/v1".to_string()
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_latest_incomes() -> usize {
    50
}

fn default_write_timeout() -> u64 {
    5_000
}

fn default_withdrawal_interval() -> u64 {
    86_400
}
