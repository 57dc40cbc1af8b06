use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// First-start administrator (only used when the user table is empty)
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_sessions() -> usize {
    10_000
}

/// Record-file storage configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// fsync table writes (the transfer WAL is always synced)
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sync_writes: false,
        }
    }
}

/// Startup recovery configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    /// Upper bound on unresolved transfers held in memory during the scan
    pub max_pending: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { max_pending: 1000 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BootstrapConfig {
    pub admin_password: Option<String>,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        Self::load_from(format!("config/{}.yaml", env))
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", path.display()))
    }
}
