use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::Deserialize;
use wings_storage::{PurgePolicy, StorageConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub storage: StorageSection,
    #[serde(default)]
    pub purge: PurgeSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default, rename = "folder")]
    pub folders: Vec<FolderSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurgeSection {
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: i64,
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_boot_delay_secs")]
    pub boot_delay_secs: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderSection {
    pub endpoint_id: u16,
    pub name: String,
    pub link_state: PathBuf,
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub subfolders: Vec<String>,
}

fn default_expiry_hours() -> i64 {
    48
}

fn default_max_fails() -> u32 {
    500
}

fn default_step_secs() -> u64 {
    60
}

fn default_boot_delay_secs() -> u64 {
    300
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_bind() -> String {
    "127.0.0.1:8740".to_string()
}

impl Default for PurgeSection {
    fn default() -> Self {
        Self {
            expiry_hours: default_expiry_hours(),
            max_fails: default_max_fails(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            boot_delay_secs: default_boot_delay_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: None,
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&source)
            .with_context(|| format!("invalid config TOML at {}", path.display()))
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            sqlite_path: self.storage.sqlite_path.clone(),
            purge: PurgePolicy {
                expiry: TimeDelta::hours(self.purge.expiry_hours),
                max_fails: self.purge.max_fails,
            },
        }
    }

    pub fn retry_step(&self) -> Duration {
        Duration::from_secs(self.retry.step_secs)
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_secs(self.worker.boot_delay_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.upload_timeout_secs)
    }
}
