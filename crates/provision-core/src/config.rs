use crate::error::{ProvisionError, Result};
use crate::paths;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ClusterConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Explicit kubectl binary; resolved from PATH when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubectl: Option<PathBuf>,
    /// kubeconfig context to target; current context when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: None,
            context: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// DatabaseConfig
// ---------------------------------------------------------------------------

/// Location of the shared MariaDB service used by external-database tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_namespace")]
    pub namespace: String,
    #[serde(default = "default_db_service")]
    pub service: String,
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default = "default_admin_secret")]
    pub admin_secret: String,
    #[serde(default = "default_admin_secret_key")]
    pub admin_secret_key: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
}

fn default_db_namespace() -> String {
    "databases".to_string()
}

fn default_db_service() -> String {
    "mariadb-shared".to_string()
}

fn default_admin_user() -> String {
    "root".to_string()
}

fn default_admin_secret() -> String {
    "mariadb-shared-root".to_string()
}

fn default_admin_secret_key() -> String {
    "mariadb-root-password".to_string()
}

fn default_db_port() -> u16 {
    3306
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            namespace: default_db_namespace(),
            service: default_db_service(),
            admin_user: default_admin_user(),
            admin_secret: default_admin_secret(),
            admin_secret_key: default_admin_secret_key(),
            port: default_db_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// SecretsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// When false, generated credentials are not persisted to the secret store.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit age binary; resolved from PATH when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            age: None,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Template root, relative to the project root unless absolute.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_tier")]
    pub default_tier: String,
    #[serde(default = "default_theme")]
    pub default_theme: String,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_version() -> u32 {
    1
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_TEMPLATES_DIR)
}

fn default_tier() -> String {
    "shared".to_string()
}

fn default_theme() -> String {
    "default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            templates_dir: default_templates_dir(),
            default_tier: default_tier(),
            default_theme: default_theme(),
            cluster: ClusterConfig::default(),
            database: DatabaseConfig::default(),
            secrets: SecretsConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ProvisionError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn templates_path(&self, root: &Path) -> PathBuf {
        if self.templates_dir.is_absolute() {
            self.templates_dir.clone()
        } else {
            root.join(&self.templates_dir)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
