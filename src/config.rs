//! Service configuration stored in `~/.fieldops/config.json`.
//!
//! Every key is optional; a missing file means defaults. Environment variables
//! override the file so deployments can run without one.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long a dashboard bundle is served from cache.
pub const DEFAULT_DASHBOARD_TTL_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Object storage that holds uploaded photos. Only used to build public URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Explicit public base URL (CDN or custom domain). Wins over bucket/region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl StorageConfig {
    /// Resolve a stored photo path to a public URL. Absolute URLs pass through;
    /// without any storage settings the stored value is returned unchanged.
    pub fn public_url(&self, path: &str) -> String {
        let path = path.trim();
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let key = path.trim_start_matches('/');
        if let Some(base) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }
        match (self.bucket.as_deref(), self.region.as_deref()) {
            (Some(bucket), Some(region)) if !bucket.is_empty() => {
                format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key)
            }
            (Some(bucket), _) if !bucket.is_empty() => {
                format!("https://{}.s3.amazonaws.com/{}", bucket, key)
            }
            _ => path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite file; defaults to `~/.fieldops/fieldops.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory for daily request logs; defaults to `~/.fieldops/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    /// Account that `admin:assign-role` promotes when no email is given.
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default = "default_dashboard_ttl")]
    pub dashboard_cache_ttl_secs: u64,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_admin_email() -> String {
    "admin@example.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_dashboard_ttl() -> u64 {
    DEFAULT_DASHBOARD_TTL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            bind: default_bind(),
            log_dir: None,
            admin_email: default_admin_email(),
            cors_enabled: true,
            dashboard_cache_ttl_secs: DEFAULT_DASHBOARD_TTL_SECS,
            storage: StorageConfig::default(),
        }
    }
}

/// Get the canonical config file path (~/.fieldops/config.json)
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(fieldops_home()?.join("config.json"))
}

fn fieldops_home() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".fieldops"))
}

impl Config {
    /// Load from `path` (or the default location), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from `lookup` (the process environment outside tests).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("FIELDOPS_DB_PATH") {
            self.db_path = Some(v);
        }
        if let Some(v) = get("FIELDOPS_BIND") {
            self.bind = v;
        }
        if let Some(v) = get("FIELDOPS_LOG_DIR") {
            self.log_dir = Some(v);
        }
        if let Some(v) = get("FIELDOPS_ADMIN_EMAIL") {
            self.admin_email = v;
        }
        if let Some(v) = get("AWS_BUCKET") {
            self.storage.bucket = Some(v);
        }
        if let Some(v) = get("AWS_DEFAULT_REGION") {
            self.storage.region = Some(v);
        }
        if let Some(v) = get("AWS_URL") {
            self.storage.url = Some(v);
        }
    }

    pub fn resolved_db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.db_path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(fieldops_home()?.join("fieldops.db")),
        }
    }

    pub fn resolved_log_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.log_dir {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(fieldops_home()?.join("logs")),
        }
    }
}
