//! Configuration loading and management.
//!
//! Lookup order: explicit `--config` path, `TASK_ASSIGN_CONFIG_PATH`,
//! `./task-assign/config.yaml`, `~/.task-assign/config.yaml`, then built-in
//! defaults. Environment overrides are applied on top of whichever was found:
//! - `TASK_ASSIGN_DB_PATH`
//! - `TASK_ASSIGN_HOST`
//! - `TASK_ASSIGN_PORT`
//! - `TASK_ASSIGN_IDEMPOTENCY_TTL_SECONDS`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::requests::PageLimits;

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    #[serde(default)]
    pub assignments: AssignmentsConfig,
}

/// Server-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Address the HTTP adapter binds to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Idempotency ledger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long a key stays replayable.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Assignment listing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentsConfig {
    #[serde(default = "default_page_limit")]
    pub default_page_limit: u32,

    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u32,
}

impl Default for AssignmentsConfig {
    fn default() -> Self {
        Self {
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
        }
    }
}

impl AssignmentsConfig {
    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_page_limit,
            max_limit: self.max_page_limit,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".task-assign/assignments.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    31995
}

/// Longest replay window accepted from config (one year).
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

fn default_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_page_limit() -> u32 {
    50
}

fn default_max_page_limit() -> u32 {
    200
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Config files probed when no explicit path is given, highest priority first.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var("TASK_ASSIGN_CONFIG_PATH") {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("task-assign/config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".task-assign").join("config.yaml"));
        }
        paths
    }

    /// Load from `explicit` (which must exist), else the first candidate that
    /// exists, else defaults. Environment overrides are applied last.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let found = Self::candidate_paths().into_iter().find(|p| p.exists());
                match found {
                    Some(path) => {
                        tracing::debug!(path = %path.display(), "Loading config");
                        Self::load(&path)?
                    }
                    None => Self::default(),
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `TASK_ASSIGN_*` overrides read through `lookup`.
    /// Unparsable numeric values are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("TASK_ASSIGN_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Some(host) = lookup("TASK_ASSIGN_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("TASK_ASSIGN_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid TASK_ASSIGN_PORT"),
            }
        }

        if let Some(ttl) = lookup("TASK_ASSIGN_IDEMPOTENCY_TTL_SECONDS") {
            match ttl.parse() {
                Ok(ttl) => self.idempotency.ttl_seconds = ttl,
                Err(_) => tracing::warn!(
                    value = %ttl,
                    "Ignoring invalid TASK_ASSIGN_IDEMPOTENCY_TTL_SECONDS"
                ),
            }
        }
    }

    /// Reject settings that would disable the ledger or make every listing
    /// request invalid.
    pub fn validate(&self) -> Result<()> {
        let ttl = self.idempotency.ttl_seconds;
        if ttl == 0 || ttl > MAX_TTL_SECONDS {
            anyhow::bail!(
                "idempotency.ttl_seconds must be between 1 and {}",
                MAX_TTL_SECONDS
            );
        }

        let a = &self.assignments;
        if a.max_page_limit == 0 {
            anyhow::bail!("assignments.max_page_limit must be at least 1");
        }
        if a.default_page_limit == 0 || a.default_page_limit > a.max_page_limit {
            anyhow::bail!(
                "assignments.default_page_limit must be between 1 and {}",
                a.max_page_limit
            );
        }
        Ok(())
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(
            config.server.db_path,
            PathBuf::from(".task-assign/assignments.db")
        );
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 31995);
        assert_eq!(config.idempotency.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.assignments.page_limits(), PageLimits::default());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 4000\nidempotency:\n  ttl_seconds: 60\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.idempotency.ttl_seconds, 60);
        assert_eq!(config.assignments.max_page_limit, 200);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(Config::load_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn invalid_page_limits_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "assignments:\n  default_page_limit: 500\n  max_page_limit: 200\n",
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn zero_and_oversized_ttl_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        for ttl in [0, MAX_TTL_SECONDS + 1, i64::MAX as u64 / 1000] {
            std::fs::write(&path, format!("idempotency:\n  ttl_seconds: {}\n", ttl)).unwrap();
            assert!(Config::load(&path).is_err(), "ttl {}", ttl);
        }

        std::fs::write(&path, format!("idempotency:\n  ttl_seconds: {}\n", MAX_TTL_SECONDS))
            .unwrap();
        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn zero_ttl_from_env_fails_validation() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| {
            (key == "TASK_ASSIGN_IDEMPOTENCY_TTL_SECONDS").then(|| "0".to_string())
        });
        assert_eq!(config.idempotency.ttl_seconds, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_and_skip_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TASK_ASSIGN_DB_PATH", "/tmp/a.db"),
            ("TASK_ASSIGN_HOST", "0.0.0.0"),
            ("TASK_ASSIGN_PORT", "not-a-port"),
            ("TASK_ASSIGN_IDEMPOTENCY_TTL_SECONDS", "30"),
        ]);

        let mut config = Config::default();
        config.apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.db_path, PathBuf::from("/tmp/a.db"));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 31995);
        assert_eq!(config.idempotency.ttl_seconds, 30);
    }

    #[test]
    fn ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.db_path = dir.path().join("nested/deeper/assign.db");

        config.ensure_db_dir().unwrap();
        assert!(dir.path().join("nested/deeper").is_dir());
    }
}
