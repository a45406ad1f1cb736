//! Configuration management for rewind.
//!
//! Loads an optional TOML file, then applies `REWIND__SECTION__KEY`
//! environment overrides. Everything has a default, so no file is needed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::sync::Backend;
use crate::utils::errors::{BackupError, Result};

const ENV_PREFIX: &str = "REWIND";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub lock: LockConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Transfer backend (rsync, native)
    pub backend: Backend,

    /// rsync program name or path
    pub rsync_path: String,

    /// Options placed before the command-line extras
    pub extra_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Take the advisory destination lock
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level used with --verbose (trace, debug, info)
    pub level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            rsync_path: default_rsync_path(),
            extra_options: Vec::new(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_rsync_path() -> String {
    "rsync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// `env` replaces the process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::new(&path.to_string_lossy(), ::config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("sync.extra_options")
                .source(env),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| BackupError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() -> Result<()> {
        let config = Config::load_with_env(None, Some(HashMap::new()))?;
        assert_eq!(config.sync.backend, Backend::Rsync);
        assert_eq!(config.sync.rsync_path, "rsync");
        assert!(config.sync.extra_options.is_empty());
        assert!(config.lock.enabled);
        assert_eq!(config.log.level, "info");
        Ok(())
    }

    #[test]
    fn test_file_values() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("rewind.toml");
        fs::write(
            &path,
            r#"
[sync]
backend = "native"
extra_options = ["--exclude=*.tmp"]

[lock]
enabled = false
"#,
        )?;

        let config = Config::load_with_env(Some(&path), Some(HashMap::new()))?;
        assert_eq!(config.sync.backend, Backend::Native);
        assert_eq!(config.sync.extra_options, vec!["--exclude=*.tmp".to_string()]);
        assert!(!config.lock.enabled);
        assert_eq!(config.sync.rsync_path, "rsync");
        Ok(())
    }

    #[test]
    fn test_environment_overrides_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("rewind.toml");
        fs::write(&path, "[sync]\nrsync_path = \"/usr/bin/rsync\"\n")?;

        let env = HashMap::from([
            ("REWIND__SYNC__RSYNC_PATH".to_string(), "/opt/rsync/bin/rsync".to_string()),
            ("REWIND__LOG__LEVEL".to_string(), "debug".to_string()),
        ]);
        let config = Config::load_with_env(Some(&path), Some(env))?;
        assert_eq!(config.sync.rsync_path, "/opt/rsync/bin/rsync");
        assert_eq!(config.log.level, "debug");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load_with_env(
            Some(Path::new("/nonexistent/rewind.toml")),
            Some(HashMap::new()),
        )
        .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_unknown_backend_is_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("rewind.toml");
        fs::write(&path, "[sync]\nbackend = \"ftp\"\n")?;
        assert!(Config::load_with_env(Some(&path), Some(HashMap::new())).is_err());
        Ok(())
    }
}
