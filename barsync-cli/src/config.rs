//! Optional TOML configuration file and environment overrides.
//!
//! ```toml
//! cache_dir = "/var/lib/barsync"
//!
//! [sync]
//! page_delay_ms = 200
//! default_start = "2017-01-01"
//!
//! [binance]
//! proxy = "http://127.0.0.1:7890"
//! timeout_secs = 30
//! ```

use anyhow::{Context, Result};
use barsync_core::{SourceSettings, SyncSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CACHE_DIR_ENV: &str = "BARSYNC_CACHE_DIR";
pub const BINANCE_KEY_ENV: &str = "BINANCE_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub cache_dir: Option<PathBuf>,
    pub sync: SyncSettings,
    pub binance: SourceSettings,
    pub ashare: SourceSettings,
}

impl FileConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("parse config TOML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Load `path` if given, else the per-user config file if it exists,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        if let Ok(key) = std::env::var(BINANCE_KEY_ENV) {
            if !key.is_empty() {
                config.binance.api_key = Some(key);
            }
        }
        Ok(config)
    }

    /// Cache root: flag, then `BARSYNC_CACHE_DIR`, then the file, then the
    /// platform cache directory.
    pub fn cache_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        resolve_cache_dir(
            flag,
            std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from),
            self.cache_dir.clone(),
        )
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("barsync").join("config.toml"))
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("barsync"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn resolve_cache_dir(
    flag: Option<PathBuf>,
    env: Option<PathBuf>,
    file: Option<PathBuf>,
) -> PathBuf {
    flag.or(env)
        .or(file)
        .unwrap_or_else(default_cache_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = FileConfig::from_toml("").unwrap();
        assert_eq!(config, FileConfig::default());
        assert_eq!(config.sync.page_delay_ms, 200);
    }

    #[test]
    fn sections_override_defaults() {
        let config = FileConfig::from_toml(
            r#"
cache_dir = "/tmp/bars"

[sync]
page_delay_ms = 50
max_pages = 10
default_start = "2020-06-01"

[binance]
proxy = "http://127.0.0.1:7890"
page_limit = 500
"#,
        )
        .unwrap();

        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/bars")));
        assert_eq!(config.sync.page_delay_ms, 50);
        assert_eq!(config.sync.max_pages, Some(10));
        assert_eq!(
            config.sync.default_start,
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()
        );
        assert_eq!(config.sync.forward_skew_secs, 60);
        assert_eq!(config.binance.proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(config.binance.page_limit, Some(500));
        assert_eq!(config.ashare, SourceSettings::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(FileConfig::from_toml("[sync]\npage_delay_ms = \"fast\"").is_err());
    }

    #[test]
    fn reads_config_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ashare]\ntimeout_secs = 5\n").unwrap();

        let config = FileConfig::from_file(&path).unwrap();
        assert_eq!(config.ashare.timeout_secs, 5);
    }

    #[test]
    fn cache_dir_precedence() {
        let flag = Some(PathBuf::from("flag"));
        let env = Some(PathBuf::from("env"));
        let file = Some(PathBuf::from("file"));

        assert_eq!(
            resolve_cache_dir(flag.clone(), env.clone(), file.clone()),
            PathBuf::from("flag")
        );
        assert_eq!(
            resolve_cache_dir(None, env, file.clone()),
            PathBuf::from("env")
        );
        assert_eq!(resolve_cache_dir(None, None, file), PathBuf::from("file"));
        assert_eq!(resolve_cache_dir(None, None, None), default_cache_dir());
    }
}
