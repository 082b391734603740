use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;

use memtree_core::{
    CHILD_THRESHOLD, DistanceMetric, EngineOptions, FileStorage, NoFileStorage, OVERSAMPLE,
    ROOT_THRESHOLD,
};

use crate::error::{Result, StoreError};
use crate::presign::LocalPresigner;

pub const DATA_DIR_ENV: &str = "MEMTREE_DATA_DIR";
pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "memtree.db";

/// Data directory: `$MEMTREE_DATA_DIR` if set, else `~/.memtree`.
pub fn default_base_dir() -> PathBuf {
    match env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs_home().join(".memtree"),
    }
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Contents of `config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineSettings,
    pub presign: PresignSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub oversample: usize,
    pub root_threshold: f32,
    pub child_threshold: f32,
    /// Whole-request deadline; 0 disables it.
    pub timeout_ms: u64,
    pub metric: DistanceMetric,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            oversample: OVERSAMPLE,
            root_threshold: ROOT_THRESHOLD,
            child_threshold: CHILD_THRESHOLD,
            timeout_ms: 0,
            metric: DistanceMetric::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresignSettings {
    /// Base URL of the image server. Unset means images cannot be presigned.
    pub base_url: Option<String>,
    pub secret: String,
    pub ttl_secs: u64,
}

impl Default for PresignSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            secret: String::new(),
            ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    pub bind: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

impl Settings {
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| StoreError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read `config.toml` from `base_dir`; a missing file yields defaults.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(CONFIG_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => {
                tracing::debug!("loaded settings from {}", path.display());
                Self::parse(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if e.oversample == 0 {
            return Err(StoreError::Config("engine.oversample must be at least 1".into()));
        }
        for (name, t) in [
            ("root_threshold", e.root_threshold),
            ("child_threshold", e.child_threshold),
        ] {
            if !t.is_finite() || t < 0.0 {
                return Err(StoreError::Config(format!(
                    "engine.{name} must be a non-negative number, got {t}"
                )));
            }
        }
        if self.presign.base_url.is_some() && self.presign.secret.is_empty() {
            return Err(StoreError::Config(
                "presign.secret is required when presign.base_url is set".into(),
            ));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        let e = &self.engine;
        EngineOptions {
            oversample: e.oversample,
            root_threshold: e.root_threshold,
            child_threshold: e.child_threshold,
            metric: e.metric,
            timeout: (e.timeout_ms > 0).then(|| Duration::from_millis(e.timeout_ms)),
        }
    }

    /// Presigner from `[presign]`, or a storage that refuses every request.
    pub fn file_storage(&self) -> Arc<dyn FileStorage> {
        match &self.presign.base_url {
            Some(base) => Arc::new(LocalPresigner::new(
                base,
                &self.presign.secret,
                Duration::from_secs(self.presign.ttl_secs),
            )),
            None => Arc::new(NoFileStorage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let s = Settings::parse("").unwrap();
        let opts = s.engine_options();
        assert_eq!(opts.oversample, OVERSAMPLE);
        assert_eq!(opts.root_threshold, ROOT_THRESHOLD);
        assert!(opts.timeout.is_none());
        assert_eq!(s.http.bind, "127.0.0.1:8787");
    }

    #[test]
    fn test_parse_engine_section() {
        let s = Settings::parse(
            r#"
            [engine]
            oversample = 4
            root_threshold = 0.5
            timeout_ms = 2500
            metric = "dot"
            "#,
        )
        .unwrap();
        let opts = s.engine_options();
        assert_eq!(opts.oversample, 4);
        assert_eq!(opts.root_threshold, 0.5);
        assert_eq!(opts.child_threshold, CHILD_THRESHOLD);
        assert_eq!(opts.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(opts.metric, DistanceMetric::Dot);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Settings::parse("[engine]\noversample = 0").is_err());
        assert!(Settings::parse("[engine]\nroot_threshold = -1.0").is_err());
        assert!(Settings::parse("[engine]\nbogus = 1").is_err());
        assert!(Settings::parse("[presign]\nbase_url = \"http://x\"").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(dir.path()).unwrap();
        assert!(s.presign.base_url.is_none());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[http]\nbind = \"0.0.0.0:9000\"\n[presign]\nbase_url = \"http://img\"\nsecret = \"k\"\n",
        )
        .unwrap();
        let s = Settings::load(dir.path()).unwrap();
        assert_eq!(s.http.bind, "0.0.0.0:9000");
        assert_eq!(s.presign.ttl_secs, 900);
    }
}
