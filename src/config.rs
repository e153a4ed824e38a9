use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub scan: ScanConfig,
}

impl Config {
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading config: {}", path.display()))?;
            let mut cfg: Self = serde_json::from_str(&raw).context("failed parsing config json")?;
            let changed = cfg.apply_defaults();
            if changed {
                cfg.persist(path)?;
            }
            Ok((cfg, false))
        } else {
            let cfg = Self::default_generated();
            cfg.persist(path)?;
            Ok((cfg, true))
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating config dir: {}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(self).context("failed serializing config")?;
        fs::write(path, content)
            .with_context(|| format!("failed writing config: {}", path.display()))?;
        Ok(())
    }

    pub fn apply_defaults(&mut self) -> bool {
        let mut changed = false;

        if self.api.bind.trim().is_empty() {
            self.api.bind = default_bind();
            changed = true;
        }
        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
            changed = true;
        }
        if self.scan.workers == 0 {
            self.scan.workers = default_workers();
            changed = true;
        }
        if self.scan.ffprobe_path.trim().is_empty() {
            self.scan.ffprobe_path = default_ffprobe_path();
            changed = true;
        }

        changed
    }

    fn default_generated() -> Self {
        Self {
            api: ApiConfig {
                bind: default_bind(),
            },
            data_dir: default_data_dir(),
            scan: ScanConfig::default(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8780".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_workers() -> usize {
    crate::scanner::DEFAULT_WORKERS
}

fn default_ffprobe_path() -> String {
    crate::probe::DEFAULT_FFPROBE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_config_has_defaults() {
        let cfg = Config::default_generated();
        assert_eq!(cfg.api.bind, "0.0.0.0:8780");
        assert_eq!(cfg.data_dir, "data");
        assert_eq!(cfg.scan.workers, 20);
        assert_eq!(cfg.scan.ffprobe_path, "ffprobe");
    }

    #[test]
    fn apply_defaults_fills_blanks() {
        let mut cfg = Config::default_generated();
        cfg.data_dir.clear();
        cfg.scan.workers = 0;
        assert!(cfg.apply_defaults());
        assert_eq!(cfg.data_dir, "data");
        assert_eq!(cfg.scan.workers, 20);
        assert!(!cfg.apply_defaults());
    }

    #[test]
    fn load_or_create_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("camscout.json");

        let (created, was_new) = Config::load_or_create(&path).unwrap();
        assert!(was_new);
        assert!(path.exists());

        let (loaded, was_new) = Config::load_or_create(&path).unwrap();
        assert!(!was_new);
        assert_eq!(loaded.api.bind, created.api.bind);
    }

    #[test]
    fn partial_config_json_gets_section_defaults() {
        let cfg: Config =
            serde_json::from_value(serde_json::json!({ "api": { "bind": "127.0.0.1:9000" } }))
                .unwrap();
        assert_eq!(cfg.api.bind, "127.0.0.1:9000");
        assert_eq!(cfg.data_dir, "data");
        assert_eq!(cfg.scan.workers, 20);
    }
}
