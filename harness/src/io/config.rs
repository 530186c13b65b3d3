//! Target configuration stored as `config.toml` next to the tests root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::session::SessionOptions;

/// Configuration of the system under test (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL of the application under test.
    pub base_url: String,

    /// Login credentials seeded into every fresh run context.
    pub username: String,
    pub password: String,

    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub record_video: bool,

    /// Root directory of the test tree.
    pub tests_root: PathBuf,

    /// Retained run records per category; oldest pruned beyond this.
    pub max_runs_per_category: usize,

    /// Hold the session open behind the operator gate on any failure.
    pub keep_open_on_failure: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            username: String::new(),
            password: String::new(),
            headless: false,
            viewport_width: 1920,
            viewport_height: 1080,
            record_video: true,
            tests_root: PathBuf::from("tests"),
            max_runs_per_category: 10,
            keep_open_on_failure: false,
        }
    }
}

impl TargetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("base_url must be non-empty"));
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(anyhow!("viewport dimensions must be > 0"));
        }
        if self.max_runs_per_category == 0 {
            return Err(anyhow!("max_runs_per_category must be > 0"));
        }
        if self.tests_root.as_os_str().is_empty() {
            return Err(anyhow!("tests_root must be non-empty"));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            headless: self.headless,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            record_video: self.record_video,
        }
    }

    /// Copy safe to persist inside run records and heal documents. The
    /// password never reaches disk through this path.
    pub fn sanitized(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "********".to_string();
        }
        copy
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TargetConfig::default()`.
pub fn load_config(path: &Path) -> Result<TargetConfig> {
    if !path.exists() {
        let cfg = TargetConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TargetConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TargetConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
