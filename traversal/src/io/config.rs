//! CLI configuration stored under `.traversal/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".traversal/config.toml";

/// Traversal CLI configuration (TOML).
///
/// Missing fields default to the values in [`TraversalConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TraversalConfig {
    /// Stop pulling after this many outputs. A query file's `limit` overrides it.
    pub max_outputs: usize,

    /// Print the side-effect context as a final JSON line after the outputs.
    pub print_side_effects: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_outputs: 10_000,
            print_side_effects: false,
        }
    }
}

impl TraversalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_outputs == 0 {
            return Err(anyhow!("max_outputs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TraversalConfig::default()`.
pub fn load_config(path: &Path) -> Result<TraversalConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = TraversalConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TraversalConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TraversalConfig) -> Result<()> {
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
