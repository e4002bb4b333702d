//! Build configuration.
//!
//! Handles loading, validating, and merging `pagesmith.toml`. The file is
//! optional and sparse: stock defaults are the base layer and the user file
//! overrides only the keys it names. Command-line flags are applied on top by
//! the binary.
//!
//! ## Config File Location
//!
//! ```text
//! site/
//! ├── pagesmith.toml        # Optional, never part of the built site
//! ├── README.md
//! └── ...
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! dest = "public"           # Output directory, relative to the source root
//! ignore = []               # Extra gitignore-style patterns
//! copy = []                 # Directories whose contents are copied into dest
//!
//! [markdown]
//! pretty_urls = true        # Rewrite `notes.md` links to `notes/`; `false` gives `notes.html`
//! heading_anchors = true    # Give headings slug ids
//!
//! [serve]
//! interface = "127.0.0.1"   # Dev server bind address
//! port = 8080               # Dev server port (next free port is tried on conflict)
//!
//! [processing]
//! max_threads = 4           # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Name of the optional config file at the source root.
pub const CONFIG_FILE: &str = "pagesmith.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `pagesmith.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Output directory. Relative paths resolve against the source root.
    pub dest: String,
    /// Extra ignore patterns, applied after the built-in ones.
    pub ignore: Vec<String>,
    /// Directories whose contents are copied into the output root.
    pub copy: Vec<String>,
    pub markdown: MarkdownConfig,
    pub serve: ServeConfig,
    pub processing: ProcessingConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dest: "public".to_string(),
            ignore: Vec::new(),
            copy: Vec::new(),
            markdown: MarkdownConfig::default(),
            serve: ServeConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl BuildConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dest.trim().is_empty() {
            return Err(ConfigError::Validation("dest must not be empty".into()));
        }
        if self.serve.interface.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "serve.interface `{}` is not an IP address",
                self.serve.interface
            )));
        }
        if self.processing.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The output directory for a source root.
    pub fn dest_path(&self, src: &Path) -> PathBuf {
        normalize(&src.join(&self.dest))
    }

    /// The copy directories for a source root.
    pub fn copy_paths(&self, src: &Path) -> Vec<PathBuf> {
        self.copy.iter().map(|dir| normalize(&src.join(dir))).collect()
    }
}

/// Resolve `.` and `..` lexically, so `src/../shared` does not look like it
/// sits inside `src`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let climbs = matches!(
                    out.components().next_back(),
                    None | Some(Component::ParentDir)
                );
                if climbs || !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Markdown rendering switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkdownConfig {
    /// Rewrite relative `.md` links to `name/` instead of `name.html`.
    pub pretty_urls: bool,
    pub heading_anchors: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            pretty_urls: true,
            heading_anchors: true,
        }
    }
}

/// Development server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    pub interface: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            interface: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers for page and asset work.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(BuildConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `pagesmith.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<BuildConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BuildConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `pagesmith.toml` in the source root.
pub fn load_config(root: &Path) -> Result<BuildConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}
