//! Engine configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user `config.toml` only needs the keys it wants to
//! change. Command-line flags override the merged result per invocation.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! base_dir = "/data"          # Root that listing and search are confined to
//!
//! [processing]
//! max_workers = 4             # Parallel workers per batch (1-32)
//! tool_timeout_secs = 30      # Per-invocation limit for external tools
//!
//! [compress]
//! quality = 80                # 1-100
//! min_size = 0                # Files at or below this many bytes are left alone
//!
//! [convert]
//! target_format = "jpg"
//! quality = 99                # 1-100
//! skip_pdf_like_inputs = false
//!
//! [formats]
//! supported = ["jpg", "jpeg", "png", "webp", "avif", "heic", "bmp", "gif", "tiff", "tif"]
//! pdf_like = ["pdf"]
//! aliases = [["jpg", "jpeg"], ["tif", "tiff"]]
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::formats::{DEFAULT_ALIASES, DEFAULT_PDF_LIKE, DEFAULT_SUPPORTED, FormatTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Bounds on the worker pool size accepted from config or the command line.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Root directory that listing and search stay inside.
    pub base_dir: PathBuf,
    /// Worker pool and external tool limits.
    pub processing: ProcessingConfig,
    /// Defaults for compression batches.
    pub compress: CompressConfig,
    /// Defaults for conversion batches.
    pub convert: ConvertConfig,
    /// Which extensions count as media, and which spellings are equivalent.
    pub formats: FormatsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/data"),
            processing: ProcessingConfig::default(),
            compress: CompressConfig::default(),
            convert: ConvertConfig::default(),
            formats: FormatsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let workers = self.processing.max_workers;
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(ConfigError::Validation(format!(
                "processing.max_workers must be {MIN_WORKERS}-{MAX_WORKERS}, got {workers}"
            )));
        }
        if self.processing.tool_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "processing.tool_timeout_secs must be non-zero".into(),
            ));
        }
        for (key, quality) in [
            ("compress.quality", self.compress.quality),
            ("convert.quality", self.convert.quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::Validation(format!(
                    "{key} must be 1-100, got {quality}"
                )));
            }
        }
        if self.formats.supported.is_empty() {
            return Err(ConfigError::Validation(
                "formats.supported must not be empty".into(),
            ));
        }
        if self.formats.aliases.iter().any(|group| group.is_empty()) {
            return Err(ConfigError::Validation(
                "formats.aliases groups must not be empty".into(),
            ));
        }
        let table = self.formats.table();
        if !table.is_media(&self.convert.target_format) {
            return Err(ConfigError::Validation(format!(
                "convert.target_format '{}' is not a supported format",
                self.convert.target_format
            )));
        }
        Ok(())
    }
}

/// Worker pool and external tool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Number of items transformed concurrently.
    pub max_workers: usize,
    /// Seconds an external tool may run before it is killed and the item fails.
    pub tool_timeout_secs: u64,
}

impl ProcessingConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            tool_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressConfig {
    pub quality: u32,
    /// Files whose size is at or below this many bytes are excluded.
    pub min_size: u64,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            quality: 80,
            min_size: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    pub target_format: String,
    pub quality: u32,
    /// Leave multi-page documents out of conversion batches entirely.
    pub skip_pdf_like_inputs: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            target_format: "jpg".to_string(),
            quality: 99,
            skip_pdf_like_inputs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatsConfig {
    pub supported: Vec<String>,
    pub pdf_like: Vec<String>,
    pub aliases: Vec<Vec<String>>,
}

impl FormatsConfig {
    pub fn table(&self) -> FormatTable {
        FormatTable::new(&self.supported, &self.pdf_like, &self.aliases)
    }
}

impl Default for FormatsConfig {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            supported: owned(DEFAULT_SUPPORTED),
            pdf_like: owned(DEFAULT_PDF_LIKE),
            aliases: DEFAULT_ALIASES.iter().map(|group| owned(group)).collect(),
        }
    }
}

/// Clamp a requested worker count into the accepted pool size range.
pub fn bounded_workers(requested: usize) -> usize {
    requested.clamp(MIN_WORKERS, MAX_WORKERS)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(EngineConfig::default()).expect("default config must serialize")
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

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<EngineConfig, ConfigError> {
    let merged = match load_raw_config(dir)? {
        Some(overlay) => merge_toml(stock_defaults_value(), overlay),
        None => stock_defaults_value(),
    };
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# media-batch configuration
# =========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Directory that `list` and `search` are confined to.
base_dir = "/data"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Files transformed in parallel per batch (1-32).
max_workers = 4

# Seconds an external tool may run on one file before it is killed and the
# file is recorded as failed.
tool_timeout_secs = 30

# ---------------------------------------------------------------------------
# Compression (rewrites files in place)
# ---------------------------------------------------------------------------
[compress]
# Encoder quality, 1 (smallest) - 100 (best).
quality = 80

# Files at or below this size in bytes are left untouched.
min_size = 0

# ---------------------------------------------------------------------------
# Conversion (writes a new file, removes the original on success)
# ---------------------------------------------------------------------------
[convert]
target_format = "jpg"
quality = 99

# Leave PDF-like documents out of conversion batches. When false, each page
# of such a document becomes its own image and the document is kept.
skip_pdf_like_inputs = false

# ---------------------------------------------------------------------------
# Formats
# ---------------------------------------------------------------------------
[formats]
supported = ["jpg", "jpeg", "png", "webp", "avif", "heic", "bmp", "gif", "tiff", "tif"]
pdf_like = ["pdf"]

# Spellings of the same format. Files already in the target format under any
# spelling are not converted.
aliases = [["jpg", "jpeg"], ["tif", "tiff"]]
"##
}
