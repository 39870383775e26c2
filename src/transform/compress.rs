//! In-place compression.
//!
//! Each format maps to one [`Strategy`]: a tool plus a function building its
//! argument list. Specialised tools are preferred when they were found at
//! startup; everything else goes through ImageMagick.
//!
//! | Format | Preferred | Fallback |
//! |---|---|---|
//! | JPEG | `jpegoptim --max=Q` (in place) | `magick -quality Q` |
//! | PNG | `pngquant --quality=0-Q` | `magick -quality Q` |
//! | WebP | `cwebp -q Q` | `magick -quality Q` |
//! | others | — | `magick -quality Q` |
//!
//! Tools that cannot rewrite in place write to a hidden sibling file which
//! then replaces the source with a rename, so a failed or killed tool never
//! leaves a truncated original behind.

use super::backend::{BackendError, Outcome, TransformBackend};
use super::params::{Operation, Quality, WorkItem};
use super::tools::{CWEBP, JPEGOPTIM, MAGICK, PNGQUANT, ToolAvailability, ToolRunner, run_checked};
use crate::formats::FormatTable;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrite {
    /// The tool edits the source file itself.
    InPlace,
    /// The tool writes a new file that replaces the source.
    ViaTemp,
}

/// How to compress one format.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub tool: &'static str,
    rewrite: Rewrite,
    /// `(source, output, quality)` → arguments. For in-place tools the
    /// output equals the source.
    args: fn(&Path, &Path, Quality) -> Vec<OsString>,
}

const JPEGOPTIM_STRATEGY: Strategy = Strategy {
    tool: JPEGOPTIM,
    rewrite: Rewrite::InPlace,
    args: |source, _, quality| {
        vec![
            "--quiet".into(),
            "--preserve".into(),
            format!("--max={quality}").into(),
            source.into(),
        ]
    },
};

const PNGQUANT_STRATEGY: Strategy = Strategy {
    tool: PNGQUANT,
    rewrite: Rewrite::ViaTemp,
    args: |source, output, quality| {
        vec![
            "--force".into(),
            format!("--quality=0-{quality}").into(),
            "--output".into(),
            output.into(),
            "--".into(),
            source.into(),
        ]
    },
};

const CWEBP_STRATEGY: Strategy = Strategy {
    tool: CWEBP,
    rewrite: Rewrite::ViaTemp,
    args: |source, output, quality| {
        vec![
            "-quiet".into(),
            "-q".into(),
            quality.to_string().into(),
            source.into(),
            "-o".into(),
            output.into(),
        ]
    },
};

const MAGICK_STRATEGY: Strategy = Strategy {
    tool: MAGICK,
    rewrite: Rewrite::ViaTemp,
    args: |source, output, quality| {
        vec![
            source.into(),
            "-quality".into(),
            quality.to_string().into(),
            output.into(),
        ]
    },
};

/// Specialised strategy for a canonical extension, if one exists.
fn specialised(canonical_ext: &str) -> Option<Strategy> {
    match canonical_ext {
        "jpg" | "jpeg" => Some(JPEGOPTIM_STRATEGY),
        "png" => Some(PNGQUANT_STRATEGY),
        "webp" => Some(CWEBP_STRATEGY),
        _ => None,
    }
}

/// Hidden sibling that receives tool output before replacing the source.
///
/// Keeps the extension so tools infer the output format from the name.
pub(crate) fn temp_sibling(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!(".{stem}.media-batch-tmp.{}", ext.to_string_lossy()),
        None => format!(".{stem}.media-batch-tmp"),
    };
    source.with_file_name(name)
}

/// Rewrites files in place at a given quality.
pub struct CompressBackend {
    tools: Arc<dyn ToolRunner>,
    formats: FormatTable,
    /// Canonical extension → strategy, fixed at construction.
    table: HashMap<String, Strategy>,
    timeout: Duration,
}

impl CompressBackend {
    /// Resolve the strategy table from the startup probe.
    pub fn new(
        tools: Arc<dyn ToolRunner>,
        availability: &ToolAvailability,
        formats: &FormatTable,
        timeout: Duration,
    ) -> Self {
        let fallback = availability
            .is_available(MAGICK)
            .then_some(MAGICK_STRATEGY);
        let mut table = HashMap::new();
        for ext in formats.supported() {
            let canonical = formats.canonical(ext);
            let chosen = specialised(&canonical)
                .filter(|s| availability.is_available(s.tool))
                .or(fallback);
            match chosen {
                Some(strategy) => {
                    table.insert(canonical, strategy);
                }
                None => tracing::warn!(ext = %canonical, "No compression tool available"),
            }
        }
        Self {
            tools,
            formats: formats.clone(),
            table,
            timeout,
        }
    }

    /// The strategy that will be used for `ext`, if any.
    pub fn strategy_for(&self, ext: &str) -> Option<&Strategy> {
        self.table.get(&self.formats.canonical(ext))
    }

    fn rewrite(&self, strategy: &Strategy, source: &Path, quality: Quality) -> Result<(), BackendError> {
        match strategy.rewrite {
            Rewrite::InPlace => {
                let args = (strategy.args)(source, source, quality);
                run_checked(self.tools.as_ref(), strategy.tool, &args, self.timeout)?;
                Ok(())
            }
            Rewrite::ViaTemp => {
                let temp = temp_sibling(source);
                let args = (strategy.args)(source, &temp, quality);
                let result = run_checked(self.tools.as_ref(), strategy.tool, &args, self.timeout)
                    .and_then(|_| {
                        if temp.is_file() {
                            Ok(())
                        } else {
                            Err(BackendError::UnexpectedOutput(format!(
                                "{} produced no output for {}",
                                strategy.tool,
                                source.display()
                            )))
                        }
                    })
                    .and_then(|_| fs::rename(&temp, source).map_err(BackendError::from));
                if result.is_err() {
                    let _ = fs::remove_file(&temp);
                }
                result
            }
        }
    }
}

impl TransformBackend for CompressBackend {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn apply(&self, item: &WorkItem) -> Result<Outcome, BackendError> {
        let Operation::Compress { quality } = item.operation else {
            return Err(BackendError::WrongOperation(self.name()));
        };
        let strategy = self
            .strategy_for(&item.ext)
            .ok_or_else(|| BackendError::ToolUnavailable(item.ext.clone()))?;

        tracing::debug!(path = %item.path.display(), tool = strategy.tool, %quality, "Compressing");
        self.rewrite(strategy, &item.path, quality)?;

        let final_size = fs::metadata(&item.path)?.len();
        Ok(Outcome::Success { final_size })
    }
}
