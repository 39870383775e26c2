//! Format conversion.
//!
//! `photo.png` converted to `jpg` becomes `photo.jpg` next to it. The source
//! is deleted only after the new file is confirmed on disk and is not the
//! source itself. If the destination already exists nothing is written and
//! the item is reported as [`Outcome::SkippedExisting`], which is what makes
//! re-running an interrupted batch safe.
//!
//! Tools never write the destination directly. They write a hidden staging
//! sibling, which is then hard-linked into place; the link fails if the name
//! is taken, so two sources that map to the same output (`a.png` and `a.bmp`
//! both becoming `a.jpg`) cannot overwrite each other. The loser keeps its
//! source and reports [`Outcome::SkippedExisting`].
//!
//! PDF-like inputs expand into one image per page:
//!
//! ```text
//! scan.pdf  →  scan-1.jpg, scan-2.jpg, scan-3.jpg   (scan.pdf is kept)
//! ```
//!
//! The page count comes from `magick identify`, and each page is rendered
//! by its own invocation, so the output list is known exactly rather than
//! rediscovered by scanning the directory afterwards.

use super::backend::{BackendError, Outcome, TransformBackend};
use super::params::{InputKind, Operation, Quality, TargetFormat, WorkItem};
use super::tools::{CWEBP, MAGICK, ToolAvailability, ToolRunner, run_checked};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Render resolution for document pages, in DPI.
const PAGE_DENSITY: u32 = 150;

/// Where a converted single image goes.
pub fn output_path(source: &Path, target: &TargetFormat) -> PathBuf {
    source.with_extension(target.extension())
}

/// Where page `index` (zero-based) of a document goes.
pub fn page_output_path(source: &Path, index: usize, target: &TargetFormat) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{stem}-{}.{}", index + 1, target.extension()))
}

/// Hidden file the tool writes before the result is claimed at `output`.
///
/// Named after both ends, so concurrent sources never share a staging file.
/// Keeps the output's extension, which is how the tools pick the encoder.
fn staging_path(source: &Path, output: &Path) -> PathBuf {
    let source_name = source.file_name().unwrap_or_default().to_string_lossy();
    let output_name = output.file_name().unwrap_or_default().to_string_lossy();
    output.with_file_name(format!(".{source_name}.media-batch-tmp.{output_name}"))
}

/// Move `staged` to `output` unless `output` already exists.
///
/// Returns `false`, with the staging file removed, when the name was taken.
fn claim(staged: &Path, output: &Path) -> io::Result<bool> {
    match fs::hard_link(staged, output) {
        Ok(()) => {
            fs::remove_file(staged)?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(staged);
            Ok(false)
        }
        // No hard links on this filesystem: reserve the name, then replace
        // the empty placeholder.
        Err(_) => match OpenOptions::new().write(true).create_new(true).open(output) {
            Ok(_) => fs::rename(staged, output).map(|()| true),
            Err(err) => {
                let _ = fs::remove_file(staged);
                if err.kind() == io::ErrorKind::AlreadyExists {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        },
    }
}

/// Writes each input in the target format.
pub struct ConvertBackend {
    tools: Arc<dyn ToolRunner>,
    has_magick: bool,
    has_cwebp: bool,
    timeout: Duration,
}

impl ConvertBackend {
    pub fn new(tools: Arc<dyn ToolRunner>, availability: &ToolAvailability, timeout: Duration) -> Self {
        Self {
            tools,
            has_magick: availability.is_available(MAGICK),
            has_cwebp: availability.is_available(CWEBP),
            timeout,
        }
    }

    fn run(&self, tool: &str, args: &[OsString]) -> Result<(), BackendError> {
        run_checked(self.tools.as_ref(), tool, args, self.timeout).map(|_| ())
    }

    fn require_magick(&self) -> Result<(), BackendError> {
        if self.has_magick {
            Ok(())
        } else {
            Err(BackendError::ToolUnavailable(MAGICK.to_string()))
        }
    }

    /// Arguments for ImageMagick writing `input` to `output`.
    fn magick_args(input: OsString, output: &Path, target: &TargetFormat, quality: Quality) -> Vec<OsString> {
        let mut args = vec![input];
        if target.is_jpeg() {
            // JPEG cannot carry alpha; composite onto white instead of black.
            args.extend(["-background", "white", "-alpha", "remove", "-alpha", "off"].map(OsString::from));
        }
        args.extend([
            OsString::from("-quality"),
            quality.to_string().into(),
            output.into(),
        ]);
        args
    }

    fn write_image(&self, item: &WorkItem, output: &Path, target: &TargetFormat, quality: Quality) -> Result<(), BackendError> {
        let cwebp_can_read = matches!(item.ext.as_str(), "jpg" | "jpeg" | "png" | "tif" | "tiff" | "webp");
        if target.extension() == "webp" && self.has_cwebp && cwebp_can_read {
            let args: Vec<OsString> = vec![
                "-quiet".into(),
                "-q".into(),
                quality.to_string().into(),
                item.path.clone().into(),
                "-o".into(),
                output.into(),
            ];
            return self.run(CWEBP, &args);
        }
        self.require_magick()?;
        self.run(MAGICK, &Self::magick_args(item.path.clone().into(), output, target, quality))
    }

    fn convert_image(&self, item: &WorkItem, target: &TargetFormat, quality: Quality) -> Result<Outcome, BackendError> {
        let output = output_path(&item.path, target);
        if output == item.path || output.exists() {
            return Ok(Outcome::SkippedExisting { existing: output });
        }

        let staged = staging_path(&item.path, &output);
        if let Err(err) = self.write_image(item, &staged, target, quality) {
            let _ = fs::remove_file(&staged);
            return Err(err);
        }
        if !staged.is_file() {
            return Err(BackendError::UnexpectedOutput(format!(
                "no output written for {}",
                item.path.display()
            )));
        }

        let final_size = fs::metadata(&staged)?.len();
        if !claim(&staged, &output)? {
            tracing::debug!(path = %item.path.display(), output = %output.display(), "Output claimed by another item");
            return Ok(Outcome::SkippedExisting { existing: output });
        }
        fs::remove_file(&item.path)?;
        tracing::debug!(from = %item.path.display(), to = %output.display(), "Converted");
        Ok(Outcome::Success { final_size })
    }

    fn page_count(&self, source: &Path) -> Result<usize, BackendError> {
        let args: Vec<OsString> = vec![
            "identify".into(),
            "-format".into(),
            "%n\n".into(),
            source.into(),
        ];
        let output = run_checked(self.tools.as_ref(), MAGICK, &args, self.timeout)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                BackendError::UnexpectedOutput(format!(
                    "could not read page count of {}: {:?}",
                    source.display(),
                    stdout.trim()
                ))
            })
    }

    /// Render one page and claim `output`. `false` if the name was taken.
    fn render_page(
        &self,
        item: &WorkItem,
        index: usize,
        output: &Path,
        target: &TargetFormat,
        quality: Quality,
    ) -> Result<bool, BackendError> {
        let staged = staging_path(&item.path, output);
        let mut page = item.path.clone().into_os_string();
        page.push(format!("[{index}]"));
        let mut args: Vec<OsString> = vec!["-density".into(), PAGE_DENSITY.to_string().into()];
        args.extend(Self::magick_args(page, &staged, target, quality));
        if let Err(err) = self.run(MAGICK, &args) {
            let _ = fs::remove_file(&staged);
            return Err(err);
        }
        if !staged.is_file() {
            return Err(BackendError::UnexpectedOutput(format!(
                "no page {} written for {}",
                index + 1,
                item.path.display()
            )));
        }
        Ok(claim(&staged, output)?)
    }

    fn expand_pages(&self, item: &WorkItem, target: &TargetFormat, quality: Quality) -> Result<Outcome, BackendError> {
        self.require_magick()?;
        let pages = self.page_count(&item.path)?;

        let mut outputs = Vec::with_capacity(pages);
        let mut total_final_size = 0;
        let mut already_present = 0;
        for index in 0..pages {
            let output = page_output_path(&item.path, index, target);
            if output.exists() || !self.render_page(item, index, &output, target, quality)? {
                already_present += 1;
            }
            total_final_size += fs::metadata(&output)?.len();
            outputs.push(output);
        }

        if already_present == pages {
            return Ok(Outcome::SkippedExisting {
                existing: outputs.swap_remove(0),
            });
        }
        tracing::debug!(path = %item.path.display(), pages, "Expanded document");
        Ok(Outcome::SuccessExpanded {
            outputs,
            total_final_size,
        })
    }
}

impl TransformBackend for ConvertBackend {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn apply(&self, item: &WorkItem) -> Result<Outcome, BackendError> {
        let Operation::Convert { target, quality } = &item.operation else {
            return Err(BackendError::WrongOperation(self.name()));
        };
        match item.kind {
            InputKind::Image => self.convert_image(item, target, *quality),
            InputKind::PdfLike => self.expand_pages(item, target, *quality),
        }
    }
}
