//! Parameter types for transformation work.
//!
//! These structs describe *what* to do to one file, not *how*. A
//! [`WorkItem`] is produced by the resolver, handed to exactly one worker,
//! and interpreted by a [`TransformBackend`](super::TransformBackend).
//!
//! ## Types
//!
//! - [`Quality`] — Lossy encoding quality (1–100). Rejected, not clamped, when out of range.
//! - [`TargetFormat`] — A conversion target, validated against the format table.
//! - [`Operation`] — Compress in place, or convert to a target format.
//! - [`WorkItem`] — One input file plus everything needed to transform it.

use crate::formats::FormatTable;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Caller contract violations, rejected before any batch starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("quality must be between 1 and 100, got {0}")]
    QualityOutOfRange(u32),
    #[error("unknown target format: {0}")]
    UnknownFormat(String),
    #[error("no files or folders selected")]
    EmptySelection,
}

/// Quality setting for lossy encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Result<Self, ArgumentError> {
        if (1..=100).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ArgumentError::QualityOutOfRange(value))
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output format of a conversion.
///
/// Keeps the caller's spelling (lowercased) for output file names, so asking
/// for `jpeg` produces `photo.jpeg` while still treating existing `.jpg`
/// files as already converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFormat {
    ext: String,
}

impl TargetFormat {
    pub fn parse(name: &str, formats: &FormatTable) -> Result<Self, ArgumentError> {
        let ext = name.trim().trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() || !formats.is_media(&ext) {
            return Err(ArgumentError::UnknownFormat(name.to_string()));
        }
        Ok(Self { ext })
    }

    pub fn extension(&self) -> &str {
        &self.ext
    }

    /// JPEG has no alpha channel; transparent sources must be flattened.
    pub fn is_jpeg(&self) -> bool {
        matches!(self.ext.as_str(), "jpg" | "jpeg" | "jpe")
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ext)
    }
}

/// What a batch does to each of its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Rewrite the file in place at the given quality.
    Compress { quality: Quality },
    /// Write a new file in the target format and remove the source.
    Convert {
        target: TargetFormat,
        quality: Quality,
    },
}

/// How the backend should treat an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A single image.
    Image,
    /// A multi-page document that converts into one image per page.
    PdfLike,
}

/// One input file queued for a single transformation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    /// Lowercased extension without the dot.
    pub ext: String,
    pub kind: InputKind,
    /// Size in bytes when the item was resolved.
    pub size: u64,
    pub operation: Operation,
}
