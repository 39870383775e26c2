//! Library housekeeping outside of batch runs.
//!
//! Synchronous helpers a frontend needs around the engine: browsing a
//! directory, summarising what a selection contains, normalising extension
//! case, and finding files by name. None of them touch the progress ledger.
//!
//! Browsing and search are confined to the configured base directory.
//! Paths are compared component-wise after resolving `.` and `..`
//! lexically, so `/data/../etc` and `/data2` both fall outside `/data`.

use crate::formats::{FormatTable, extension_of};
use crate::resolve::{self, walk_files};
use crate::transform::ArgumentError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("{} is outside {}", .path.display(), .base.display())]
    OutsideBase { path: PathBuf, base: PathBuf },
    #[error(transparent)]
    InvalidArgument(#[from] ArgumentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
}

/// One row of a directory listing or search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Always 0 for directories.
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl Entry {
    fn from_metadata(path: PathBuf, meta: &fs::Metadata) -> Self {
        let is_dir = meta.is_dir();
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
            size: if is_dir { 0 } else { meta.len() },
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub current_path: PathBuf,
    pub entries: Vec<Entry>,
}

/// Resolve `.` and `..` without touching the filesystem. Relative paths are
/// taken relative to `base`.
fn normalize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` normalised, if it lies at or below `base`.
pub fn confine(base: &Path, path: &Path) -> Option<PathBuf> {
    let base = normalize(Path::new("/"), base);
    let path = normalize(&base, path);
    path.starts_with(&base).then_some(path)
}

/// Directories and media files directly inside `requested` (or the base
/// directory), directories first, then by name.
///
/// A request outside `base` lists `base` instead.
pub fn list_directory(
    base: &Path,
    requested: Option<&Path>,
    formats: &FormatTable,
) -> Result<Listing, InventoryError> {
    let dir = match requested {
        Some(path) => confine(base, path).unwrap_or_else(|| {
            tracing::warn!(
                path = %path.display(),
                base = %base.display(),
                "Requested path is outside the base directory, listing the base"
            );
            base.to_path_buf()
        }),
        None => base.to_path_buf(),
    };

    let mut entries = Vec::new();
    for dirent in fs::read_dir(&dir)? {
        let Ok(dirent) = dirent else { continue };
        let path = dirent.path();
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if meta.is_dir() || formats.is_media_path(&path) {
            entries.push(Entry::from_metadata(path, &meta));
        }
    }
    entries.sort_by(|a, b| {
        (a.kind != EntryKind::Dir, &a.name).cmp(&(b.kind != EntryKind::Dir, &b.name))
    });

    tracing::debug!(path = %dir.display(), entries = entries.len(), "Listed directory");
    Ok(Listing {
        current_path: dir,
        entries,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormatCount {
    pub count: usize,
    pub size: u64,
}

/// What a selection contains, by extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatStats {
    /// Keyed by lowercase extension; `no_extension` for files without one.
    pub formats: BTreeMap<String, FormatCount>,
    pub total_files: usize,
    pub total_size: u64,
}

pub const NO_EXTENSION: &str = "no_extension";

/// Count every file in the selection, media or not.
pub fn count_formats(paths: &[PathBuf]) -> Result<FormatStats, InventoryError> {
    if paths.is_empty() {
        return Err(ArgumentError::EmptySelection.into());
    }
    let mut stats = FormatStats::default();
    for path in paths.iter().flat_map(|p| walk_files(p)) {
        let ext = extension_of(&path).unwrap_or_else(|| NO_EXTENSION.to_string());
        let size = resolve::file_size(&path);
        let entry = stats.formats.entry(ext).or_default();
        entry.count += 1;
        entry.size += size;
        stats.total_files += 1;
        stats.total_size += size;
    }
    tracing::info!(
        files = stats.total_files,
        bytes = stats.total_size,
        formats = stats.formats.len(),
        "Counted formats"
    );
    Ok(stats)
}

/// Does `dir` hold an entry named exactly `name`? Unlike `Path::exists`
/// this is exact on case-insensitive filesystems, where `a.jpg` "exists"
/// as soon as `a.JPG` does.
fn has_exact_entry(dir: &Path, name: &str) -> Result<bool, InventoryError> {
    for dirent in fs::read_dir(dir)? {
        if dirent?.file_name().to_string_lossy() == name {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Lowercase the extension of every media file in the selection whose
/// extension has uppercase letters. Returns how many files were renamed.
///
/// A rename whose destination already exists is skipped.
pub fn fix_extensions(paths: &[PathBuf], formats: &FormatTable) -> Result<usize, InventoryError> {
    if paths.is_empty() {
        return Err(ArgumentError::EmptySelection.into());
    }
    let mut renamed = 0;
    for path in paths
        .iter()
        .flat_map(|p| resolve::list_supported_files(p, &[], formats))
    {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !ext.chars().any(char::is_uppercase) {
            continue;
        }
        let target = path.with_extension(ext.to_lowercase());
        let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
            continue;
        };
        if has_exact_entry(dir, &name.to_string_lossy())? {
            tracing::warn!(
                from = %path.display(),
                to = %target.display(),
                "Lowercase name already taken, leaving file as is"
            );
            continue;
        }
        fs::rename(&path, &target)?;
        tracing::info!(from = %path.display(), to = %target.display(), "Renamed");
        renamed += 1;
    }
    Ok(renamed)
}

/// Case-insensitive file name search below `root`.
///
/// Matches directories and media files, stopping after `limit` results.
pub fn search(
    base: &Path,
    root: &Path,
    pattern: &str,
    limit: usize,
    formats: &FormatTable,
) -> Result<Vec<Entry>, InventoryError> {
    let root = confine(base, root).ok_or_else(|| InventoryError::OutsideBase {
        path: root.to_path_buf(),
        base: base.to_path_buf(),
    })?;
    let needle = pattern.to_lowercase();

    let mut results = Vec::new();
    let walker = WalkDir::new(&root).min_depth(1).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() > 0 => {
                tracing::warn!(error = %err, "Skipping unreadable entry");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if results.len() >= limit {
            break;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.contains(&needle) {
            continue;
        }
        let is_dir = entry.file_type().is_dir();
        if !is_dir && !formats.is_media_path(entry.path()) {
            continue;
        }
        let meta = entry.metadata()?;
        results.push(Entry::from_metadata(entry.into_path(), &meta));
    }
    Ok(results)
}
