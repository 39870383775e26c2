//! Work item resolution.
//!
//! Turns a user selection (files and directories, mixed) into the concrete
//! list of [`WorkItem`]s a batch will process, plus a count of files that
//! were selected but filtered out up front. Directories are expanded
//! recursively with `walkdir`.
//!
//! ## Filtering
//!
//! | Rule | Applies to | Effect |
//! |---|---|---|
//! | extension not in the format table | both | not a candidate, not counted |
//! | size at or below `min_size` | compress | excluded |
//! | already in the target format (aliases apply) | convert | excluded |
//! | PDF-like input with `skip_pdf_like` | convert | excluded |
//! | PDF-like input | compress | not a candidate |
//!
//! "Excluded" files count toward the batch total so a progress bar fills
//! completely even when nothing needed transforming.
//!
//! Unreadable directories are logged and skipped; they never fail the
//! whole resolution.

use crate::formats::{FormatTable, extension_of};
use crate::transform::{InputKind, Operation, WorkItem};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Operation-specific selection rules.
#[derive(Debug, Clone)]
pub struct Filter {
    pub formats: FormatTable,
    pub operation: Operation,
    /// Compression only: files at or below this many bytes are excluded.
    pub min_size: u64,
    /// Conversion only: leave multi-page documents out of the batch.
    pub skip_pdf_like: bool,
}

impl Filter {
    pub fn compress(formats: FormatTable, operation: Operation, min_size: u64) -> Self {
        Self {
            formats,
            operation,
            min_size,
            skip_pdf_like: false,
        }
    }

    pub fn convert(formats: FormatTable, operation: Operation, skip_pdf_like: bool) -> Self {
        Self {
            formats,
            operation,
            min_size: 0,
            skip_pdf_like,
        }
    }

    fn classify(&self, path: &Path, ext: &str) -> Verdict {
        let is_pdf_like = self.formats.is_pdf_like(ext);
        if !is_pdf_like && !self.formats.is_media(ext) {
            return Verdict::Ignore;
        }
        match &self.operation {
            Operation::Compress { .. } => {
                if is_pdf_like {
                    return Verdict::Ignore;
                }
                let size = file_size(path);
                if size <= self.min_size {
                    Verdict::Exclude
                } else {
                    Verdict::Keep(InputKind::Image, size)
                }
            }
            Operation::Convert { target, .. } => {
                if is_pdf_like {
                    if self.skip_pdf_like {
                        Verdict::Exclude
                    } else {
                        Verdict::Keep(InputKind::PdfLike, file_size(path))
                    }
                } else if self.formats.same_format(ext, target.extension()) {
                    Verdict::Exclude
                } else {
                    Verdict::Keep(InputKind::Image, file_size(path))
                }
            }
        }
    }
}

enum Verdict {
    Keep(InputKind, u64),
    Exclude,
    Ignore,
}

/// The worklist for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub items: Vec<WorkItem>,
    /// Candidate files filtered out before dispatch.
    pub excluded: usize,
}

/// Expand `paths` into work items.
///
/// A file reachable through several selected paths (e.g. a folder and a
/// file inside it) is only queued once.
pub fn resolve(paths: &[PathBuf], filter: &Filter) -> Resolution {
    let mut resolution = Resolution::default();
    let mut seen = HashSet::new();

    for path in paths.iter().flat_map(|p| walk_files(p)) {
        let Some(ext) = extension_of(&path) else {
            continue;
        };
        if !seen.insert(path.clone()) {
            continue;
        }
        match filter.classify(&path, &ext) {
            Verdict::Keep(kind, size) => resolution.items.push(WorkItem {
                path,
                ext,
                kind,
                size,
                operation: filter.operation.clone(),
            }),
            Verdict::Exclude => resolution.excluded += 1,
            Verdict::Ignore => {}
        }
    }

    tracing::debug!(
        items = resolution.items.len(),
        excluded = resolution.excluded,
        "Resolved selection"
    );
    resolution
}

/// Every regular file at or below `path`. Symlinks are not followed.
pub(crate) fn walk_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    if !path.is_dir() {
        tracing::warn!(path = %path.display(), "Selected path does not exist");
        return Vec::new();
    }
    WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(
                    path = %err.path().unwrap_or(path).display(),
                    error = %err,
                    "Skipping unreadable entry"
                );
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Supported media files under `root`, minus any whose format matches one of
/// `exclude_formats` (aliases apply).
pub fn list_supported_files(
    root: &Path,
    exclude_formats: &[&str],
    formats: &FormatTable,
) -> Vec<PathBuf> {
    walk_files(root)
        .into_iter()
        .filter(|path| match extension_of(path) {
            Some(ext) => {
                formats.is_media(&ext)
                    && !exclude_formats
                        .iter()
                        .any(|excluded| formats.same_format(&ext, excluded))
            }
            None => false,
        })
        .collect()
}

/// Size of `path` in bytes, or 0 if it cannot be read.
pub fn file_size(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Cannot read file size");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Quality, TargetFormat};
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, bytes: usize) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    fn compress_filter(min_size: u64) -> Filter {
        Filter::compress(
            FormatTable::default(),
            Operation::Compress {
                quality: Quality::new(80).unwrap(),
            },
            min_size,
        )
    }

    fn convert_filter(to: &str, skip_pdf_like: bool) -> Filter {
        let formats = FormatTable::default();
        let target = TargetFormat::parse(to, &formats).unwrap();
        Filter::convert(
            formats,
            Operation::Convert {
                target,
                quality: Quality::new(90).unwrap(),
            },
            skip_pdf_like,
        )
    }

    fn names(resolution: &Resolution) -> Vec<String> {
        let mut names: Vec<String> = resolution
            .items
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    // =========================================================================
    // Expansion
    // =========================================================================

    #[test]
    fn directories_expand_recursively() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.jpg", 10);
        write(tmp.path(), "nested/deeper/b.PNG", 10);
        write(tmp.path(), "nested/notes.txt", 10);

        let resolution = resolve(&[tmp.path().to_path_buf()], &compress_filter(0));

        assert_eq!(names(&resolution), vec!["a.jpg", "b.PNG"]);
        assert_eq!(resolution.excluded, 0);
        let png = resolution.items.iter().find(|i| i.ext == "png").unwrap();
        assert_eq!(png.size, 10);
        assert_eq!(png.kind, InputKind::Image);
    }

    #[test]
    fn overlapping_selection_is_deduplicated() {
        let tmp = TempDir::new().unwrap();
        let file = write(tmp.path(), "a.jpg", 10);

        let resolution = resolve(&[tmp.path().to_path_buf(), file], &compress_filter(0));

        assert_eq!(resolution.items.len(), 1);
    }

    #[test]
    fn unsupported_only_selection_is_empty() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "readme.md", 10);
        write(tmp.path(), "data.csv", 10);
        write(tmp.path(), "Makefile", 10);

        let resolution = resolve(&[tmp.path().to_path_buf()], &compress_filter(0));

        assert!(resolution.items.is_empty());
        assert_eq!(resolution.excluded, 0);
    }

    #[test]
    fn missing_path_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.jpg", 10);
        let resolution = resolve(
            &[tmp.path().join("gone"), tmp.path().to_path_buf()],
            &compress_filter(0),
        );
        assert_eq!(resolution.items.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_excludes_only_its_subtree() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "ok/a.jpg", 10);
        write(tmp.path(), "locked/b.jpg", 10);
        let locked = tmp.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root reads through mode 000, which leaves nothing to observe.
        let really_locked = fs::read_dir(&locked).is_err();

        let resolution = resolve(&[tmp.path().to_path_buf()], &compress_filter(0));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let found = names(&resolution);
        assert!(found.contains(&"a.jpg".to_string()));
        if really_locked {
            assert_eq!(found, vec!["a.jpg"]);
            assert_eq!(resolution.excluded, 0);
        }
    }

    // =========================================================================
    // Compress filtering
    // =========================================================================

    #[test]
    fn min_size_excludes_at_or_below_threshold() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "small.jpg", 100);
        write(tmp.path(), "exact.jpg", 200);
        write(tmp.path(), "big.jpg", 201);

        let resolution = resolve(&[tmp.path().to_path_buf()], &compress_filter(200));

        assert_eq!(names(&resolution), vec!["big.jpg"]);
        assert_eq!(resolution.excluded, 2);
    }

    #[test]
    fn compress_ignores_documents() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "scan.pdf", 100);
        let resolution = resolve(&[tmp.path().to_path_buf()], &compress_filter(0));
        assert!(resolution.items.is_empty());
        assert_eq!(resolution.excluded, 0);
    }

    // =========================================================================
    // Convert filtering
    // =========================================================================

    #[test]
    fn convert_excludes_target_format_and_aliases() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.jpg", 10);
        write(tmp.path(), "b.JPEG", 10);
        write(tmp.path(), "c.png", 10);

        let resolution = resolve(&[tmp.path().to_path_buf()], &convert_filter("jpg", false));

        assert_eq!(names(&resolution), vec!["c.png"]);
        assert_eq!(resolution.excluded, 2);
        assert!(matches!(
            resolution.items[0].operation,
            Operation::Convert { .. }
        ));
    }

    #[test]
    fn documents_expand_unless_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "scan.pdf", 10);

        let kept = resolve(&[tmp.path().to_path_buf()], &convert_filter("png", false));
        assert_eq!(kept.items.len(), 1);
        assert_eq!(kept.items[0].kind, InputKind::PdfLike);

        let skipped = resolve(&[tmp.path().to_path_buf()], &convert_filter("png", true));
        assert!(skipped.items.is_empty());
        assert_eq!(skipped.excluded, 1);
    }

    // =========================================================================
    // Filesystem collaborators
    // =========================================================================

    #[test]
    fn list_supported_files_honours_exclusions() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.jpeg", 1);
        write(tmp.path(), "b.webp", 1);
        write(tmp.path(), "c.txt", 1);

        let files = list_supported_files(tmp.path(), &["jpg"], &FormatTable::default());

        assert_eq!(files, vec![tmp.path().join("b.webp")]);
    }

    #[test]
    fn file_size_of_missing_file_is_zero() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(file_size(&tmp.path().join("nope.jpg")), 0);
        let file = write(tmp.path(), "x.jpg", 42);
        assert_eq!(file_size(&file), 42);
    }
}
