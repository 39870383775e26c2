//! Media format table.
//!
//! Every decision that depends on a file's type goes through [`FormatTable`]:
//! whether a file is a candidate at all, whether two extensions name the same
//! format (`jpg`/`jpeg`, `tif`/`tiff`), and whether an input is *PDF-like*,
//! i.e. a multi-page document that converts into several page images.
//!
//! Extensions are always compared lowercased and without the leading dot.

use std::collections::BTreeSet;
use std::path::Path;

/// Media formats handled out of the box.
pub const DEFAULT_SUPPORTED: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "avif", "heic", "bmp", "gif", "tiff", "tif",
];

/// Multi-page inputs that expand into one output per page on conversion.
pub const DEFAULT_PDF_LIKE: &[&str] = &["pdf"];

/// Spellings that denote the same format. The first entry is canonical.
pub const DEFAULT_ALIASES: &[&[&str]] = &[&["jpg", "jpeg"], &["tif", "tiff"]];

/// Lowercased extension of `path` without the dot, if it has one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTable {
    supported: BTreeSet<String>,
    pdf_like: BTreeSet<String>,
    aliases: Vec<Vec<String>>,
}

impl FormatTable {
    pub fn new<S: AsRef<str>>(supported: &[S], pdf_like: &[S], aliases: &[Vec<S>]) -> Self {
        let lower = |s: &S| s.as_ref().trim_start_matches('.').to_ascii_lowercase();
        Self {
            supported: supported.iter().map(lower).collect(),
            pdf_like: pdf_like.iter().map(lower).collect(),
            aliases: aliases
                .iter()
                .map(|group| group.iter().map(lower).collect())
                .collect(),
        }
    }

    /// Is `ext` a single-image media format this table accepts?
    pub fn is_media(&self, ext: &str) -> bool {
        self.supported.contains(&ext.to_ascii_lowercase())
    }

    pub fn is_pdf_like(&self, ext: &str) -> bool {
        self.pdf_like.contains(&ext.to_ascii_lowercase())
    }

    pub fn is_media_path(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.is_media(&ext))
    }

    /// Canonical spelling of `ext` according to the alias groups.
    ///
    /// ```text
    /// JPEG -> jpg
    /// tiff -> tif
    /// png  -> png
    /// ```
    pub fn canonical(&self, ext: &str) -> String {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.aliases
            .iter()
            .find(|group| group.contains(&ext))
            .and_then(|group| group.first().cloned())
            .unwrap_or(ext)
    }

    /// Do `a` and `b` name the same format once aliases are applied?
    pub fn same_format(&self, a: &str, b: &str) -> bool {
        self.canonical(a) == self.canonical(b)
    }

    pub fn supported(&self) -> impl Iterator<Item = &str> {
        self.supported.iter().map(String::as_str)
    }
}

impl Default for FormatTable {
    fn default() -> Self {
        let aliases: Vec<Vec<&str>> = DEFAULT_ALIASES.iter().map(|g| g.to_vec()).collect();
        Self::new(DEFAULT_SUPPORTED, DEFAULT_PDF_LIKE, &aliases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of(Path::new("/a/B.JPG")), Some("jpg".to_string()));
        assert_eq!(extension_of(Path::new("/a/noext")), None);
        assert_eq!(extension_of(Path::new("/a/trailing.")), None);
    }

    #[test]
    fn media_lookup_ignores_case() {
        let table = FormatTable::default();
        assert!(table.is_media("PNG"));
        assert!(table.is_media("heic"));
        assert!(!table.is_media("txt"));
        assert!(!table.is_media("pdf"));
        assert!(table.is_pdf_like("PDF"));
    }

    #[test]
    fn aliases_collapse_to_first_spelling() {
        let table = FormatTable::default();
        assert_eq!(table.canonical("JPEG"), "jpg");
        assert_eq!(table.canonical(".tiff"), "tif");
        assert_eq!(table.canonical("webp"), "webp");
        assert!(table.same_format("jpeg", "JPG"));
        assert!(!table.same_format("png", "jpg"));
    }

    #[test]
    fn custom_table_normalizes_entries() {
        let table = FormatTable::new(&[".PNG", "Jxl"], &[], &[vec!["jxl", "jpegxl"]]);
        assert!(table.is_media("png"));
        assert!(table.is_media("JXL"));
        assert_eq!(table.canonical("jpegxl"), "jxl");
        assert!(!table.is_pdf_like("pdf"));
    }
}
