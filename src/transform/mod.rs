//! File transformations, delegated to external tools.
//!
//! | Operation | Tools | Effect on the source |
//! |---|---|---|
//! | **Compress** | `jpegoptim`, `pngquant`, `cwebp`, fallback `magick` | rewritten in place |
//! | **Convert** | `magick`, `cwebp` for WebP targets | replaced by the new file |
//! | **Convert PDF-like** | `magick identify` + one `magick` per page | kept, pages written beside it |
//!
//! The module is split into:
//! - **Parameters**: [`WorkItem`] and the validated values it carries
//! - **Backend**: [`TransformBackend`] trait, [`Outcome`], [`BackendError`]
//! - **Tools**: [`ToolRunner`] trait + [`SystemTools`], probed once into [`ToolAvailability`]
//! - **Compress / Convert**: the two production backends

pub mod backend;
pub mod compress;
pub mod convert;
pub mod params;
pub mod tools;

pub use backend::{BackendError, Outcome, TransformBackend};
pub use compress::CompressBackend;
pub use convert::ConvertBackend;
pub use params::{ArgumentError, InputKind, Operation, Quality, TargetFormat, WorkItem};
pub use tools::{KNOWN_TOOLS, SystemTools, ToolAvailability, ToolOutput, ToolRunner};
