//! Transformation backend trait and shared types.
//!
//! A [`TransformBackend`] performs one unit of work on one [`WorkItem`] and
//! reports what happened as an [`Outcome`]. Backends mutate the filesystem
//! and nothing else: they never see the progress ledger. Outcome accounting
//! lives entirely in the [coordinator](crate::coordinator), which lets it be
//! tested with a mock backend and no files at all.
//!
//! Production implementations are
//! [`CompressBackend`](super::compress::CompressBackend) and
//! [`ConvertBackend`](super::convert::ConvertBackend), both driving external
//! tools through a [`ToolRunner`](super::tools::ToolRunner).

use super::params::WorkItem;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no tool available for {0}")]
    ToolUnavailable(String),
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {}: {stderr}", .code.map_or("a signal".to_string(), |c| format!("status {c}")))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{tool} timed out after {secs}s")]
    TimedOut { tool: String, secs: u64 },
    #[error("unexpected tool output: {0}")]
    UnexpectedOutput(String),
    #[error("{0} cannot handle this item")]
    WrongOperation(&'static str),
}

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Done. For compression `final_size` is the rewritten file; for
    /// conversion it is the new file, and the source is gone.
    Success { final_size: u64 },
    /// One input produced several outputs (e.g. one image per document
    /// page). The input is kept. `outputs` is exactly what this call wrote
    /// or found in place, never a directory scan.
    SuccessExpanded {
        outputs: Vec<PathBuf>,
        total_final_size: u64,
    },
    /// The output already exists; nothing was written.
    SkippedExisting { existing: PathBuf },
    /// The transformation did not happen.
    Failed { reason: String },
}

impl From<BackendError> for Outcome {
    fn from(err: BackendError) -> Self {
        Outcome::Failed {
            reason: err.to_string(),
        }
    }
}

/// A pluggable strategy that transforms one file.
///
/// Implementations are shared across worker threads, hence `Send + Sync`.
/// Errors are per item: the coordinator records them and moves on.
pub trait TransformBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Transform one item.
    fn apply(&self, item: &WorkItem) -> Result<Outcome, BackendError>;
}
