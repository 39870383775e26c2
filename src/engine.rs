//! Engine facade.
//!
//! [`Engine`] is the control surface a frontend talks to. It validates
//! arguments synchronously, resolves the selection, hands the worklist to
//! the [`Coordinator`] and returns straight away; the caller then polls
//! [`Engine::progress`] until the run completes.
//!
//! | Call | Returns |
//! |---|---|
//! | [`Engine::compress`] / [`Engine::convert`] | `{"status": "started", "total": .., "excluded": ..}` |
//! | [`Engine::request_stop`] | `{"status": "stopping"}` |
//! | [`Engine::reset`] | `{"status": "success"}` |
//! | [`Engine::progress`] | [`ProgressSnapshot`] |
//!
//! External tools are probed once, in [`Engine::new`], and both production
//! backends are built from that one snapshot for the engine's lifetime.

use crate::cancel::CancellationToken;
use crate::config::{self, EngineConfig};
use crate::coordinator::{BatchError, Coordinator, RunHandle};
use crate::formats::FormatTable;
use crate::ledger::{Ledger, ProgressSnapshot};
use crate::resolve::{self, Filter, Resolution};
use crate::transform::tools::{CWEBP, MAGICK};
use crate::transform::{
    ArgumentError, CompressBackend, ConvertBackend, KNOWN_TOOLS, Operation, Quality, SystemTools,
    TargetFormat, ToolAvailability, ToolRunner, TransformBackend,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Parameters of one compression batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressParams {
    pub quality: u32,
    pub min_size: u64,
    pub max_workers: usize,
}

impl CompressParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            quality: config.compress.quality,
            min_size: config.compress.min_size,
            max_workers: config.processing.max_workers,
        }
    }
}

/// Parameters of one conversion batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertParams {
    pub target_format: String,
    pub quality: u32,
    pub max_workers: usize,
    pub skip_pdf_like_inputs: bool,
}

impl ConvertParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            target_format: config.convert.target_format.clone(),
            quality: config.convert.quality,
            max_workers: config.processing.max_workers,
            skip_pdf_like_inputs: config.convert.skip_pdf_like_inputs,
        }
    }
}

/// Reply to a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Started {
    pub status: &'static str,
    pub total: usize,
    pub excluded: usize,
}

/// Reply to a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub status: &'static str,
}

pub struct Engine {
    config: EngineConfig,
    formats: FormatTable,
    availability: ToolAvailability,
    compress: Arc<dyn TransformBackend>,
    convert: Arc<dyn TransformBackend>,
    coordinator: Coordinator,
    last_run: Mutex<Option<RunHandle>>,
}

impl Engine {
    /// Engine backed by the tools installed on this machine.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_tools(config, Arc::new(SystemTools))
    }

    /// Engine driving tools through `tools`, probed once here.
    pub fn with_tools(config: EngineConfig, tools: Arc<dyn ToolRunner>) -> Self {
        let availability = ToolAvailability::probe(tools.as_ref(), KNOWN_TOOLS);
        let formats = config.formats.table();
        let timeout = config.processing.tool_timeout();
        let compress = Arc::new(CompressBackend::new(
            Arc::clone(&tools),
            &availability,
            &formats,
            timeout,
        ));
        let convert = Arc::new(ConvertBackend::new(tools, &availability, timeout));
        let engine = Self::assemble(config, formats, availability, compress, convert);

        let writable = engine.writable_formats();
        for ext in engine.formats.supported() {
            if !writable.iter().any(|w| w == ext) {
                tracing::warn!(format = ext, "No tool available to write this format");
            }
        }
        engine
    }

    /// Engine with caller-supplied backends. No tools are probed.
    pub fn with_backends(
        config: EngineConfig,
        compress: Arc<dyn TransformBackend>,
        convert: Arc<dyn TransformBackend>,
    ) -> Self {
        let formats = config.formats.table();
        Self::assemble(config, formats, ToolAvailability::default(), compress, convert)
    }

    fn assemble(
        config: EngineConfig,
        formats: FormatTable,
        availability: ToolAvailability,
        compress: Arc<dyn TransformBackend>,
        convert: Arc<dyn TransformBackend>,
    ) -> Self {
        Self {
            config,
            formats,
            availability,
            compress,
            convert,
            coordinator: Coordinator::new(Arc::new(Ledger::new()), CancellationToken::new()),
            last_run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn formats(&self) -> &FormatTable {
        &self.formats
    }

    pub fn tool_availability(&self) -> &ToolAvailability {
        &self.availability
    }

    /// Formats some available tool can write. ImageMagick writes them all;
    /// without it only WebP via `cwebp` is left.
    pub fn writable_formats(&self) -> Vec<String> {
        if self.availability.is_available(MAGICK) {
            self.formats.supported().map(str::to_string).collect()
        } else if self.availability.is_available(CWEBP) {
            self.formats
                .supported()
                .filter(|ext| *ext == "webp")
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Compress the selection in place.
    pub fn compress(&self, paths: &[PathBuf], params: &CompressParams) -> Result<Started, BatchError> {
        if paths.is_empty() {
            return Err(ArgumentError::EmptySelection.into());
        }
        let quality = Quality::new(params.quality)?;
        self.ensure_idle()?;

        let filter = Filter::compress(
            self.formats.clone(),
            Operation::Compress { quality },
            params.min_size,
        );
        let resolution = resolve::resolve(paths, &filter);
        self.start(resolution, Arc::clone(&self.compress), params.max_workers)
    }

    /// Convert the selection to `params.target_format`.
    pub fn convert(&self, paths: &[PathBuf], params: &ConvertParams) -> Result<Started, BatchError> {
        if paths.is_empty() {
            return Err(ArgumentError::EmptySelection.into());
        }
        let quality = Quality::new(params.quality)?;
        let target = TargetFormat::parse(&params.target_format, &self.formats)?;
        self.ensure_idle()?;

        let filter = Filter::convert(
            self.formats.clone(),
            Operation::Convert { target, quality },
            params.skip_pdf_like_inputs,
        );
        let resolution = resolve::resolve(paths, &filter);
        self.start(resolution, Arc::clone(&self.convert), params.max_workers)
    }

    /// Cheap early rejection so a busy engine does not walk the selection.
    /// The ledger re-checks atomically when the run begins.
    fn ensure_idle(&self) -> Result<(), BatchError> {
        if self.progress().is_running() {
            return Err(crate::ledger::AlreadyRunning.into());
        }
        // A stop requested while idle must not cancel the next run.
        self.coordinator.cancellation().clear();
        Ok(())
    }

    fn start(
        &self,
        resolution: Resolution,
        backend: Arc<dyn TransformBackend>,
        max_workers: usize,
    ) -> Result<Started, BatchError> {
        let Resolution { items, excluded } = resolution;
        let item_count = items.len();
        let workers = config::bounded_workers(max_workers);
        let handle = self.coordinator.submit(items, excluded, backend, workers)?;
        *self.last_run.lock().expect("run handle lock poisoned") = Some(handle);

        Ok(Started {
            status: "started",
            total: if item_count == 0 { excluded } else { item_count },
            excluded,
        })
    }

    /// Ask the current run to stop dispatching. Items already running finish.
    pub fn request_stop(&self) -> Ack {
        self.coordinator.cancellation().request_stop();
        tracing::info!("Stop requested");
        Ack { status: "stopping" }
    }

    /// Return the ledger to idle. Refused while a run is active.
    pub fn reset(&self) -> Result<Ack, BatchError> {
        self.coordinator.ledger().reset()?;
        Ok(Ack { status: "success" })
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.coordinator.ledger().snapshot()
    }

    /// Block until the most recent run has completed.
    pub fn wait(&self) {
        let handle = self.last_run.lock().expect("run handle lock poisoned").take();
        if let Some(handle) = handle {
            handle.join();
        }
    }
}
