//! # Media Batch
//!
//! Bulk compression and format conversion for a directory tree of media
//! files. Select files or folders, start a batch, poll its progress, stop it
//! if needed. The pixels themselves are handled by external tools
//! (ImageMagick, jpegoptim, pngquant, cwebp); this crate decides what to run,
//! runs it in parallel, and keeps an exact account of what happened.
//!
//! # Architecture: Resolve, Dispatch, Account
//!
//! ```text
//! 1. Resolve   selection  →  worklist + excluded count   (synchronous)
//! 2. Dispatch  worklist   →  worker pool → backend        (background thread)
//! 3. Account   outcomes   →  progress ledger              (polled by the caller)
//! ```
//!
//! The caller only ever talks to [`engine::Engine`]. Submissions return as
//! soon as the worklist is known; everything after that is observed through
//! [`ledger::ProgressSnapshot`]s.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Control surface: compress, convert, stop, reset, progress |
//! | [`resolve`] | Expands a selection into work items, counting what it filters out |
//! | [`transform`] | Backend trait, compress and convert backends, external tool layer |
//! | [`coordinator`] | Runs a worklist on a bounded worker pool and records outcomes |
//! | [`ledger`] | The shared progress record and its immutable snapshots |
//! | [`cancel`] | Cooperative stop flag shared by the coordinator and workers |
//! | [`formats`] | Supported extensions, alias groups, multi-page document types |
//! | [`inventory`] | Listing, format statistics, extension fixing, search |
//! | [`config`] | `config.toml` loading, merging over stock defaults, validation |
//! | [`output`] | CLI output formatting |
//! | [`logging`] | tracing subscriber setup |
//!
//! # Design Decisions
//!
//! ## Backends Never See the Ledger
//!
//! A [`transform::TransformBackend`] returns an [`transform::Outcome`] and
//! does nothing else besides touching files. All accounting (sizes, failed
//! and skipped lists, the processed counter) happens in one place in the
//! coordinator. That keeps the invariants `processed <= total` and
//! `processed == total` on completion checkable with a mock backend and no
//! filesystem.
//!
//! ## Every Selected File Is Accounted For
//!
//! Files filtered out during resolution still count toward the total when
//! there is nothing else to do, and items not started because of a stop
//! request are counted as processed. A completed run therefore always shows
//! `processed == total`, and a progress bar always reaches the end.
//!
//! ## Idempotent Re-runs
//!
//! Conversion never overwrites an existing output; it reports
//! `SkippedExisting` instead. After an interrupted batch, resubmitting the
//! same selection picks up where it left off.
//!
//! ## Tools Probed Once
//!
//! Tool availability is checked when the engine is built and never again.
//! Each format's strategy (specialised tool or the ImageMagick fallback) is
//! fixed for the engine's lifetime.

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod formats;
pub mod inventory;
pub mod ledger;
pub mod logging;
pub mod output;
pub mod resolve;
pub mod transform;
