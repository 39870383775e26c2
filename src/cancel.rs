//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a shared flag. Cloning it shares the flag. The
//! coordinator reads it before dispatching each item and workers read it
//! again before starting the transformation; nothing is interrupted
//! mid-call. The coordinator clears it when a run completes, so a stop
//! request never leaks into the next batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    stopped: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }
}
