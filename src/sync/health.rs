//! Control plane availability as seen by the sync engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::observability::metrics;
use crate::sync::SyncError;

pub struct SyncHealth {
    available: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl SyncHealth {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mark_available(&self) {
        if !self.available.swap(true, Ordering::AcqRel) {
            tracing::info!("Control plane available again");
        }
        metrics::set_sync_source_available(true);
    }

    /// Logs at error level on the transition only; repeats are debug.
    pub fn mark_unavailable(&self, error: &SyncError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
        if self.available.swap(false, Ordering::AcqRel) {
            tracing::error!(error = %error, "Control plane unavailable, keeping last known state");
        } else {
            tracing::debug!(error = %error, "Control plane still unavailable");
        }
        metrics::set_sync_source_available(false);
    }
}

impl Default for SyncHealth {
    fn default() -> Self {
        Self::new()
    }
}
