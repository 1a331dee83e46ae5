//! Conversion progress snapshots and callback fan-out

use crate::native::ConverterEvents;
use log::error;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Progress of a running conversion
///
/// Built fresh from native state on every progress callback; nothing is
/// cached between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Zero-based index of the current phase
    pub phase: u32,
    /// Short description of the current phase, e.g. "Loading pages"
    pub phase_description: String,
    /// Total number of phases, at least 1
    pub phase_count: u32,
    /// Completion of the current phase in percent (0-100)
    pub percent: u32,
}

impl Progress {
    /// Build a snapshot from raw native values, clamping them into range.
    pub fn from_native(phase: i32, phase_description: String, phase_count: i32, percent: i32) -> Self {
        Self {
            phase: phase.max(0) as u32,
            phase_description,
            phase_count: phase_count.max(1) as u32,
            percent: percent.clamp(0, 100) as u32,
        }
    }
}

pub(crate) type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;
pub(crate) type ProgressHandler = Arc<dyn Fn(&Progress) + Send + Sync>;
pub(crate) type FinishedHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Consumers registered on a converter builder, in registration order
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub warning: Vec<MessageHandler>,
    pub error: Vec<MessageHandler>,
    pub phase: Vec<ProgressHandler>,
    pub progress: Vec<ProgressHandler>,
    pub finished: Vec<FinishedHandler>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("warning", &self.warning.len())
            .field("error", &self.error.len())
            .field("phase", &self.phase.len())
            .field("progress", &self.progress.len())
            .field("finished", &self.finished.len())
            .finish()
    }
}

// A consumer that panics must not take the worker or the other consumers down.
fn guarded(event: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!("{} callback panicked: {}", event, panic_message(payload.as_ref()));
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Per-conversion fan-out of native events to the registered consumers.
///
/// Also records every warning and error line in emission order so a failed
/// conversion can report them.
pub(crate) struct Dispatcher {
    callbacks: Callbacks,
    log: Mutex<Vec<String>>,
}

impl Dispatcher {
    pub fn new(callbacks: Callbacks) -> Self {
        Self {
            callbacks,
            log: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, line: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(line);
        }
    }

    /// Warning and error lines seen so far, prefixed with their kind
    pub fn log(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl ConverterEvents for Dispatcher {
    fn warning(&self, message: &str) {
        self.record(format!("Warning: {}", message));
        for cb in &self.callbacks.warning {
            guarded("warning", || cb(message));
        }
    }

    fn error(&self, message: &str) {
        self.record(format!("Error: {}", message));
        for cb in &self.callbacks.error {
            guarded("error", || cb(message));
        }
    }

    fn phase_changed(&self, progress: &Progress) {
        for cb in &self.callbacks.phase {
            guarded("phase", || cb(progress));
        }
    }

    fn progress_changed(&self, progress: &Progress) {
        for cb in &self.callbacks.progress {
            guarded("progress", || cb(progress));
        }
    }

    fn finished(&self, success: bool) {
        for cb in &self.callbacks.finished {
            guarded("finished", || cb(success));
        }
    }
}
