//! Cooperative cancellation shared between producer and receiver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared control token polled between rows and files.
///
/// `cancel` is a true abort requested by the caller and is reported as a
/// cancellation. `stop` is a deliberate early termination requested by
/// the receiver (e.g. the row window was exhausted) and is reported as a
/// normal completion. Clones share the same flags.
#[derive(Debug, Clone, Default)]
pub struct ImportControl {
    flags: Arc<Flags>,
}

#[derive(Debug, Default)]
struct Flags {
    cancel: AtomicBool,
    stop: AtomicBool,
}

impl ImportControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a true abort.
    pub fn cancel(&self) {
        self.flags.cancel.store(true, Ordering::SeqCst);
    }

    /// Request a clean early termination.
    pub fn request_stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.cancel.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stop.load(Ordering::SeqCst)
    }

    /// Whether processing should halt for either reason.
    pub fn should_halt(&self) -> bool {
        self.is_cancelled() || self.is_stopped()
    }

    /// Clear the stop flag at a file boundary. Cancellation survives so
    /// a multi-file run still aborts between files.
    pub fn clear_stop(&self) {
        self.flags.stop.store(false, Ordering::SeqCst);
    }

    /// Clear both flags for a fresh run.
    pub fn reset(&self) {
        self.flags.cancel.store(false, Ordering::SeqCst);
        self.flags.stop.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let control = ImportControl::new();
        let clone = control.clone();

        clone.cancel();
        assert!(control.is_cancelled());
        assert!(control.should_halt());
    }

    #[test]
    fn stop_is_distinct_from_cancel() {
        let control = ImportControl::new();
        control.request_stop();

        assert!(control.is_stopped());
        assert!(!control.is_cancelled());
        assert!(control.should_halt());

        control.clear_stop();
        assert!(!control.should_halt());
    }

    #[test]
    fn clear_stop_keeps_cancel() {
        let control = ImportControl::new();
        control.cancel();
        control.request_stop();

        control.clear_stop();
        assert!(control.is_cancelled());
        assert!(!control.is_stopped());

        control.reset();
        assert!(!control.should_halt());
    }
}
