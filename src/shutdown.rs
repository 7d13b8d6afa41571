//! Cooperative shutdown signal.
//!
//! A single process-wide boolean flag, set once and observed by download
//! workers at well-defined checkpoints: before queueing, before blocking on
//! admission, and immediately after admission succeeds. Fetches that have
//! already started run to completion; there is no mid-fetch cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Process-wide cancellation flag, checked cooperatively by workers.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent; the flag can never be cleared.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
        }
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_starts_untriggered() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
    }

    #[test]
    fn test_trigger_is_sticky_and_idempotent() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        signal.trigger();
        assert!(observer.is_triggered());
    }

    #[test]
    fn test_trigger_visible_across_threads() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let handle = std::thread::spawn(move || remote.trigger());
        handle.join().unwrap();
        assert!(signal.is_triggered());
    }
}
