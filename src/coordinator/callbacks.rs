//! Lifecycle notification hooks.
//!
//! Workers report progress to the consumer (a UI, a CLI progress line)
//! only through these hooks; they never touch consumer state directly. A
//! consumer that needs to update single-threaded state is responsible for
//! marshalling inside its hook (post a message, send on a channel).
//!
//! Hooks must be cheap and non-blocking. Each fires at most once per
//! request, in the order queued, started, completed. Dispatch is guarded:
//! a panicking hook is caught and logged so a broken consumer can never
//! abort a download worker mid-cleanup.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

use super::CoordinatorError;

type Hook = Box<dyn Fn() + Send + Sync>;
type CompletionHook = Box<dyn Fn(bool, Option<&str>) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&CoordinatorError) + Send + Sync>;

/// Optional per-request notification hooks.
#[derive(Default)]
pub struct LifecycleCallbacks {
    on_queued: Option<Hook>,
    on_started: Option<Hook>,
    on_completed: Option<CompletionHook>,
    on_error: Option<ErrorHook>,
}

impl LifecycleCallbacks {
    /// Creates a callback bundle with no hooks set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook fired when the request enters the wait queue.
    #[must_use]
    pub fn on_queued(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_queued = Some(Box::new(hook));
        self
    }

    /// Sets the hook fired when the request is admitted and begins fetching.
    #[must_use]
    pub fn on_started(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_started = Some(Box::new(hook));
        self
    }

    /// Sets the hook fired with the final outcome. On failure the second
    /// argument carries a display-ready message.
    #[must_use]
    pub fn on_completed(
        mut self,
        hook: impl Fn(bool, Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        self.on_completed = Some(Box::new(hook));
        self
    }

    /// Sets the hook fired when an exceptional error occurs during the
    /// fetch or bookkeeping. Fires before the failed completion hook.
    #[must_use]
    pub fn on_error(
        mut self,
        hook: impl Fn(&CoordinatorError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub(crate) fn notify_queued(&self) {
        if let Some(hook) = &self.on_queued {
            dispatch("on_queued", || hook());
        }
    }

    pub(crate) fn notify_started(&self) {
        if let Some(hook) = &self.on_started {
            dispatch("on_started", || hook());
        }
    }

    pub(crate) fn notify_completed(&self, success: bool, message: Option<&str>) {
        if let Some(hook) = &self.on_completed {
            dispatch("on_completed", || hook(success, message));
        }
    }

    pub(crate) fn notify_error(&self, error: &CoordinatorError) {
        if let Some(hook) = &self.on_error {
            dispatch("on_error", || hook(error));
        }
    }
}

/// Invokes one hook, containing any panic at the dispatch boundary.
fn dispatch(name: &str, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!(callback = name, "lifecycle callback panicked; ignoring");
    }
}

impl fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("on_queued", &self.on_queued.is_some())
            .field("on_started", &self.on_started.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_unset_hooks_are_silent() {
        let callbacks = LifecycleCallbacks::new();
        callbacks.notify_queued();
        callbacks.notify_started();
        callbacks.notify_completed(true, None);
    }

    #[test]
    fn test_hooks_fire_with_arguments() {
        let completions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&completions);

        let callbacks = LifecycleCallbacks::new()
            .on_completed(move |success, message| {
                sink.lock()
                    .unwrap()
                    .push((success, message.map(String::from)));
            });

        callbacks.notify_completed(false, Some("tool failed"));
        let recorded = completions.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (false, Some("tool failed".to_string())));
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let after = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&after);

        let callbacks = LifecycleCallbacks::new()
            .on_queued(|| panic!("consumer is broken"))
            .on_started(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        callbacks.notify_queued();
        callbacks.notify_started();
        assert_eq!(after.load(Ordering::SeqCst), 1, "later hooks still run");
    }

    #[test]
    fn test_debug_shows_which_hooks_are_set() {
        let callbacks = LifecycleCallbacks::new().on_queued(|| {});
        let rendered = format!("{callbacks:?}");
        assert!(rendered.contains("on_queued: true"));
        assert!(rendered.contains("on_completed: false"));
    }
}
