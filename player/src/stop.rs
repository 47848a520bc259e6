//! Cross-thread stop request for a running task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable flag: any clone may request a stop, the run observes it at the
/// next step boundary (and between template polls when enabled).
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm before starting a new run.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let handle = StopHandle::new();
        let remote = handle.clone();
        assert!(!handle.is_requested());
        remote.stop();
        assert!(handle.is_requested());
        handle.clear();
        assert!(!remote.is_requested());
    }
}
