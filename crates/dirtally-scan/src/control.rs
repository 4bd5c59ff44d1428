//! Cooperative cancel and suspend for the traversal thread.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Flags observed by traversal at every checkpoint.
#[derive(Debug, Default)]
pub struct ScanControl {
    cancelled: AtomicBool,
    suspended: Mutex<bool>,
    resumed: Condvar,
}

impl ScanControl {
    /// Create a control in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    fn suspended(&self) -> MutexGuard<'_, bool> {
        self.suspended.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request cancellation. A suspended traversal is woken so it can observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.resume();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Block traversal at its next checkpoint.
    pub fn suspend(&self) {
        *self.suspended() = true;
    }

    /// Let a suspended traversal continue.
    pub fn resume(&self) {
        *self.suspended() = false;
        self.resumed.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended()
    }

    /// Clear both flags before a new scan.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
        self.resume();
    }

    /// Called by traversal after each processed entry.
    ///
    /// `before_block` runs once, unlocked, before the thread parks on a
    /// suspend request. Returns `Break` when the scan was cancelled.
    pub fn checkpoint(&self, before_block: impl FnOnce()) -> ControlFlow<()> {
        if self.is_cancelled() {
            return ControlFlow::Break(());
        }
        if !self.is_suspended() {
            return ControlFlow::Continue(());
        }

        before_block();
        let mut suspended = self.suspended();
        while *suspended && !self.is_cancelled() {
            suspended = self
                .resumed
                .wait(suspended)
                .unwrap_or_else(|e| e.into_inner());
        }
        drop(suspended);

        if self.is_cancelled() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
