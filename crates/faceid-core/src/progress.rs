//! Optional progress notifications for long gallery runs.
//!
//! Observers have no influence on the decision; they are told how many
//! pairwise comparisons have finished after each one completes.

use std::sync::atomic::{AtomicUsize, Ordering};

pub trait ProgressObserver: Sync {
    /// Called once per finished comparison. `completed` counts finished
    /// comparisons, not gallery positions, so with several workers it
    /// follows completion order.
    fn on_progress(&self, completed: usize, total: usize);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize) + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// Ignores all notifications.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Logs once each time completion crosses a new 10 % step.
#[derive(Default)]
pub struct DecileProgress {
    // Highest decile reported so far, plus one. Zero means nothing reported.
    reported: AtomicUsize,
}

impl DecileProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressObserver for DecileProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        if total == 0 {
            return;
        }
        let decile = completed.min(total) * 10 / total;
        let previous = self.reported.fetch_max(decile + 1, Ordering::AcqRel);
        if previous < decile + 1 {
            tracing::info!(
                percent = decile * 10,
                completed,
                total,
                "verifying"
            );
        }
    }
}
