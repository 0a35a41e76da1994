//! Transfer progress reporting
//!
//! Operations report `(transferred, total)` to a `ProgressObserver`. Closures
//! implement the trait directly; `progress_channel` turns progress into a
//! stream of events for callers that prefer to consume them asynchronously.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// A progress observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub transferred: u64,
    pub total: u64,
}

impl Progress {
    /// Completion percentage (0.0 for an empty transfer)
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.transferred as f64 / self.total as f64) * 100.0
        }
    }
}

/// Receives progress observations. Called synchronously from the transfer, so
/// implementations should return quickly.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: Progress);
}

impl<F> ProgressObserver for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn on_progress(&self, progress: Progress) {
        self(progress)
    }
}

/// Ignores all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: Progress) {}
}

/// Logs progress at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, progress: Progress) {
        debug!(
            transferred = progress.transferred,
            total = progress.total,
            "progress = {:.2}%",
            progress.percent()
        );
    }
}

/// Forwards progress into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<Progress>,
}

impl ProgressObserver for ChannelProgress {
    fn on_progress(&self, progress: Progress) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(progress);
    }
}

/// Create an observer whose events can be consumed from the returned receiver
pub fn progress_channel() -> (Arc<dyn ProgressObserver>, mpsc::UnboundedReceiver<Progress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelProgress { tx }), rx)
}

/// Guarantees that an observer only ever sees non-decreasing values, even
/// when a request body is replayed on retry.
pub(crate) struct ProgressTracker {
    observer: Arc<dyn ProgressObserver>,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    total: u64,
    last: Option<u64>,
}

impl ProgressTracker {
    pub(crate) fn new(observer: Arc<dyn ProgressObserver>, total: u64) -> Self {
        Self {
            observer,
            state: Mutex::new(TrackerState { total, last: None }),
        }
    }

    /// Report the bytes transferred so far. Values below the high-water mark
    /// are dropped.
    pub(crate) fn report(&self, transferred: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.last.is_some_and(|last| transferred <= last) {
            return;
        }
        state.last = Some(transferred);
        let total = state.total.max(transferred);
        self.observer.on_progress(Progress { transferred, total });
    }

    /// Emit the final observation, `(total, total)`, unless it was already
    /// the last one reported
    pub(crate) fn finish(&self, total: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total = total;
        if state.last == Some(total) {
            return;
        }
        state.last = Some(total);
        self.observer.on_progress(Progress {
            transferred: total,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<dyn ProgressObserver>, Arc<Mutex<Vec<Progress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |p: Progress| sink.lock().unwrap().push(p));
        (observer, seen)
    }

    #[test]
    fn test_percent() {
        assert_eq!(Progress { transferred: 0, total: 100 }.percent(), 0.0);
        assert_eq!(Progress { transferred: 50, total: 100 }.percent(), 50.0);
        assert_eq!(Progress { transferred: 0, total: 0 }.percent(), 0.0);
    }

    #[test]
    fn test_tracker_drops_regressions() {
        let (observer, seen) = recorder();
        let tracker = ProgressTracker::new(observer, 100);
        tracker.report(40);
        tracker.report(80);
        // replayed body after a retry
        tracker.report(40);
        tracker.report(100);
        tracker.finish(100);

        let seen = seen.lock().unwrap();
        let values: Vec<u64> = seen.iter().map(|p| p.transferred).collect();
        assert_eq!(values, vec![40, 80, 100]);
        assert!(seen.iter().all(|p| p.total == 100));
    }

    #[test]
    fn test_tracker_empty_transfer() {
        let (observer, seen) = recorder();
        let tracker = ProgressTracker::new(observer, 0);
        tracker.finish(0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Progress { transferred: 0, total: 0 }]
        );
    }

    #[tokio::test]
    async fn test_progress_channel() {
        let (observer, mut rx) = progress_channel();
        observer.on_progress(Progress { transferred: 1, total: 2 });
        observer.on_progress(Progress { transferred: 2, total: 2 });
        assert_eq!(rx.recv().await.unwrap().transferred, 1);
        assert_eq!(rx.recv().await.unwrap().transferred, 2);
    }
}
