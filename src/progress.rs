//! Progress reporting and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One progress notification
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Human-readable stage, e.g. "creating r2..."
    pub stage: String,
    /// Pyramid level or streamed piece the event refers to
    pub level: Option<u32>,
    /// Completion of the current stage, 0..=100
    pub percent: f64,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(stage: impl Into<String>, level: Option<u32>, percent: f64) -> Self {
        Self {
            stage: stage.into(),
            level,
            percent: percent.clamp(0.0, 100.0),
        }
    }
}

/// Receives progress events from long-running operations.
pub trait ProgressListener {
    fn on_progress(&mut self, event: &ProgressEvent);
}

impl<F: FnMut(&ProgressEvent)> ProgressListener for F {
    fn on_progress(&mut self, event: &ProgressEvent) {
        self(event);
    }
}

/// Default listener: prints the stage once, then each whole-percent step.
#[derive(Debug, Default)]
pub struct StdoutProgress {
    stage: String,
    last_percent: Option<u32>,
}

impl ProgressListener for StdoutProgress {
    fn on_progress(&mut self, event: &ProgressEvent) {
        if event.stage != self.stage {
            println!("{}", event.stage);
            self.stage.clone_from(&event.stage);
            self.last_percent = None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = event.percent.floor() as u32;
        if self.last_percent != Some(percent) {
            println!("{percent:3}%");
            self.last_percent = Some(percent);
        }
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; honoured at the next check point
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_signal_shared() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_aborted());
        signal.abort();
        assert!(clone.is_aborted());
        clone.reset();
        assert!(!signal.is_aborted());
    }

    #[test]
    fn test_closure_listener() {
        let mut seen = Vec::new();
        {
            let mut listener = |e: &ProgressEvent| seen.push(e.percent);
            listener.on_progress(&ProgressEvent::new("x", None, 50.0));
            listener.on_progress(&ProgressEvent::new("x", None, 150.0));
        }
        assert_eq!(seen, vec![50.0, 100.0]);
    }

    #[test]
    fn test_stdout_progress_tracks_stage() {
        let mut progress = StdoutProgress::default();
        progress.on_progress(&ProgressEvent::new("creating r1...", Some(1), 10.4));
        assert_eq!(progress.last_percent, Some(10));
        progress.on_progress(&ProgressEvent::new("creating r2...", Some(2), 0.0));
        assert_eq!(progress.stage, "creating r2...");
        assert_eq!(progress.last_percent, Some(0));
    }
}
