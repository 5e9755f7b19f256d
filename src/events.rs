//! Lifecycle event emission
//!
//! The core never prints; discrete lifecycle events are handed to an
//! injected sink so a CLI, a progress bar, or a test can observe the
//! session without the core knowing about any of them.

use tracing::{info, warn};

/// Discrete lifecycle events of one profiling session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Target child process spawned
    Launched { pid: u32 },
    /// Periodic progress while profiling (approximate, best effort)
    SampleCycleTick { samples_so_far: u64 },
    /// Target exited before the configured duration elapsed
    EarlyExit { exit_code: Option<i32> },
    /// Sampling stopped, session tearing down the target
    Draining,
    /// Session finished and a result is being produced
    Completed { samples_taken: u64 },
    /// Session failed fatally; no result will be produced
    Failed { reason: String },
}

/// Consumer of session lifecycle events.
pub trait EventSink {
    fn emit(&mut self, event: SessionEvent);
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: SessionEvent) {}
}

/// Forwards events to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::Failed { reason } => warn!("session failed: {reason}"),
            SessionEvent::SampleCycleTick { samples_so_far } => {
                tracing::trace!(samples_so_far, "sampling")
            }
            other => info!("session event: {other:?}"),
        }
    }
}

/// Records every event; used by tests to assert ordering.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<SessionEvent>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let mut sink = RecordingSink::default();
        sink.emit(SessionEvent::Launched { pid: 42 });
        sink.emit(SessionEvent::Draining);
        assert_eq!(
            sink.events,
            vec![SessionEvent::Launched { pid: 42 }, SessionEvent::Draining]
        );
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let mut sink = NullSink;
        sink.emit(SessionEvent::Completed { samples_taken: 9 });
        sink.emit(SessionEvent::Failed {
            reason: "x".into(),
        });
    }
}
