//! Error types for the profiling core
//!
//! Only configuration and spawn failures are fatal: they prevent a
//! `SessionResult` from ever existing. Everything else (a capture that
//! races with thread exit, a target that vanishes mid-session, a child
//! that ignores SIGTERM) degrades into an annotated result instead.

use std::time::Duration;
use thiserror::Error;

/// Rejected before any process is spawned.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("profiling duration must be at least 1 second (got {0:?})")]
    DurationTooShort(Duration),

    #[error("sampling rate must be at least 1 Hz (got {0})")]
    RateTooLow(u32),

    #[error("no target command given")]
    EmptyCommand,

    #[error("attaching to a running process by PID is not supported; pass a command to launch instead")]
    PidAttachUnsupported,
}

/// A single capture cycle failed.
///
/// `TargetLost` is the only variant the sampler treats as terminal; the
/// others cost one skipped cycle and the loop carries on.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("target process is gone")]
    TargetLost,

    #[error("failed to enumerate target threads: {0}")]
    ThreadEnumeration(#[source] std::io::Error),
}

/// Fatal session errors. No partial `SessionResult` accompanies these.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigurationError),

    #[error("failed to launch target process: {0}")]
    Spawn(#[source] std::io::Error),
}
