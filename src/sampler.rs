//! Periodic capture-and-aggregate loop
//!
//! The sampler owns the capture capability and the aggregator for the
//! lifetime of a session and runs them on a dedicated thread. Its state
//! machine is `Idle -> Running -> Stopping -> Stopped`; `stop()` blocks
//! until the loop has fully ceased and hands the aggregator back, which
//! is the happens-before edge that makes the single-writer discipline
//! sound without any locking inside the aggregator.
//!
//! Cadence: the period is measured start-of-capture to start-of-capture.
//! A cycle that overruns its period makes the next one start immediately;
//! there is no catch-up backlog, so overhead is capped instead of cadence
//! being exact under load.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::aggregator::Aggregator;
use crate::capture::StackCapture;
use crate::error::CaptureError;

/// Sampler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Everything the sampler hands back when it stops.
#[derive(Debug)]
pub struct SamplerReport {
    /// The aggregator, returned to the session for its one snapshot
    pub aggregator: Aggregator,
    /// Samples folded in; equals the aggregator's submitted count
    pub samples_taken: u64,
    /// Cycles skipped due to transient capture failures
    pub cycles_skipped: u64,
    /// The loop exited on its own because the target vanished
    pub target_lost: bool,
    /// Exit code of the target if the capture's own wait reaped it
    pub target_exit: Option<i32>,
}

/// Drives periodic capture-and-aggregate cycles on a background thread.
pub struct Sampler {
    period: Duration,
    state: SamplerState,
    /// Capture + aggregator, held until `start()` moves them into the thread
    resources: Option<(Box<dyn StackCapture>, Aggregator)>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<SamplerReport>>,
    samples_taken: Arc<AtomicU64>,
}

impl Sampler {
    /// `sampling_rate_hz` must already be validated to be >= 1.
    pub fn new(capture: Box<dyn StackCapture>, aggregator: Aggregator, sampling_rate_hz: u32) -> Self {
        assert!(sampling_rate_hz >= 1, "sampling rate must be >= 1 Hz");
        Self {
            period: Duration::from_secs_f64(1.0 / f64::from(sampling_rate_hz)),
            state: SamplerState::Idle,
            resources: Some((capture, aggregator)),
            stop_tx: None,
            handle: None,
            samples_taken: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Samples folded in so far; approximate while running (used for
    /// progress events only, never for the final result).
    pub fn samples_so_far(&self) -> u64 {
        self.samples_taken.load(Ordering::Relaxed)
    }

    /// Transition Idle -> Running and begin the periodic cycle.
    ///
    /// # Panics
    ///
    /// Calling `start()` in any state but `Idle` is a programming error.
    pub fn start(&mut self) {
        if self.state != SamplerState::Idle {
            panic!("Sampler::start called in {:?} state", self.state);
        }
        let (capture, aggregator) = self
            .resources
            .take()
            .expect("idle sampler holds its capture and aggregator");

        let (stop_tx, stop_rx) = bounded(1);
        let period = self.period;
        let counter = Arc::clone(&self.samples_taken);
        let handle = thread::Builder::new()
            .name("flameiq-sampler".into())
            .spawn(move || run_loop(capture, aggregator, period, stop_rx, counter))
            .expect("failed to spawn sampler thread");

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        self.state = SamplerState::Running;
        debug!(period_us = period.as_micros() as u64, "sampler started");
    }

    /// Request the cycle to end, wait for the in-flight capture to
    /// finish, and transition to Stopped.
    ///
    /// Returns the report on the Running -> Stopped transition; any
    /// other call (including before `start()`) is a no-op yielding
    /// `None`. When this returns, no further `add_sample` will occur.
    pub fn stop(&mut self) -> Option<SamplerReport> {
        match self.state {
            SamplerState::Running => {
                self.state = SamplerState::Stopping;
                // Wakes the loop's wait early. If the loop already exited
                // on its own (target lost), the receiver is gone and the
                // failed send is irrelevant.
                if let Some(tx) = self.stop_tx.take() {
                    let _ = tx.send(());
                }
                let handle = self
                    .handle
                    .take()
                    .expect("running sampler owns its thread handle");
                let report = match handle.join() {
                    Ok(report) => report,
                    Err(panic) => std::panic::resume_unwind(panic),
                };
                self.state = SamplerState::Stopped;
                debug!(
                    samples = report.samples_taken,
                    skipped = report.cycles_skipped,
                    target_lost = report.target_lost,
                    "sampler stopped"
                );
                Some(report)
            }
            SamplerState::Idle | SamplerState::Stopping | SamplerState::Stopped => {
                self.state = SamplerState::Stopped;
                None
            }
        }
    }
}

/// The sampling loop body, run on the sampler thread.
fn run_loop(
    mut capture: Box<dyn StackCapture>,
    mut aggregator: Aggregator,
    period: Duration,
    stop_rx: Receiver<()>,
    samples_taken: Arc<AtomicU64>,
) -> SamplerReport {
    let mut cycles_skipped = 0u64;
    let mut target_lost = false;

    loop {
        let cycle_start = Instant::now();
        match capture.capture_all_stacks() {
            Ok(samples) => {
                for sample in &samples {
                    aggregator.add_sample(sample);
                }
                samples_taken.fetch_add(samples.len() as u64, Ordering::Relaxed);
            }
            Err(CaptureError::TargetLost) => {
                debug!("target process gone, sampling loop exiting early");
                target_lost = true;
                break;
            }
            Err(e) => {
                warn!("skipping sample cycle: {e}");
                cycles_skipped += 1;
            }
        }

        // Overrun makes this zero: the next cycle starts immediately,
        // and the stop channel is still checked on the way through.
        let wait = period.saturating_sub(cycle_start.elapsed());
        match stop_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let samples_total = aggregator.samples_submitted();
    let target_exit = capture.reaped_exit_code();
    SamplerReport {
        aggregator,
        samples_taken: samples_total,
        cycles_skipped,
        target_lost,
        target_exit,
    }
}
