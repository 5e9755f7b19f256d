//! Session orchestration for one end-to-end profiling run
//!
//! A session launches the target as a child process, runs the sampler
//! against it, waits out the configured duration (or the target's early
//! exit), then tears everything down in a fixed order: sampling stops
//! first, the target is terminated second, the aggregator is snapshotted
//! last. That ordering is what guarantees no sample is ever attributed
//! to a process the session itself is already killing.
//!
//! State machine: `Created -> Launching -> Profiling -> Draining ->
//! Completed`, with `Failed` reachable from any non-terminal state. Only
//! configuration and spawn failures are fatal; every later anomaly
//! degrades into an annotated `SessionResult`.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::aggregator::{AggregatedData, Aggregator};
use crate::capture::PtraceCapture;
use crate::error::{ConfigurationError, SessionError};
use crate::events::{EventSink, SessionEvent};
use crate::sampler::Sampler;

/// How often the profiling wait loop checks for duration expiry or
/// target exit. Also bounds how late draining can begin.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Wait after SIGTERM before escalating to SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Configuration for one profiling session, passed in by the caller.
/// The core reads no environment variables or config files itself.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target command and arguments; the session spawns and owns it
    pub command: Vec<String>,
    /// Wall-clock profiling duration (hard timeout, not a hint)
    pub duration: Duration,
    pub sampling_rate_hz: u32,
    pub poll_interval: Duration,
    pub grace_period: Duration,
}

impl SessionConfig {
    pub fn new(command: Vec<String>, duration: Duration, sampling_rate_hz: u32) -> Self {
        Self {
            command,
            duration,
            sampling_rate_hz,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.duration < Duration::from_secs(1) {
            return Err(ConfigurationError::DurationTooShort(self.duration));
        }
        if self.sampling_rate_hz < 1 {
            return Err(ConfigurationError::RateTooLow(self.sampling_rate_hz));
        }
        if self.command.is_empty() {
            return Err(ConfigurationError::EmptyCommand);
        }
        Ok(())
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Launching,
    Profiling,
    Draining,
    Completed,
    Failed,
}

/// Immutable outcome of one session, owned by the caller.
#[derive(Debug)]
pub struct SessionResult {
    pub aggregated: AggregatedData,
    pub samples_taken: u64,
    /// The target's own exit code; `None` when the session terminated
    /// the target itself (induced exits are not the target's verdict)
    pub target_exit_code: Option<i32>,
    /// How long the Profiling state actually lasted
    pub duration_elapsed: Duration,
    /// The target exited before the configured duration elapsed
    pub early_exit: bool,
    /// SIGTERM was ignored past the grace period and SIGKILL was used
    pub termination_forced: bool,
}

/// Run one profiling session to completion.
pub fn run_session(
    config: SessionConfig,
    events: &mut dyn EventSink,
) -> Result<SessionResult, SessionError> {
    let mut state = SessionState::Created;

    // Created -> Launching: validate before anything is spawned.
    config
        .validate()
        .map_err(|e| fail(&mut state, events, e.into()))?;
    transition(&mut state, SessionState::Launching);

    let mut child = spawn_target(&config.command).map_err(|e| fail(&mut state, events, e))?;
    let pid = child.id();
    events.emit(SessionEvent::Launched { pid });

    let capture = PtraceCapture::new(pid);
    let mut sampler = Sampler::new(Box::new(capture), Aggregator::new(), config.sampling_rate_hz);
    sampler.start();
    transition(&mut state, SessionState::Profiling);

    // Profiling: wait for duration expiry or target exit, whichever
    // comes first. The sleep is capped by the remaining duration, so
    // draining starts at most one poll interval late.
    let profiling_started = Instant::now();
    let deadline = profiling_started + config.duration;
    let mut early_exit = false;
    let mut target_exit_code = None;
    loop {
        if let Some(code) = peek_target_exit(Pid::from_raw(pid as i32)) {
            target_exit_code = code;
            early_exit = true;
            events.emit(SessionEvent::EarlyExit {
                exit_code: target_exit_code,
            });
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        events.emit(SessionEvent::SampleCycleTick {
            samples_so_far: sampler.samples_so_far(),
        });
        std::thread::sleep(config.poll_interval.min(deadline - now));
    }
    let duration_elapsed = profiling_started.elapsed();

    // Profiling -> Draining: the sampler is joined before the target is
    // touched, and the aggregator is only read after that join.
    transition(&mut state, SessionState::Draining);
    events.emit(SessionEvent::Draining);
    let report = sampler
        .stop()
        .expect("sampler was started by this session and not stopped elsewhere");
    if report.target_lost && !early_exit {
        // The capture noticed the exit before the poll loop could.
        early_exit = true;
        target_exit_code = report.target_exit;
        events.emit(SessionEvent::EarlyExit {
            exit_code: target_exit_code,
        });
    }

    let mut termination_forced = false;
    if early_exit {
        // The poll loop only peeked at the status; now that the
        // sampler's wait is quiescent the zombie can be reaped.
        if let Ok(Some(status)) = child.try_wait() {
            if target_exit_code.is_none() {
                target_exit_code = exit_code_of(&status);
            }
        }
        // If the capture's own wait reaped the exit, it kept the code.
        if target_exit_code.is_none() {
            target_exit_code = report.target_exit;
        }
    } else {
        termination_forced =
            terminate_target(&mut child, config.grace_period, config.poll_interval);
    }

    transition(&mut state, SessionState::Completed);
    events.emit(SessionEvent::Completed {
        samples_taken: report.samples_taken,
    });

    Ok(SessionResult {
        aggregated: report.aggregator.snapshot(),
        samples_taken: report.samples_taken,
        target_exit_code,
        duration_elapsed,
        early_exit,
        termination_forced,
    })
}

/// Non-consuming liveness probe for the target.
///
/// While the sampler runs, its capture thread is the sole consumer of
/// wait statuses for the target; a `try_wait` here would share the same
/// wait set and could steal a ptrace attach-stop (misreading a live,
/// briefly-stopped target as exited). `waitid` with `WEXITED` alone
/// never reports ptrace stops, and `WNOWAIT` leaves the exit status
/// queued for the real reap after the sampler is joined.
///
/// Returns `None` while the target runs, `Some(code)` once it has
/// exited; `Some(None)` when the status itself is no longer available.
fn peek_target_exit(pid: Pid) -> Option<Option<i32>> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(pid), flags) {
        Ok(WaitStatus::StillAlive) => None,
        Ok(WaitStatus::Exited(_, code)) => Some(Some(code)),
        Ok(WaitStatus::Signaled(_, sig, _)) => Some(Some(128 + sig as i32)),
        Ok(other) => {
            debug!(%pid, "unexpected wait status from liveness probe: {other:?}");
            None
        }
        // ECHILD: the capture's wait already reaped the exit.
        Err(Errno::ECHILD) => Some(None),
        Err(e) => {
            warn!(%pid, "liveness probe failed: {e}");
            Some(None)
        }
    }
}

fn spawn_target(command: &[String]) -> Result<Child, SessionError> {
    let (program, args) = command
        .split_first()
        .expect("command validated to be non-empty");
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(SessionError::Spawn)
}

/// Two-phase teardown of a target that outlived the session: SIGTERM,
/// then SIGKILL once the grace period runs out. Returns whether force
/// was needed. A target that survives even SIGKILL is logged and
/// abandoned rather than allowed to stall the session.
fn terminate_target(child: &mut Child, grace_period: Duration, poll_interval: Duration) -> bool {
    let pid = Pid::from_raw(child.id() as i32);
    debug!(%pid, "requesting graceful termination");
    match kill(pid, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {} // ESRCH: lost the race, already gone
        Err(e) => warn!(%pid, "SIGTERM failed: {e}"),
    }
    if wait_for_exit(child, grace_period, poll_interval) {
        return false;
    }

    warn!(%pid, "target ignored SIGTERM past the grace period, killing");
    if let Err(e) = child.kill() {
        warn!(%pid, "SIGKILL failed: {e}");
    }
    if !wait_for_exit(child, grace_period, poll_interval) {
        warn!(%pid, "target did not exit after SIGKILL; abandoning teardown");
    }
    true
}

/// Poll for child exit up to `timeout`. True if the child is reaped
/// (or there is nothing left to wait for).
fn wait_for_exit(child: &mut Child, timeout: Duration, poll_interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Err(_) => return true,
            Ok(None) => {}
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(poll_interval.min(Duration::from_millis(20)));
    }
}

/// Exit code of a reaped child; signal deaths map to 128+signal.
fn exit_code_of(status: &std::process::ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

fn fail(state: &mut SessionState, events: &mut dyn EventSink, err: SessionError) -> SessionError {
    *state = SessionState::Failed;
    events.emit(SessionEvent::Failed {
        reason: err.to_string(),
    });
    err
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!(from = ?*state, to = ?next, "session state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use crate::events::RecordingSink;

    fn config(command: &[&str], duration_secs: u64, rate: u32) -> SessionConfig {
        SessionConfig::new(
            command.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(duration_secs),
            rate,
        )
    }

    #[test]
    fn test_validate_accepts_minimal_config() {
        assert!(config(&["sleep", "1"], 1, 1).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_subsecond_duration() {
        let mut cfg = config(&["sleep", "1"], 1, 10);
        cfg.duration = Duration::from_millis(500);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigurationError::DurationTooShort(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        assert!(matches!(
            config(&["sleep", "1"], 1, 0).validate(),
            Err(ConfigurationError::RateTooLow(0))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        assert!(matches!(
            config(&[], 1, 10).validate(),
            Err(ConfigurationError::EmptyCommand)
        ));
    }

    #[test]
    fn test_new_applies_defaults() {
        let cfg = config(&["true"], 5, 99);
        assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.grace_period, DEFAULT_GRACE_PERIOD);
    }

    #[test]
    fn test_invalid_config_fails_before_spawn() {
        let mut sink = RecordingSink::default();
        let result = run_session(config(&[], 1, 10), &mut sink);
        assert!(matches!(result, Err(SessionError::Config(_))));
        assert!(matches!(
            sink.events.as_slice(),
            [SessionEvent::Failed { .. }]
        ));
    }

    #[test]
    fn test_unspawnable_target_is_fatal() {
        let mut sink = RecordingSink::default();
        let result = run_session(
            config(&["/nonexistent/definitely-not-a-binary"], 1, 10),
            &mut sink,
        );
        assert!(matches!(result, Err(SessionError::Spawn(_))));
        // Failed is emitted and no Launched ever was.
        assert!(matches!(
            sink.events.as_slice(),
            [SessionEvent::Failed { .. }]
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_liveness_probe_leaves_ptrace_stops_queued() {
        use nix::sys::ptrace;
        use nix::sys::wait::waitpid;

        let mut child = Command::new("sleep")
            .arg("5")
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(child.id() as i32);

        ptrace::attach(pid).unwrap();

        // The attach-stop is pending. The probe must not misread the
        // live target as exited, and must leave the stop for waitpid.
        assert_eq!(peek_target_exit(pid), None);

        match waitpid(pid, None).unwrap() {
            WaitStatus::Stopped(stopped, _) => assert_eq!(stopped, pid),
            other => panic!("attach-stop was consumed elsewhere: {other:?}"),
        }

        ptrace::detach(pid, None).unwrap();
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_liveness_probe_reports_exit_without_reaping() {
        let mut child = Command::new("sh")
            .args(["-c", "exit 9"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(child.id() as i32);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(code) = peek_target_exit(pid) {
                assert_eq!(code, Some(9));
                break;
            }
            assert!(Instant::now() < deadline, "target never reported exit");
            std::thread::sleep(Duration::from_millis(10));
        }

        // WNOWAIT left the status queued for the real reap.
        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(9));
    }

    // Sessions against real targets are covered by
    // tests/session_lifecycle_tests.rs.
}
