//! Stack capture capability for the sampler
//!
//! The sampler depends only on the `StackCapture` trait, so tests drive
//! it with scripted fakes while production uses `PtraceCapture`: per
//! sample cycle, each target thread is briefly stopped with
//! PTRACE_ATTACH, its registers read, its frame pointer chain walked via
//! `process_vm_readv`, and then detached. A thread that exits mid-walk
//! contributes no sample; only a fully vanished target aborts a cycle.

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::CaptureError;
use crate::sample::StackSample;
use crate::symbolize::{self, Symbolizer};
use crate::unwind;

/// Produces the set of current stack samples for a target's live threads.
pub trait StackCapture: Send {
    /// Capture one stack sample per observable thread.
    ///
    /// An empty vec means the target had no observable threads at that
    /// instant (e.g. it just exited) and is not an error. Unresolvable
    /// individual threads are skipped silently.
    fn capture_all_stacks(&mut self) -> Result<Vec<StackSample>, CaptureError>;

    /// Exit code of the target if this capture's own wait consumed the
    /// real exit status while collecting an attach-stop.
    fn reaped_exit_code(&self) -> Option<i32> {
        None
    }
}

/// Ptrace-based capture of a child process's threads (Linux x86_64).
///
/// The capture thread is the only thread of the profiler allowed to
/// consume wait statuses for the target while sampling is running; the
/// session probes liveness with a non-consuming `waitid(WNOWAIT)` so
/// the attach-stops collected here are never stolen.
pub struct PtraceCapture {
    pid: u32,
    /// Loaded lazily on the first capture, once the child has exec'd
    symbolizer: Option<Symbolizer>,
    symbolizer_attempted: bool,
    /// Exit status swallowed by an attach that raced with process exit
    reaped_exit: Option<i32>,
}

impl PtraceCapture {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            symbolizer: None,
            symbolizer_attempted: false,
            reaped_exit: None,
        }
    }

    /// Enumerate the target's live thread ids from `/proc/<pid>/task`.
    fn live_threads(&self) -> Result<Vec<Pid>, CaptureError> {
        let task_dir = format!("/proc/{}/task", self.pid);
        let entries = match std::fs::read_dir(&task_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaptureError::TargetLost);
            }
            Err(e) => return Err(CaptureError::ThreadEnumeration(e)),
        };

        let mut tids = Vec::new();
        for entry in entries.flatten() {
            if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
                tids.push(Pid::from_raw(tid));
            }
        }
        Ok(tids)
    }

    /// Load DWARF info for the target binary, once.
    ///
    /// Deferred past the first cycle so the child has finished exec'ing
    /// its real image; failure downgrades to placeholder frames.
    fn ensure_symbolizer(&mut self) {
        if self.symbolizer_attempted {
            return;
        }
        self.symbolizer_attempted = true;
        match Symbolizer::for_process(self.pid) {
            Ok(sym) => {
                debug!(pid = self.pid, "loaded DWARF debug info for target");
                self.symbolizer = Some(sym);
            }
            Err(e) => {
                warn!(
                    pid = self.pid,
                    "no usable debug info, stacks will show raw addresses: {e:#}"
                );
            }
        }
    }

    /// Stop one thread, walk its stack, detach, symbolize.
    ///
    /// Returns `None` when the thread raced with termination; the rest
    /// of the cycle proceeds without it.
    fn capture_thread(&mut self, tid: Pid) -> Option<StackSample> {
        match ptrace::attach(tid) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return None, // exited since enumeration
            Err(e) => {
                debug!(%tid, "ptrace attach failed: {e}");
                return None;
            }
        }

        // The thread is stopping; from here we must always detach.
        let main_pid = self.pid;
        let reaped = &mut self.reaped_exit;
        let addrs = (|| {
            // This wait normally collects the attach-stop. If the
            // attach raced with process exit it collects (and thereby
            // reaps) the real exit status instead; that status must be
            // preserved for the session, which can no longer wait for it.
            match waitpid(tid, Some(WaitPidFlag::__WALL)).ok()? {
                WaitStatus::Exited(_, code) => {
                    if tid.as_raw() as u32 == main_pid {
                        *reaped = Some(code);
                    }
                    return None;
                }
                WaitStatus::Signaled(_, sig, _) => {
                    if tid.as_raw() as u32 == main_pid {
                        *reaped = Some(128 + sig as i32);
                    }
                    return None;
                }
                _ => {}
            }
            let regs = ptrace::getregs(tid).ok()?;
            Some(unwind::walk_frame_pointers(tid, &regs))
        })();

        if let Err(e) = ptrace::detach(tid, None) {
            debug!(%tid, "ptrace detach failed: {e}");
        }

        let addrs = addrs?;
        Some(self.symbolize_stack(tid, &addrs))
    }

    /// Turn a leaf-first address list into a root-to-leaf sample.
    fn symbolize_stack(&self, tid: Pid, addrs: &[u64]) -> StackSample {
        let mut frames: Vec<_> = addrs
            .iter()
            .enumerate()
            .map(|(i, &ip)| match &self.symbolizer {
                Some(sym) => sym.frame_for(ip, i == 0),
                None => symbolize::placeholder_frame(ip),
            })
            .collect();
        frames.reverse();
        StackSample::new(frames, tid.as_raw() as u64)
    }
}

impl StackCapture for PtraceCapture {
    fn capture_all_stacks(&mut self) -> Result<Vec<StackSample>, CaptureError> {
        let tids = self.live_threads()?;
        if tids.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_symbolizer();

        let samples = tids
            .into_iter()
            .filter_map(|tid| self.capture_thread(tid))
            .collect();
        Ok(samples)
    }

    fn reaped_exit_code(&self) -> Option<i32> {
        self.reaped_exit
    }
}
