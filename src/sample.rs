//! Stack sample value types and the folded-stack key
//!
//! A `StackSample` is one thread's call stack at one instant, root to
//! leaf. Its `key()` is the canonical folded representation used by the
//! aggregator: `file:function` per frame, joined with `;`. Two samples
//! with identical frame sequences fold to the same key regardless of
//! which thread they came from or when they were taken.

use std::time::Instant;

/// One resolved frame of a call stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackFrame {
    /// Function name (raw symbol name if demangling info is unavailable)
    pub function_name: String,
    /// Source file basename, or a placeholder for unresolved addresses
    pub source_file: String,
    /// Line number, 0 when unknown
    pub line_number: u32,
}

impl StackFrame {
    pub fn new(
        function_name: impl Into<String>,
        source_file: impl Into<String>,
        line_number: u32,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            source_file: source_file.into(),
            line_number,
        }
    }
}

/// One captured call stack for one thread.
///
/// `frames` is ordered root (outermost caller) to leaf (where the thread
/// was executing). An empty frame list is the degenerate case of a thread
/// with no resolvable frames, not an error.
#[derive(Debug, Clone)]
pub struct StackSample {
    pub frames: Vec<StackFrame>,
    /// Kernel thread id; unique within the target at capture time only
    pub thread_id: u64,
    /// Monotonic capture timestamp
    pub captured_at: Instant,
}

impl StackSample {
    pub fn new(frames: Vec<StackFrame>, thread_id: u64) -> Self {
        Self {
            frames,
            thread_id,
            captured_at: Instant::now(),
        }
    }

    /// Canonical grouping key: `file:function` per frame, root to leaf,
    /// joined with `;`. Thread id and timestamp do not participate.
    pub fn key(&self) -> String {
        let mut key = String::with_capacity(self.frames.len() * 32);
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                key.push(';');
            }
            key.push_str(&frame.source_file);
            key.push(':');
            key.push_str(&frame.function_name);
        }
        key
    }
}
