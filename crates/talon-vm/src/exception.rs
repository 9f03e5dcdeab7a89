//! Pending-exception state and the traceback chain attached to it.
//!
//! The pending exception itself is carried as a `RawObject` (the tagged
//! error sentinel, or a heap exception instance once user-defined
//! exception types exist) per spec.md §7; `ExceptionState` is the
//! thread-local bookkeeping around it, grounded on the thread-local
//! `LAST_ERROR`/`ERROR_CSTRING` pair in
//! `examples/navicore-cem3/crates/runtime/src/error.rs`, generalized from
//! a single C-string message to a full traceback chain.

use talon_core::RawObject;

/// One frame's worth of context in a traceback, linked innermost-first.
#[derive(Debug, Clone)]
pub struct TracebackEntry {
    pub function_name: String,
    pub filename: String,
    pub line: u32,
    pub next: Option<Box<TracebackEntry>>,
}

/// The thread-local "is there a pending exception, and if so what" state
/// the interpreter consults after every opcode that can raise.
#[derive(Debug, Default)]
pub struct ExceptionState {
    pending: Option<RawObject>,
    traceback: Option<TracebackEntry>,
}

impl ExceptionState {
    pub fn new() -> Self {
        ExceptionState::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn set(&mut self, exception: RawObject) {
        self.pending = Some(exception);
        self.traceback = None;
    }

    /// Prepend one more frame of context to the current traceback, the
    /// way unwinding through `Continuation::Unwind` accumulates frames as
    /// the exception propagates outward.
    pub fn push_traceback(&mut self, function_name: String, filename: String, line: u32) {
        let next = self.traceback.take().map(Box::new);
        self.traceback = Some(TracebackEntry { function_name, filename, line, next });
    }

    pub fn take(&mut self) -> Option<(RawObject, Option<TracebackEntry>)> {
        self.pending.take().map(|exc| (exc, self.traceback.take()))
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.traceback = None;
    }

    pub fn peek(&self) -> Option<RawObject> {
        self.pending
    }
}
