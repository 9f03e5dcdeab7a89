//! The thread: a stack of frames plus the per-thread exception state, and
//! the process-wide import lock frames acquire while initializing a
//! module (spec.md §4.13 supplement, scenario F).

use crate::exception::ExceptionState;
use crate::frame::Frame;
use std::sync::{Mutex, MutexGuard};
use talon_core::RawObject;

/// A single process-wide lock acquired around module initialization,
/// grounded on the reference implementation's `imp-module.cpp` import
/// lock: this engine runs cooperatively (spec.md §5, one OS thread at a
/// time actually executing bytecode), so the lock's job is not mutual
/// exclusion between running threads but re-entrancy *detection* — a
/// module whose own top-level code tries to re-import itself must be
/// told "already in progress" rather than deadlocking or double-running.
pub struct ImportLock {
    state: Mutex<Option<String>>,
}

impl Default for ImportLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportLock {
    pub fn new() -> Self {
        ImportLock { state: Mutex::new(None) }
    }

    /// Attempt to begin importing `module_name`. Returns `Err` with the
    /// name already in progress if a circular import is detected;
    /// otherwise returns a guard that clears the in-progress marker on
    /// drop.
    pub fn begin_import(&self, module_name: &str) -> Result<ImportGuard<'_>, String> {
        let mut guard = self.state.lock().unwrap();
        if let Some(in_progress) = guard.as_deref() {
            if in_progress == module_name {
                return Err(in_progress.to_string());
            }
        }
        *guard = Some(module_name.to_string());
        drop(guard);
        Ok(ImportGuard { lock: self, module_name: module_name.to_string() })
    }

    fn finish_import(&self) {
        let mut guard = self.state.lock().unwrap();
        *guard = None;
    }

    fn raw_lock(&self) -> MutexGuard<'_, Option<String>> {
        self.state.lock().unwrap()
    }
}

/// RAII guard held for the duration of one module's top-level execution.
pub struct ImportGuard<'a> {
    lock: &'a ImportLock,
    module_name: String,
}

impl Drop for ImportGuard<'_> {
    fn drop(&mut self) {
        self.lock.finish_import();
    }
}

impl ImportGuard<'_> {
    pub fn module_name(&self) -> &str {
        &self.module_name
    }
}

/// One logical thread of execution: a frame stack (innermost last) and its
/// exception state. Cooperative scheduling (spec.md §5) means only one
/// `Thread` is ever actually running bytecode at a time, but multiple
/// `Thread`s may exist suspended, each with its own frame stack.
pub struct Thread {
    pub frames: Vec<Frame>,
    pub exception: ExceptionState,
}

impl Thread {
    pub fn new() -> Self {
        Thread { frames: Vec::new(), exception: ExceptionState::new() }
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Roots for a scavenge: every frame's locals and value stack, plus
    /// the pending exception if any.
    pub fn roots_mut(&mut self) -> Vec<&mut RawObject> {
        let mut roots: Vec<&mut RawObject> = Vec::new();
        for frame in &mut self.frames {
            roots.extend(frame.roots_mut());
        }
        roots
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_lock_allows_sequential_imports() {
        let lock = ImportLock::new();
        {
            let _g = lock.begin_import("a").unwrap();
        }
        let _g2 = lock.begin_import("b").unwrap();
    }

    #[test]
    fn import_lock_detects_self_recursive_import() {
        let lock = ImportLock::new();
        let _g = lock.begin_import("a").unwrap();
        let err = lock.begin_import("a");
        assert_eq!(err, Err("a".to_string()));
    }

    #[test]
    fn import_lock_releases_on_drop() {
        let lock = ImportLock::new();
        {
            let _g = lock.begin_import("a").unwrap();
            assert!(lock.raw_lock().is_some());
        }
        assert!(lock.raw_lock().is_none());
    }

    #[test]
    fn thread_starts_with_no_frames() {
        let thread = Thread::new();
        assert_eq!(thread.depth(), 0);
    }
}
