//! Language-runtime lock
//!
//! Language code (overrides, attribute access, wrapper bookkeeping that runs
//! language callbacks) executes under one reentrant lock per runtime. Native
//! calls that block must run inside `allow_threads`, which fully releases the
//! lock and reacquires it to the same depth before returning.
//!
//! `parking_lot::ReentrantMutex` only unlocks one level per guard, so it
//! cannot give up every nested level at once and restore them afterwards.
//! The owner and depth are therefore tracked by hand under a plain mutex.

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use tracing::trace;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

#[derive(Debug, Default)]
pub struct LanguageLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl LanguageLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire (or re-enter) the lock on the current thread
    pub fn acquire(&self) -> GilGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
        } else {
            while state.owner.is_some() {
                self.released.wait(&mut state);
            }
            state.owner = Some(me);
            state.depth = 1;
        }
        GilGuard { lock: self }
    }

    /// Whether the current thread holds the lock
    pub fn is_held(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    fn release_one(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
    }

    /// Run `f` with the lock fully released, restoring the previous depth afterwards
    ///
    /// Calling it without holding the lock just runs `f`.
    pub fn allow_threads<T, F: FnOnce() -> T>(&self, f: F) -> T {
        let me = thread::current().id();
        let saved = {
            let mut state = self.state.lock();
            if state.owner != Some(me) {
                None
            } else {
                let depth = state.depth;
                state.owner = None;
                state.depth = 0;
                self.released.notify_one();
                Some(depth)
            }
        };
        trace!(event = "gil_released", depth = saved.unwrap_or(0), "Language lock released");

        let _restore = saved.map(|depth| RestoreOnExit { lock: self, depth });
        f()
    }
}

/// Scope of one `acquire`
#[must_use]
pub struct GilGuard<'a> {
    lock: &'a LanguageLock,
}

impl Drop for GilGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_one();
    }
}

struct RestoreOnExit<'a> {
    lock: &'a LanguageLock,
    depth: usize,
}

impl Drop for RestoreOnExit<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = self.lock.state.lock();
        while state.owner.is_some() {
            self.lock.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = self.depth;
    }
}
