//! Scoped exclusive locks
//!
//! Every layer owns a reentrant [`Gate`]. A layer's `lock()` takes its own
//! gate and then its source's lock, so a guard always covers the whole chain
//! down to the table, acquired outer to inner. Gates are reentrant because
//! change handlers run on the mutating thread and call back into the source
//! that is already locked.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Guard over a chain of gates, released on drop (inner first).
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock<'a> {
    guards: Vec<ReentrantMutexGuard<'a, ()>>,
}

impl<'a> ScopedLock<'a> {
    fn single(guard: ReentrantMutexGuard<'a, ()>) -> Self {
        Self {
            guards: vec![guard],
        }
    }

    /// Appends an inner lock acquired after this one.
    pub fn then(mut self, mut inner: ScopedLock<'a>) -> Self {
        self.guards.append(&mut inner.guards);
        self
    }

    /// Number of gates held.
    pub fn depth(&self) -> usize {
        self.guards.len()
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Reentrant exclusive gate of one layer.
#[derive(Default)]
pub struct Gate {
    mutex: ReentrantMutex<()>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the gate is held by the calling thread.
    pub fn lock(&self) -> ScopedLock<'_> {
        ScopedLock::single(self.mutex.lock())
    }

    /// Takes the gate if no other thread holds it.
    pub fn try_lock(&self) -> Option<ScopedLock<'_>> {
        self.mutex.try_lock().map(ScopedLock::single)
    }
}
