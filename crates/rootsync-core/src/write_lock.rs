use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::thread::{self, ThreadId};

/// Project-wide exclusive write access.
///
/// Re-entrant for the owning thread so a caller that already holds the scope
/// (a test driving a synchronous pass) can run code that acquires it again.
/// Library tables check [`WriteLock::is_held_by_current_thread`] before mutating.
#[derive(Default)]
pub struct WriteLock {
    lock: ReentrantMutex<()>,
    // owning thread and nesting depth
    holder: Mutex<Option<(ThreadId, usize)>>,
}

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the scope is available, then hold it until the guard drops.
    pub fn acquire(&self) -> WriteScope<'_> {
        let guard = self.lock.lock();
        self.enter();
        WriteScope {
            owner: self,
            _guard: guard,
        }
    }

    pub fn try_acquire(&self) -> Option<WriteScope<'_>> {
        let guard = self.lock.try_lock()?;
        self.enter();
        Some(WriteScope {
            owner: self,
            _guard: guard,
        })
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        matches!(*self.holder.lock(), Some((owner, _)) if owner == me)
    }

    pub fn is_locked(&self) -> bool {
        self.holder.lock().is_some()
    }

    fn enter(&self) {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        match holder.as_mut() {
            Some((owner, depth)) if *owner == me => *depth += 1,
            _ => *holder = Some((me, 1)),
        }
    }

    fn exit(&self) {
        let mut holder = self.holder.lock();
        if let Some((_, depth)) = holder.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *holder = None;
            }
        }
    }
}

impl std::fmt::Debug for WriteLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Held exclusive write access. Not `Send`: the scope belongs to the acquiring thread.
pub struct WriteScope<'a> {
    owner: &'a WriteLock,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl WriteScope<'_> {
    pub fn is_scope_of(&self, lock: &WriteLock) -> bool {
        std::ptr::eq(self.owner, lock)
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        // runs before the guard field is released
        self.owner.exit();
    }
}
