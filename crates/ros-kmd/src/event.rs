use std::sync::{Condvar, Mutex, MutexGuard};

/// Auto-reset event: one `wait` consumes one or more coalesced `set` calls.
#[derive(Debug, Default)]
pub(crate) struct SyncEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl SyncEvent {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        match self.signaled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn set(&self) {
        *self.lock() = true;
        self.cond.notify_one();
    }

    /// Drops a pending signal without waiting.
    pub(crate) fn reset(&self) {
        *self.lock() = false;
    }

    pub(crate) fn wait(&self) {
        let mut signaled = self.lock();
        while !*signaled {
            signaled = match self.cond.wait(signaled) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *signaled = false;
    }
}
