use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flag raised while the engine saves a document itself, so the save hook
/// does not unify the same document again.
///
/// Clones share the flag. Only one guarded region is expected at a time.
#[derive(Debug, Clone, Default)]
pub struct ReentrancyGuard {
    flag: Arc<AtomicBool>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Raises the flag until the returned token is dropped.
    pub fn acquire(&self) -> GuardToken<'_> {
        let was_held = self.flag.swap(true, Ordering::SeqCst);
        debug_assert!(!was_held, "nested guarded regions are not supported");
        GuardToken { guard: self }
    }

    pub fn guarded<T>(&self, action: impl FnOnce() -> T) -> T {
        let _token = self.acquire();
        action()
    }
}

#[must_use = "the guard is released as soon as the token is dropped"]
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.flag.store(false, Ordering::SeqCst);
    }
}
