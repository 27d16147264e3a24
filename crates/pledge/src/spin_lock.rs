// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A mutual-exclusion primitive for very short critical sections.

use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How many acquire attempts a single `try_lock` round makes before giving up.
const SPIN_ATTEMPTS: usize = 10;

/// How long `lock` sleeps between failed spin rounds.
const SLEEP_BETWEEN_ROUNDS: Duration = Duration::from_millis(1);

/// A test-and-set spin lock protecting a value of type `T`.
///
/// Intended exclusively for critical sections of a few dozen instructions
/// (callback list splices, counter and table updates). A contended acquisition
/// spins briefly and then sleeps in 1 ms rounds rather than parking the thread,
/// so holders must never block while the lock is held.
pub struct SpinLock<T> {
    locked: AtomicBool,
    cell: UnsafeCell<T>,
}

// SAFETY: moving the lock moves the protected value with it; `T: Send` is all
// that is required for that to be sound.
unsafe impl<T: Send> Send for SpinLock<T> {}

// SAFETY: the atomic flag guarantees at most one guard exists at a time, so
// shared references to the lock only ever hand out exclusive access to the
// protected value. `T: Send` suffices because the value itself is never
// observable from two threads at once.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked spin lock protecting `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            cell: UnsafeCell::new(value),
        }
    }

    /// Makes a bounded number of acquire attempts and returns `None` when all fail.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        for _ in 0..SPIN_ATTEMPTS {
            if !self.locked.swap(true, Ordering::Acquire) {
                return Some(SpinLockGuard { lock: self });
            }
            hint::spin_loop();
        }
        None
    }

    /// Acquires the lock, sleeping between failed spin rounds.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            thread::sleep(SLEEP_BETWEEN_ROUNDS);
        }
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// RAII guard returned by [`SpinLock::lock`] and [`SpinLock::try_lock`];
/// releases the lock on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists, therefore this thread owns the lock and no
        // other reference to the cell can be produced until the guard drops.
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref` - guard ownership implies exclusive access.
        unsafe { &mut *self.lock.cell.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn guard_gives_access_to_the_value() {
        let lock = SpinLock::new(5);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn contended_increments_are_not_lost() {
        const THREADS: usize = 8;
        const INCREMENTS: usize = 1000;

        let lock = Arc::new(SpinLock::new(0_usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..INCREMENTS {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), THREADS * INCREMENTS);
    }
}
