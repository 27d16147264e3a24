// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Worker-thread-only glue for waiting on external signals.
//!
//! A worker blocked on an external event would otherwise occupy its pool slot
//! in a plain blocking wait with no way to be signalled cooperatively.
//! Instead, the task registers one or more *connectors* with
//! [`add_signal_waiter`] - each connector wires an external signal source to
//! the handed-out [`SignalWaiterHandle`] - and then parks in
//! [`fire_signal_waiters`] until one of the sources calls
//! [`SignalWaiterHandle::quit`].
//!
//! All registration state is thread-local to the calling worker; both entry
//! points panic when called from outside the worker pool.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

thread_local! {
    static IS_POOL_THREAD: Cell<bool> = const { Cell::new(false) };
    static SIGNAL_LOOP: RefCell<Option<Arc<SignalLoop>>> = const { RefCell::new(None) };
}

/// Marks the current thread as a dispatcher worker. Called once from the
/// worker loop before the first task runs.
pub(crate) fn mark_pool_thread() {
    IS_POOL_THREAD.with(|flag| flag.set(true));
}

fn assert_pool_thread(operation: &str) {
    assert!(
        IS_POOL_THREAD.with(Cell::get),
        "{operation} can't be used outside of the task worker pool"
    );
}

/// The latch a worker parks on between registration and quit.
///
/// A quit arriving before the wait starts is remembered, so no wakeup can be
/// lost on the racy side of registration.
struct SignalLoop {
    quit: Mutex<bool>,
    signaled: Condvar,
}

impl SignalLoop {
    fn new() -> Self {
        Self {
            quit: Mutex::new(false),
            signaled: Condvar::new(),
        }
    }

    fn quit(&self) {
        *self.quit.lock() = true;
        self.signaled.notify_all();
    }

    fn run(&self) {
        let mut quit = self.quit.lock();
        while !*quit {
            self.signaled.wait(&mut quit);
        }
    }
}

/// A cloneable, thread-safe handle ending one worker's signal wait.
#[derive(Clone)]
pub struct SignalWaiterHandle {
    signal_loop: Arc<SignalLoop>,
}

impl SignalWaiterHandle {
    /// Ends the wait of the worker this handle was handed out to. May be
    /// called from any thread, before or after the wait started.
    pub fn quit(&self) {
        self.signal_loop.quit();
    }
}

impl fmt::Debug for SignalWaiterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalWaiterHandle").finish_non_exhaustive()
    }
}

/// Registers a connector for the current worker's next signal wait.
///
/// The connector is invoked immediately with the handle of the worker's
/// (lazily created) signal latch and is expected to arrange for some external
/// source to eventually call [`SignalWaiterHandle::quit`] on it.
///
/// # Panics
///
/// Panics when called from a thread that is not a dispatcher worker.
pub fn add_signal_waiter<F>(connector: F)
where
    F: FnOnce(SignalWaiterHandle),
{
    assert_pool_thread("add_signal_waiter");
    let handle = SIGNAL_LOOP.with(|slot| {
        let mut slot = slot.borrow_mut();
        let signal_loop = slot.get_or_insert_with(|| Arc::new(SignalLoop::new()));
        SignalWaiterHandle {
            signal_loop: Arc::clone(signal_loop),
        }
    });
    connector(handle);
}

/// Parks the current worker until a registered connector quits its latch,
/// then clears the registration state. Returns immediately when nothing was
/// registered since the last wait.
///
/// # Panics
///
/// Panics when called from a thread that is not a dispatcher worker.
pub fn fire_signal_waiters() {
    assert_pool_thread("fire_signal_waiters");
    let Some(signal_loop) = SIGNAL_LOOP.with(|slot| slot.borrow().clone()) else {
        return;
    };
    signal_loop.run();
    SIGNAL_LOOP.with(|slot| *slot.borrow_mut() = None);
    debug!("signal waiters fired");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_signal_waiter_panics_off_the_pool() {
        let result = std::panic::catch_unwind(|| add_signal_waiter(|_| {}));
        assert!(result.is_err());
    }

    #[test]
    fn fire_signal_waiters_panics_off_the_pool() {
        let result = std::panic::catch_unwind(fire_signal_waiters);
        assert!(result.is_err());
    }

    #[test]
    fn quit_before_run_is_not_lost() {
        let signal_loop = Arc::new(SignalLoop::new());
        signal_loop.quit();
        // Returns immediately because the quit flag is latched.
        signal_loop.run();
    }
}
