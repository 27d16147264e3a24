// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The worker thread owning one task slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::dispatcher::{DispatcherCore, TaskInfo};
use crate::signal_waiters;

/// One pool thread. The dispatcher hands it at most one task at a time
/// through [`Worker::set_next_task`]; the thread parks on its condition
/// variable between tasks.
pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    handle: Option<thread::JoinHandle<()>>,
}

/// State shared between the dispatcher and the worker thread.
pub(crate) struct WorkerShared {
    /// Written by the dispatcher, taken by the worker, both under this mutex.
    slot: Mutex<Option<TaskInfo>>,
    wake: Condvar,
    poisoned: AtomicBool,
    exited: AtomicBool,
}

impl WorkerShared {
    /// Tells the worker to exit. A poison pill wins over a task already
    /// sitting in the slot.
    #[cfg_attr(test, mutants::skip)] // Tampering leaves worker threads running forever.
    pub(crate) fn poison(&self) {
        // Taking the slot mutex pins the worker either before its own poison
        // check or inside the condvar wait, so the notification cannot be lost.
        let _slot = self.slot.lock();
        self.poisoned.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }
}

impl Worker {
    /// Spawns the worker thread. The thread holds only a weak reference to the
    /// dispatcher core, so a dropped dispatcher ends it at the next completion.
    pub(crate) fn spawn(id: usize, core: Weak<DispatcherCore>) -> Self {
        let shared = Arc::new(WorkerShared {
            slot: Mutex::new(None),
            wake: Condvar::new(),
            poisoned: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        });

        let handle = thread::Builder::new()
            .name(format!("corral-worker-{id}"))
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker_loop(id, &shared, &core)
            })
            .expect("failed to spawn a task worker thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    pub(crate) fn set_next_task(&self, task: TaskInfo) {
        let mut slot = self.shared.slot.lock();
        *slot = Some(task);
        self.shared.wake.notify_all();
    }

    pub(crate) fn shared(&self) -> Arc<WorkerShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn take_handle(&mut self) -> Option<thread::JoinHandle<()>> {
        self.handle.take()
    }
}

#[cfg_attr(test, mutants::skip)] // The loop is load-bearing for every dispatcher test.
fn worker_loop(id: usize, shared: &Arc<WorkerShared>, core: &Weak<DispatcherCore>) {
    signal_waiters::mark_pool_thread();
    trace!(worker = id, "task worker started");

    loop {
        let task = {
            let mut slot = shared.slot.lock();
            loop {
                if shared.poisoned.load(Ordering::Acquire) {
                    break None;
                }
                if let Some(task) = slot.take() {
                    break Some(task);
                }
                shared.wake.wait(&mut slot);
            }
        };

        let Some(task) = task else { break };
        let TaskInfo { job, restriction, key } = task;

        // The producer itself marshals success/failure into its promise; the
        // worker only has to run it and report back for rescheduling.
        job();

        let Some(core) = core.upgrade() else { break };
        core.on_task_finished(id, restriction, &key);
        drop(core);

        thread::yield_now();
    }

    shared.exited.store(true, Ordering::Release);
    trace!(worker = id, "task worker stopped");
}
