// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The task dispatcher: a bounded worker pool with restriction-aware scheduling.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use pledge::SpinLock;
use tracing::{debug, warn};

use crate::restriction::{INTENSIVE_KEY, Restriction};
use crate::worker::Worker;

const DEFAULT_TOTAL_CAPACITY: usize = 64;
const DEFAULT_CUSTOM_CAPACITY: usize = 16;

/// How long dispatcher teardown waits for workers to exit before detaching them.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// The capacity of the shared intensive bucket, computed once per process.
fn intensive_capacity() -> usize {
    static INTENSIVE_CAPACITY: Lazy<usize> =
        Lazy::new(|| thread::available_parallelism().map_or(1, NonZeroUsize::get));
    *INTENSIVE_CAPACITY
}

/// A pending unit of work: the erased producer thunk plus its restriction.
pub(crate) struct TaskInfo {
    pub(crate) job: Box<dyn FnOnce() + Send>,
    pub(crate) restriction: Restriction,
    pub(crate) key: String,
}

/// Schedules submitted tasks onto a bounded pool of worker threads.
///
/// Tasks are served in FIFO order subject to their restriction: a task blocked
/// by its bucket's capacity does not hold back tasks of other buckets - the
/// scheduler scans the queue and dispatches the first task that fits.
///
/// Most code uses the process-wide [`TaskDispatcher::instance`]. Dedicated
/// instances (e.g. [`TaskDispatcher::with_capacity`]) are primarily for tests
/// that need an isolated pool; dropping one stops its workers.
///
/// Submission itself cannot fail and is never blocked by user code; capacity
/// is an elasticity parameter, not a back-pressure signal.
pub struct TaskDispatcher {
    core: Arc<DispatcherCore>,
}

pub(crate) struct DispatcherCore {
    sched: SpinLock<Scheduler>,
}

/// All scheduling tables. Mutated only under the dispatcher spin lock.
struct Scheduler {
    workers: Vec<Worker>,
    idle_workers: BTreeSet<usize>,
    idle_bound_workers: BTreeSet<usize>,
    tasks: VecDeque<TaskInfo>,
    /// ThreadBound key -> the worker it is stuck to. Sticky for the
    /// dispatcher's lifetime once established.
    bindings: HashMap<String, usize>,
    /// Worker -> number of ThreadBound keys bound to it.
    bound_workers: HashMap<usize, usize>,
    /// Restriction -> key -> currently executing task count.
    in_use: HashMap<Restriction, HashMap<String, usize>>,
    custom_capacities: HashMap<String, usize>,
    capacity: usize,
    shutting_down: bool,
}

impl TaskDispatcher {
    /// The process-wide dispatcher, created on first use.
    #[must_use]
    pub fn instance() -> &'static Self {
        static INSTANCE: Lazy<TaskDispatcher> = Lazy::new(TaskDispatcher::new);
        &INSTANCE
    }

    /// Creates a dispatcher with the default global capacity of 64 workers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOTAL_CAPACITY)
    }

    /// Creates a dispatcher bounded to at most `capacity` workers (at least 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            core: Arc::new(DispatcherCore {
                sched: SpinLock::new(Scheduler {
                    workers: Vec::new(),
                    idle_workers: BTreeSet::new(),
                    idle_bound_workers: BTreeSet::new(),
                    tasks: VecDeque::new(),
                    bindings: HashMap::new(),
                    bound_workers: HashMap::new(),
                    in_use: HashMap::new(),
                    custom_capacities: HashMap::new(),
                    capacity: capacity.max(1),
                    shutting_down: false,
                }),
            }),
        }
    }

    /// The global worker capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.sched.lock().capacity
    }

    /// Changes the global worker capacity.
    ///
    /// The value is clamped to at least 1 and is applied only while the pool
    /// has not already grown past it; shrinking below the live worker count is
    /// refused (worker teardown is not supported).
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let mut sched = self.core.sched.lock();
        if sched.workers.len() <= capacity {
            sched.capacity = capacity;
            debug!(capacity, "task dispatcher capacity changed");
        } else {
            warn!(
                capacity,
                live_workers = sched.workers.len(),
                "refusing to shrink the task dispatcher below its live worker count"
            );
        }
    }

    /// Configures the capacity of the custom bucket `key`, clamped to
    /// `1..=capacity()`.
    pub fn add_custom_restrictor(&self, key: impl Into<String>, capacity: usize) {
        let mut sched = self.core.sched.lock();
        let capacity = capacity.clamp(1, sched.capacity);
        sched.custom_capacities.insert(key.into(), capacity);
    }

    /// The concurrency bound of the `(restriction, key)` bucket.
    ///
    /// ThreadBound buckets always have capacity 1, the intensive bucket is
    /// sized to the hardware concurrency, an empty key reports the global
    /// capacity, and custom keys report their configured capacity (default 16).
    #[must_use]
    pub fn restrictor_capacity(&self, restriction: Restriction, key: &str) -> usize {
        if restriction == Restriction::ThreadBound {
            return 1;
        }
        if restriction == Restriction::Intensive {
            return intensive_capacity();
        }
        let sched = self.core.sched.lock();
        if key.is_empty() {
            return sched.capacity;
        }
        sched
            .custom_capacities
            .get(key)
            .copied()
            .unwrap_or(DEFAULT_CUSTOM_CAPACITY)
    }

    /// Enqueues the task and runs a scheduling pass.
    pub(crate) fn insert_task(&self, job: Box<dyn FnOnce() + Send>, restriction: Restriction, key: String) {
        // All intensive tasks are pooled under one hidden bucket so they share
        // a single usage counter.
        let key = if restriction == Restriction::Intensive {
            INTENSIVE_KEY.to_owned()
        } else {
            key
        };
        let mut sched = self.core.sched.lock();
        sched.tasks.push_back(TaskInfo { job, restriction, key });
        sched.schedule(&self.core, None);
    }

    #[cfg(test)]
    fn live_worker_count(&self) -> usize {
        self.core.sched.lock().workers.len()
    }
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sched = self.core.sched.lock();
        f.debug_struct("TaskDispatcher")
            .field("capacity", &sched.capacity)
            .field("live_workers", &sched.workers.len())
            .field("pending_tasks", &sched.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Drop for TaskDispatcher {
    #[cfg_attr(test, mutants::skip)] // Tampering leaks worker threads across tests.
    fn drop(&mut self) {
        let mut workers = {
            let mut sched = self.core.sched.lock();
            sched.shutting_down = true;
            sched
                .workers
                .iter_mut()
                .map(|worker| (worker.shared(), worker.take_handle()))
                .collect::<Vec<_>>()
        };

        if workers.is_empty() {
            return;
        }

        for (shared, _) in &workers {
            shared.poison();
        }

        // Workers stuck in long producers get a grace period, then are
        // detached; their weak core reference ends them at the next completion.
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < deadline && workers.iter().any(|(shared, _)| !shared.has_exited()) {
            thread::sleep(Duration::from_millis(1));
        }

        for (shared, handle) in workers.drain(..) {
            if let Some(handle) = handle {
                if shared.has_exited() {
                    _ = handle.join();
                } else {
                    warn!("detaching a task worker that did not stop in time");
                    drop(handle);
                }
            }
        }
    }
}

impl DispatcherCore {
    /// Completion hook invoked by workers: releases the task's bucket slot,
    /// re-idles the worker, and runs a scheduling pass preferring it (warm
    /// caches) when it carries no bindings.
    pub(crate) fn on_task_finished(self: &Arc<Self>, worker_id: usize, restriction: Restriction, key: &str) {
        let mut sched = self.sched.lock();

        if Scheduler::restricted(restriction, key)
            && let Some(keys) = sched.in_use.get_mut(&restriction)
            && let Some(count) = keys.get_mut(key)
        {
            if *count <= 1 {
                keys.remove(key);
            } else {
                *count -= 1;
            }
        }

        if sched.bound_workers.contains_key(&worker_id) {
            sched.idle_bound_workers.insert(worker_id);
            sched.schedule(self, None);
        } else {
            sched.idle_workers.insert(worker_id);
            sched.schedule(self, Some(worker_id));
        }
    }
}

impl Scheduler {
    /// Whether `(restriction, key)` names a counted capacity bucket.
    fn restricted(restriction: Restriction, key: &str) -> bool {
        matches!(restriction, Restriction::Intensive | Restriction::Custom) && !key.is_empty()
    }

    /// One scheduling pass; dispatches at most one task. Runs on enqueue and
    /// on completion, always under the dispatcher lock.
    fn schedule(&mut self, core: &Arc<DispatcherCore>, forced: Option<usize>) {
        if self.shutting_down {
            return;
        }

        if self.idle_workers.is_empty() {
            let live = self.workers.len();
            if live < self.capacity {
                debug!(worker = live, "spawning a task worker");
                self.workers.push(Worker::spawn(live, Arc::downgrade(core)));
                self.idle_workers.insert(live);
            } else if let Some(&bound) = self.idle_bound_workers.iter().next() {
                // The pool is at capacity; borrow an idle bound worker for
                // general work.
                self.idle_bound_workers.remove(&bound);
                self.idle_workers.insert(bound);
            } else {
                return;
            }
        }

        let preferred = match forced {
            Some(id) if self.idle_workers.contains(&id) => id,
            _ => *self
                .idle_workers
                .iter()
                .next()
                .expect("an idle worker exists after provisioning"),
        };

        for index in 0..self.tasks.len() {
            let (restriction, key) = {
                let task = &self.tasks[index];
                (task.restriction, task.key.clone())
            };
            if let Some(worker_id) = self.place(restriction, &key, preferred) {
                let task = self.tasks.remove(index).expect("task index is in bounds");
                self.workers[worker_id].set_next_task(task);
                break;
            }
        }
    }

    /// Decides whether a task with `(restriction, key)` can run now and on
    /// which worker, updating bindings and usage counters accordingly.
    /// Returns `None` to leave the task queued.
    fn place(&mut self, restriction: Restriction, key: &str, preferred: usize) -> Option<usize> {
        let worker_id = match restriction {
            Restriction::ThreadBound => self.place_bound(key, preferred)?,
            Restriction::Intensive | Restriction::Custom if !key.is_empty() => {
                let limit = self.scheduling_capacity(restriction, key);
                let used = self
                    .in_use
                    .get(&restriction)
                    .and_then(|keys| keys.get(key))
                    .copied()
                    .unwrap_or(0);
                if used >= limit {
                    return None;
                }
                *self
                    .in_use
                    .entry(restriction)
                    .or_default()
                    .entry(key.to_owned())
                    .or_insert(0) += 1;
                preferred
            }
            _ => preferred,
        };

        self.idle_workers.remove(&worker_id);
        self.idle_bound_workers.remove(&worker_id);
        Some(worker_id)
    }

    /// Picks the worker for a ThreadBound task, establishing the binding when
    /// the key sees its first task.
    fn place_bound(&mut self, key: &str, preferred: usize) -> Option<usize> {
        if let Some(&bound) = self.bindings.get(key) {
            if self.idle_workers.contains(&bound) || self.idle_bound_workers.contains(&bound) {
                return Some(bound);
            }
            // The bound worker is busy; the task stays queued until it frees up.
            return None;
        }

        let chosen = if self.bound_workers.len() < self.capacity {
            if self.bound_workers.contains_key(&preferred) {
                self.idle_workers
                    .iter()
                    .copied()
                    .find(|candidate| !self.bound_workers.contains_key(candidate))?
            } else {
                preferred
            }
        } else {
            // Every worker already carries bindings; double up on the
            // least-loaded idle one, bound workers first, ties by id order.
            let mut best: Option<(usize, usize)> = None;
            for &candidate in self.idle_bound_workers.iter().chain(self.idle_workers.iter()) {
                let load = self.bound_workers.get(&candidate).copied().unwrap_or(0);
                if best.is_none_or(|(_, best_load)| load < best_load) {
                    best = Some((candidate, load));
                }
            }
            best?.0
        };

        *self.bound_workers.entry(chosen).or_insert(0) += 1;
        self.bindings.insert(key.to_owned(), chosen);
        Some(chosen)
    }

    /// The capacity the scheduler charges `(restriction, key)` against.
    fn scheduling_capacity(&self, restriction: Restriction, key: &str) -> usize {
        match restriction {
            Restriction::Intensive => intensive_capacity(),
            Restriction::Custom => self
                .custom_capacities
                .get(key)
                .copied()
                .unwrap_or(DEFAULT_CUSTOM_CAPACITY),
            _ => self.capacity,
        }
    }
}
