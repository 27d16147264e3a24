// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared one-shot result cell and its combinator surface.

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::spin_lock::SpinLock;
use crate::{Failure, Promise, last_failure};

const PENDING: u8 = 0;
const SUCCEEDED: u8 = 1;
const FAILED: u8 = 2;

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send>;
type FailureCallback = Box<dyn FnOnce(&Failure) + Send>;

/// A shared handle to a one-shot result cell.
///
/// A future starts out pending and transitions exactly once to either
/// succeeded (carrying a value) or failed (carrying a [`Failure`]). Handles
/// are cheap to clone; all clones observe the same cell.
///
/// Futures are created by a [`Promise`], by the [`Future::successful`] /
/// [`Future::fail`] factories, or by one of the combinators below. Observer
/// callbacks registered while pending run exactly once at the transition;
/// callbacks registered after completion run inline with the stored outcome.
///
/// Sharing a future across threads requires `T: Send + Sync`; the stored value
/// is written once and read immutably (possibly concurrently) afterwards.
pub struct Future<T> {
    inner: Arc<FutureInner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            SUCCEEDED => "succeeded",
            FAILED => "failed",
            _ => "pending",
        };
        f.debug_struct("Future").field("state", &state).finish_non_exhaustive()
    }
}

struct FutureInner<T> {
    /// Acquire loads everywhere; the single release store happens at the
    /// transition, after the matching cell below was written.
    state: AtomicU8,

    /// Written once, under `callbacks`, right before the release store of
    /// `state`. Read without the lock once an acquire load observes completion.
    value: spin_cell::OnceSlot<T>,
    reason: spin_cell::OnceSlot<Failure>,

    callbacks: SpinLock<Callbacks<T>>,
}

struct Callbacks<T> {
    on_success: Vec<SuccessCallback<T>>,
    on_failure: Vec<FailureCallback>,
}

mod spin_cell {
    //! A write-once cell whose reads are synchronized externally by the
    //! owning future's state atomic.

    use std::cell::UnsafeCell;

    pub(super) struct OnceSlot<T>(UnsafeCell<Option<T>>);

    impl<T> OnceSlot<T> {
        pub(super) const fn empty() -> Self {
            Self(UnsafeCell::new(None))
        }

        /// Stores the value. Callers must hold the owning future's callback
        /// lock and must have verified the future is still pending, which
        /// makes this the only write that will ever happen.
        pub(super) fn set(&self, value: T) {
            // SAFETY: per the contract above there is exactly one writer and
            // no reader can exist yet (readers require the state atomic to
            // show completion, which is only stored after this write).
            unsafe { *self.0.get() = Some(value) };
        }

        /// Reads the value. Callers must have observed the owning future as
        /// completed through an acquire load, after which the slot is
        /// immutable and shared reads are safe.
        pub(super) fn get(&self) -> Option<&T> {
            // SAFETY: completion was observed with acquire ordering, so the
            // release-published write above happened-before this read and no
            // further writes are possible.
            unsafe { &*self.0.get() }.as_ref()
        }
    }
}

// SAFETY: the cells only ever hold a value transferred in from one thread and
// handed out by shared reference afterwards; `T: Send` covers the transfer and
// the boxed callbacks are themselves `Send`.
unsafe impl<T: Send> Send for FutureInner<T> {}

// SAFETY: all mutation happens under the callback spin lock while pending;
// after the release store of `state`, the value/reason cells are read-only.
// Concurrent `&T` reads from several threads require `T: Sync`, concurrent
// writes never happen.
unsafe impl<T: Send + Sync> Sync for FutureInner<T> {}

/// Runs an observer callback, dropping any panic it raises.
///
/// Observer callbacks must be infallible by contract; they can never affect
/// the chain they observe.
fn swallow_panic(f: impl FnOnce()) {
    _ = panic::catch_unwind(AssertUnwindSafe(f));
}

impl<T> Future<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new_pending() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                state: AtomicU8::new(PENDING),
                value: spin_cell::OnceSlot::empty(),
                reason: spin_cell::OnceSlot::empty(),
                callbacks: SpinLock::new(Callbacks {
                    on_success: Vec::new(),
                    on_failure: Vec::new(),
                }),
            }),
        }
    }

    /// Creates an already-succeeded future holding `value`.
    #[must_use]
    pub fn successful(value: T) -> Self {
        let future = Self::new_pending();
        future.fill_success(value);
        future
    }

    /// Creates an already-failed future holding `reason`.
    #[must_use]
    pub fn fail(reason: Failure) -> Self {
        let future = Self::new_pending();
        future.fill_failure(reason);
        future
    }

    /// Whether the future has transitioned out of pending.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != PENDING
    }

    /// Whether the future completed with a value.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == SUCCEEDED
    }

    /// Whether the future completed with a failure.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FAILED
    }

    /// Records a success, unless the current thread's failure slot holds a
    /// pending failure - in that case the failure is recorded instead and the
    /// slot is cleared. A second fill of any kind is silently ignored.
    #[cfg_attr(test, mutants::skip)] // Fill primitive - tampering hangs dependent chains.
    pub(crate) fn fill_success(&self, value: T) {
        if let Some(failure) = last_failure::take_last_failure() {
            self.fill_failure(failure);
            return;
        }

        let callbacks = {
            let mut guard = self.inner.callbacks.lock();
            if self.completed() {
                return;
            }
            self.inner.value.set(value);
            self.inner.state.store(SUCCEEDED, Ordering::Release);

            guard.on_failure.clear();
            mem::take(&mut guard.on_success)
        };

        let value = self.inner.value.get().expect("succeeded future holds a value");
        for callback in callbacks {
            swallow_panic(|| callback(value));
        }
    }

    /// Records a failure. A second fill of any kind is silently ignored.
    ///
    /// The thread-local failure slot is deliberately not consulted here.
    #[cfg_attr(test, mutants::skip)] // Fill primitive - tampering hangs dependent chains.
    pub(crate) fn fill_failure(&self, reason: Failure) {
        let callbacks = {
            let mut guard = self.inner.callbacks.lock();
            if self.completed() {
                return;
            }
            self.inner.reason.set(reason);
            self.inner.state.store(FAILED, Ordering::Release);

            guard.on_success.clear();
            mem::take(&mut guard.on_failure)
        };

        let reason = self.inner.reason.get().expect("failed future holds a reason");
        for callback in callbacks {
            swallow_panic(|| callback(reason));
        }
    }

    /// Registers an observer for the success outcome and returns the same future.
    ///
    /// When the future is already completed, a matching callback runs inline.
    /// Observers cannot affect the chain; panics inside them are dropped.
    pub fn on_success<F>(&self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let not_registered = {
            let mut guard = self.inner.callbacks.lock();
            if self.completed() {
                Some(f)
            } else {
                guard.on_success.push(Box::new(f));
                None
            }
        };

        if let Some(f) = not_registered
            && self.succeeded()
        {
            let value = self.inner.value.get().expect("succeeded future holds a value");
            swallow_panic(move || f(value));
        }
        self.clone()
    }

    /// Registers an observer for the failure outcome and returns the same future.
    ///
    /// When the future is already completed, a matching callback runs inline.
    /// Observers cannot affect the chain; panics inside them are dropped.
    pub fn on_failure<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Failure) + Send + 'static,
    {
        let not_registered = {
            let mut guard = self.inner.callbacks.lock();
            if self.completed() {
                Some(f)
            } else {
                guard.on_failure.push(Box::new(f));
                None
            }
        };

        if let Some(f) = not_registered
            && self.failed()
        {
            let reason = self.inner.reason.get().expect("failed future holds a reason");
            swallow_panic(move || f(reason));
        }
        self.clone()
    }

    /// Alias for [`Future::on_success`].
    pub fn for_each<F>(&self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_success(f)
    }

    /// Blocks the calling thread until the future completes.
    #[cfg_attr(test, mutants::skip)] // Tampering with the wait loop hangs tests.
    pub fn wait(&self) {
        _ = self.wait_until(None);
    }

    /// Blocks the calling thread until the future completes or `timeout`
    /// elapses; returns whether completion was observed.
    ///
    /// A zero timeout is a completion probe. Waiting never cancels the source.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.wait_until(Some(timeout))
    }

    #[cfg_attr(test, mutants::skip)] // Tampering with the wait loop hangs tests.
    fn wait_until(&self, timeout: Option<Duration>) -> bool {
        if self.completed() {
            return true;
        }

        // The latch flag (not just the condvar) matters: when the future
        // completes concurrently with the registrations below, the callback
        // runs inline on this very thread before we start waiting.
        let latch = Arc::new((Mutex::new(false), Condvar::new()));
        {
            let latch = Arc::clone(&latch);
            self.on_success(move |_| {
                let (flag, signal) = &*latch;
                *flag.lock() = true;
                signal.notify_all();
            });
        }
        {
            let latch = Arc::clone(&latch);
            self.on_failure(move |_| {
                let (flag, signal) = &*latch;
                *flag.lock() = true;
                signal.notify_all();
            });
        }

        let (flag, signal) = &*latch;
        let mut done = flag.lock();
        match timeout {
            None => {
                while !*done {
                    signal.wait(&mut done);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*done {
                    if Instant::now() >= deadline || signal.wait_until(&mut done, deadline).timed_out() {
                        break;
                    }
                }
                *done
            }
        }
    }

    /// Blocks until completion and returns the stored value, or `T::default()`
    /// when the future failed.
    ///
    /// Returning a default instead of panicking keeps chains composable; the
    /// failure itself is available through [`Future::failure_reason`].
    #[must_use]
    pub fn result(&self) -> T
    where
        T: Clone + Default,
    {
        if !self.completed() {
            self.wait();
        }
        self.success_value().unwrap_or_default()
    }

    /// Blocks until completion and returns the stored failure, or a
    /// default (non-existent) one when the future succeeded.
    #[must_use]
    pub fn failure_reason(&self) -> Failure {
        if !self.completed() {
            self.wait();
        }
        if self.failed() {
            self.inner.reason.get().cloned().unwrap_or_default()
        } else {
            Failure::default()
        }
    }

    /// A clone of the stored value when the future succeeded.
    pub(crate) fn success_value(&self) -> Option<T>
    where
        T: Clone,
    {
        if self.succeeded() { self.inner.value.get().cloned() } else { None }
    }

    /// Derives a future holding `f` applied to this future's value.
    ///
    /// A source failure is forwarded untouched; a panic inside `f` fails the
    /// derived future with [`Failure::from_panic`]. The success write honors
    /// the thread-local failure slot, so `f` may bail out through
    /// [`WithFailure`](crate::WithFailure).
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let result = Future::new_pending();
        let downstream = result.clone();
        self.on_success(move |value| match panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
            Ok(mapped) => downstream.fill_success(mapped),
            Err(payload) => downstream.fill_failure(Failure::from_panic(payload.as_ref())),
        });
        let downstream = result.clone();
        self.on_failure(move |reason| downstream.fill_failure(reason.clone()));
        result
    }

    /// Derives a future chained onto the future returned by `f`.
    ///
    /// Failure forwarding and panic conversion behave as in [`Future::map`].
    #[must_use]
    pub fn flat_map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> Future<U> + Send + 'static,
    {
        let result = Future::new_pending();
        let downstream = result.clone();
        self.on_success(move |value| match panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
            Ok(inner) => {
                {
                    let downstream = downstream.clone();
                    inner.on_success(move |value| downstream.fill_success(value.clone()));
                }
                inner.on_failure(move |reason| downstream.fill_failure(reason.clone()));
            }
            Err(payload) => downstream.fill_failure(Failure::from_panic(payload.as_ref())),
        });
        let downstream = result.clone();
        self.on_failure(move |reason| downstream.fill_failure(reason.clone()));
        result
    }

    /// Chains `f` after this future's success, discarding the value.
    ///
    /// Unlike the `and_then` of `Option`/`Result`, the continuation takes no
    /// arguments; use [`Future::flat_map`] when the value is needed.
    #[must_use]
    pub fn and_then<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce() -> Future<U> + Send + 'static,
    {
        self.flat_map(move |_| f())
    }

    /// Replaces this future's success value with `value`.
    #[must_use]
    pub fn and_then_value<U>(&self, value: U) -> Future<U>
    where
        U: Send + Sync + 'static,
    {
        self.map(move |_| value)
    }

    /// Passes the value through when `predicate` accepts it; rejects with the
    /// default `"Result wasn't good enough"` failure otherwise.
    #[must_use]
    pub fn filter<P>(&self, predicate: P) -> Self
    where
        T: Clone,
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.filter_with(predicate, Failure::new("Result wasn't good enough", 0, 0))
    }

    /// Passes the value through when `predicate` accepts it; rejects with
    /// `rejected` otherwise.
    #[must_use]
    pub fn filter_with<P>(&self, predicate: P, rejected: Failure) -> Self
    where
        T: Clone,
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        let result = Self::new_pending();
        let downstream = result.clone();
        self.on_success(move |value| match panic::catch_unwind(AssertUnwindSafe(|| predicate(value))) {
            Ok(true) => downstream.fill_success(value.clone()),
            Ok(false) => downstream.fill_failure(rejected),
            Err(payload) => downstream.fill_failure(Failure::from_panic(payload.as_ref())),
        });
        let downstream = result.clone();
        self.on_failure(move |reason| downstream.fill_failure(reason.clone()));
        result
    }

    /// Turns a failure back into a success through `f`; successes pass through.
    ///
    /// This (and [`Future::recover_with`]) is the only place a failure can be
    /// converted back; `f` itself may produce a new failure by panicking.
    #[must_use]
    pub fn recover<F>(&self, f: F) -> Self
    where
        T: Clone,
        F: FnOnce(&Failure) -> T + Send + 'static,
    {
        let result = Self::new_pending();
        let downstream = result.clone();
        self.on_success(move |value| downstream.fill_success(value.clone()));
        let downstream = result.clone();
        self.on_failure(move |reason| match panic::catch_unwind(AssertUnwindSafe(|| f(reason))) {
            Ok(recovered) => downstream.fill_success(recovered),
            Err(payload) => downstream.fill_failure(Failure::from_panic(payload.as_ref())),
        });
        result
    }

    /// Like [`Future::recover`], but chains onto the future returned by `f`.
    #[must_use]
    pub fn recover_with<F>(&self, f: F) -> Self
    where
        T: Clone,
        F: FnOnce(&Failure) -> Self + Send + 'static,
    {
        let result = Self::new_pending();
        let downstream = result.clone();
        self.on_success(move |value| downstream.fill_success(value.clone()));
        let downstream = result.clone();
        self.on_failure(move |reason| match panic::catch_unwind(AssertUnwindSafe(|| f(reason))) {
            Ok(inner) => {
                {
                    let downstream = downstream.clone();
                    inner.on_success(move |value| downstream.fill_success(value.clone()));
                }
                inner.on_failure(move |reason| downstream.fill_failure(reason.clone()));
            }
            Err(payload) => downstream.fill_failure(Failure::from_panic(payload.as_ref())),
        });
        result
    }

    /// Replaces any failure with `value`.
    #[must_use]
    pub fn recover_value(&self, value: T) -> Self
    where
        T: Clone,
    {
        self.recover(move |_| value)
    }

    /// Pairs this future's value with another future's value.
    ///
    /// The derived future fails with the first failure observed among the two.
    #[must_use]
    pub fn zip<U>(&self, other: Future<U>) -> Future<(T, U)>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
    {
        self.flat_map(move |value| {
            let value = value.clone();
            other.map(move |other_value| (value, other_value.clone()))
        })
    }

    /// Combines this future's value with two more futures into a flat triple.
    #[must_use]
    pub fn zip3<U, V>(&self, second: Future<U>, third: Future<V>) -> Future<(T, U, V)>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.flat_map(move |value| {
            let value = value.clone();
            second.zip(third).map(move |pair| {
                let (second_value, third_value) = pair.clone();
                (value, second_value, third_value)
            })
        })
    }

    /// Combines this future's value with three more futures into a flat quadruple.
    #[must_use]
    pub fn zip4<U, V, W>(&self, second: Future<U>, third: Future<V>, fourth: Future<W>) -> Future<(T, U, V, W)>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        W: Clone + Send + Sync + 'static,
    {
        self.flat_map(move |value| {
            let value = value.clone();
            second.zip3(third, fourth).map(move |triple| {
                let (second_value, third_value, fourth_value) = triple.clone();
                (value, second_value, third_value, fourth_value)
            })
        })
    }

    /// Pairs this future's value with an immediately available one.
    #[must_use]
    pub fn zip_value<U>(&self, value: U) -> Future<(T, U)>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
    {
        self.zip(Future::successful(value))
    }

    /// Maps `f` over the elements of a container-valued future.
    #[must_use]
    pub fn inner_map<U, C, F>(&self, f: F) -> Future<C>
    where
        T: IntoIterator + Clone,
        F: FnMut(T::Item) -> U + Send + 'static,
        C: FromIterator<U> + Send + Sync + 'static,
    {
        self.map(move |container| container.clone().into_iter().map(f).collect())
    }

    /// Keeps the elements of a container-valued future accepted by `predicate`.
    #[must_use]
    pub fn inner_filter<P>(&self, predicate: P) -> Self
    where
        T: IntoIterator + FromIterator<<T as IntoIterator>::Item> + Clone,
        P: FnMut(&T::Item) -> bool + Send + 'static,
    {
        self.map(move |container| container.clone().into_iter().filter(predicate).collect())
    }

    /// Folds the elements of a container-valued future into an accumulator.
    #[must_use]
    pub fn inner_reduce<Acc, F>(&self, f: F, initial: Acc) -> Future<Acc>
    where
        T: IntoIterator + Clone,
        F: FnMut(Acc, T::Item) -> Acc + Send + 'static,
        Acc: Send + Sync + 'static,
    {
        self.map(move |container| container.clone().into_iter().fold(initial, f))
    }

    /// Like [`Future::inner_reduce`], but `f` mutates the accumulator in place.
    #[must_use]
    pub fn inner_reduce_by_mutation<Acc, F>(&self, f: F, initial: Acc) -> Future<Acc>
    where
        T: IntoIterator + Clone,
        F: FnMut(&mut Acc, T::Item) + Send + 'static,
        Acc: Send + Sync + 'static,
    {
        self.map(move |container| {
            let mut f = f;
            let mut accumulator = initial;
            for item in container.clone() {
                f(&mut accumulator, item);
            }
            accumulator
        })
    }

    /// Flattens one level of nesting in a container-of-containers future.
    #[must_use]
    pub fn inner_flatten<C>(&self) -> Future<C>
    where
        T: IntoIterator + Clone,
        T::Item: IntoIterator,
        C: FromIterator<<T::Item as IntoIterator>::Item> + Send + Sync + 'static,
    {
        self.map(move |container| container.clone().into_iter().flatten().collect())
    }

    /// Collects the values of `futures` into one future, preserving input order.
    ///
    /// An empty input succeeds immediately with an empty container. The walk
    /// follows iteration order, so the derived future fails with the failure
    /// of the first failing element in input order - not completion order -
    /// and elements past it are never inspected.
    #[must_use]
    pub fn sequence(futures: Vec<Self>) -> Future<Vec<T>>
    where
        T: Clone,
    {
        if futures.is_empty() {
            return Future::successful(Vec::new());
        }
        let promise = Arc::new(Promise::new());
        let accumulated = Vec::with_capacity(futures.len());
        Self::iterate_sequence(futures, 0, accumulated, Arc::clone(&promise));
        promise.future()
    }

    fn iterate_sequence(futures: Vec<Self>, mut index: usize, mut accumulated: Vec<T>, promise: Arc<Promise<Vec<T>>>)
    where
        T: Clone,
    {
        while futures[index].completed() {
            if futures[index].failed() {
                promise.failure(futures[index].failure_reason());
                return;
            }
            if let Some(value) = futures[index].success_value() {
                accumulated.push(value);
            }
            index += 1;
            if index == futures.len() {
                promise.success(accumulated);
                return;
            }
        }

        let current = futures[index].clone();
        {
            let promise = Arc::clone(&promise);
            current.on_failure(move |reason| promise.failure(reason.clone()));
        }
        current.on_success(move |value| {
            accumulated.push(value.clone());
            index += 1;
            if index == futures.len() {
                promise.success(accumulated);
            } else {
                Self::iterate_sequence(futures, index, accumulated, promise);
            }
        });
    }
}
