// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Higher-level runners delivering task outcomes through futures.

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use pledge::{CancelableFuture, Failure, Future, Promise};
use tracing::warn;

use crate::dispatcher::TaskDispatcher;
use crate::restriction::Restriction;

impl TaskDispatcher {
    /// Runs `producer` on a worker under `(restriction, key)` and returns a
    /// cancelable handle to its eventual result.
    ///
    /// A panic in the producer fails the future with [`Failure::from_panic`];
    /// a plain return value is delivered through the promise's success write,
    /// which honors the thread-local failure slot
    /// ([`WithFailure`](pledge::WithFailure)). Canceling before the task
    /// starts suppresses the producer entirely; canceling later only settles
    /// the observer side and the producer runs to completion.
    pub fn run<R, F>(&self, producer: F, restriction: Restriction, key: impl Into<String>) -> CancelableFuture<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let promise = Arc::new(Promise::new());
        let cancelable = CancelableFuture::from(Arc::clone(&promise));
        self.insert_task(
            Box::new(move || {
                if promise.filled() {
                    return;
                }
                match panic::catch_unwind(AssertUnwindSafe(producer)) {
                    Ok(value) => promise.success(value),
                    Err(payload) => promise.failure(Failure::from_panic(payload.as_ref())),
                }
            }),
            restriction,
            key.into(),
        );
        cancelable
    }

    /// Like [`TaskDispatcher::run`] for producers returning a future: the
    /// returned handle settles with the inner future's eventual outcome.
    pub fn run_future<R, F>(&self, producer: F, restriction: Restriction, key: impl Into<String>) -> CancelableFuture<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Future<R> + Send + 'static,
    {
        let promise = Arc::new(Promise::new());
        let cancelable = CancelableFuture::from(Arc::clone(&promise));
        self.insert_task(
            Box::new(move || {
                if promise.filled() {
                    return;
                }
                match panic::catch_unwind(AssertUnwindSafe(producer)) {
                    Ok(inner) => {
                        {
                            let promise = Arc::clone(&promise);
                            inner.on_success(move |value| promise.success(value.clone()));
                        }
                        inner.on_failure(move |reason| promise.failure(reason.clone()));
                    }
                    Err(payload) => promise.failure(Failure::from_panic(payload.as_ref())),
                }
            }),
            restriction,
            key.into(),
        );
        cancelable
    }

    /// Runs `producer` without handing back a handle. Its return value is
    /// dropped; a panic is logged and dropped.
    pub fn run_and_forget<R, F>(&self, producer: F, restriction: Restriction, key: impl Into<String>)
    where
        F: FnOnce() -> R + Send + 'static,
    {
        self.insert_task(
            Box::new(move || {
                if panic::catch_unwind(AssertUnwindSafe(producer)).is_err() {
                    warn!("a fire-and-forget task panicked; the panic was dropped");
                }
            }),
            restriction,
            key.into(),
        );
    }

    /// Submits `producer` and returns a plain future for its result.
    pub fn submit<R, F>(&self, producer: F, restriction: Restriction, key: impl Into<String>) -> Future<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.run(producer, restriction, key).future()
    }

    /// Alias of [`TaskDispatcher::run_and_forget`] on the submission surface.
    pub fn submit_and_forget<R, F>(&self, producer: F, restriction: Restriction, key: impl Into<String>)
    where
        F: FnOnce() -> R + Send + 'static,
    {
        self.run_and_forget(producer, restriction, key);
    }

    /// Runs `f` once per input as its own task and collects the results in
    /// input order. An empty input succeeds immediately.
    pub fn sequence_run<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        restriction: Restriction,
        key: impl Into<String>,
    ) -> Future<Vec<R>>
    where
        T: Send + 'static,
        R: Clone + Send + Sync + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        if inputs.is_empty() {
            return Future::successful(Vec::new());
        }
        let key = key.into();
        let f = Arc::new(f);
        let futures = inputs
            .into_iter()
            .map(|input| {
                let f = Arc::clone(&f);
                self.run(move || f(input), restriction, key.clone()).future()
            })
            .collect();
        Future::sequence(futures)
    }

    /// Like [`TaskDispatcher::sequence_run`], with `f` also receiving the
    /// input's position.
    pub fn sequence_run_with_index<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        restriction: Restriction,
        key: impl Into<String>,
    ) -> Future<Vec<R>>
    where
        T: Send + 'static,
        R: Clone + Send + Sync + 'static,
        F: Fn(usize, T) -> R + Send + Sync + 'static,
    {
        if inputs.is_empty() {
            return Future::successful(Vec::new());
        }
        let key = key.into();
        let f = Arc::new(f);
        let futures = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let f = Arc::clone(&f);
                self.run(move || f(index, input), restriction, key.clone()).future()
            })
            .collect();
        Future::sequence(futures)
    }

    /// Splits `inputs` into contiguous clusters of at least `min_cluster_size`
    /// items, runs `f` over each cluster as one task, and concatenates the
    /// results in input order.
    ///
    /// With `n` inputs, a size floor `s` and a bucket capacity `c`, the split
    /// produces `min(c, max(1, n / s))` clusters whose sizes differ by at most
    /// one (a single cluster when `n < s`), so identical inputs always cluster
    /// identically.
    pub fn clustered_run<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        min_cluster_size: usize,
        restriction: Restriction,
        key: impl Into<String>,
    ) -> Future<Vec<R>>
    where
        T: Send + 'static,
        R: Clone + Send + Sync + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        if inputs.is_empty() {
            return Future::successful(Vec::new());
        }
        let key = key.into();
        let total = inputs.len();
        let min_cluster_size = min_cluster_size.max(1);
        let cluster_count = (total / min_cluster_size)
            .max(1)
            .min(self.restrictor_capacity(restriction, &key));
        let base_size = total / cluster_count;
        let oversized_clusters = total % cluster_count;

        let f = Arc::new(f);
        let mut remaining = inputs;
        let mut futures = Vec::with_capacity(cluster_count);
        for index in 0..cluster_count {
            let size = base_size + usize::from(index < oversized_clusters);
            let tail = remaining.split_off(size);
            let cluster = mem::replace(&mut remaining, tail);
            let f = Arc::clone(&f);
            futures.push(
                self.run(
                    move || cluster.into_iter().map(|input| f(input)).collect::<Vec<R>>(),
                    restriction,
                    key.clone(),
                )
                .future(),
            );
        }

        Future::sequence(futures).map(|clusters| clusters.iter().flatten().cloned().collect())
    }
}

/// Runs `producer` unrestricted on the process-wide dispatcher.
pub fn run<R, F>(producer: F) -> CancelableFuture<R>
where
    R: Send + Sync + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    TaskDispatcher::instance().run(producer, Restriction::None, "")
}

/// Runs `producer` on the process-wide dispatcher under `(restriction, key)`.
pub fn run_restricted<R, F>(producer: F, restriction: Restriction, key: impl Into<String>) -> CancelableFuture<R>
where
    R: Send + Sync + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    TaskDispatcher::instance().run(producer, restriction, key)
}

/// Runs a future-returning `producer` unrestricted on the process-wide dispatcher.
pub fn run_future<R, F>(producer: F) -> CancelableFuture<R>
where
    R: Clone + Send + Sync + 'static,
    F: FnOnce() -> Future<R> + Send + 'static,
{
    TaskDispatcher::instance().run_future(producer, Restriction::None, "")
}

/// Runs a future-returning `producer` on the process-wide dispatcher under
/// `(restriction, key)`.
pub fn run_future_restricted<R, F>(producer: F, restriction: Restriction, key: impl Into<String>) -> CancelableFuture<R>
where
    R: Clone + Send + Sync + 'static,
    F: FnOnce() -> Future<R> + Send + 'static,
{
    TaskDispatcher::instance().run_future(producer, restriction, key)
}

/// Runs `producer` unrestricted on the process-wide dispatcher, keeping no handle.
pub fn run_and_forget<R, F>(producer: F)
where
    F: FnOnce() -> R + Send + 'static,
{
    TaskDispatcher::instance().run_and_forget(producer, Restriction::None, "");
}

/// Runs `producer` on the process-wide dispatcher under `(restriction, key)`,
/// keeping no handle.
pub fn run_and_forget_restricted<R, F>(producer: F, restriction: Restriction, key: impl Into<String>)
where
    F: FnOnce() -> R + Send + 'static,
{
    TaskDispatcher::instance().run_and_forget(producer, restriction, key);
}

/// [`TaskDispatcher::sequence_run`] on the process-wide dispatcher, unrestricted.
pub fn sequence_run<T, R, F>(inputs: Vec<T>, f: F) -> Future<Vec<R>>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    TaskDispatcher::instance().sequence_run(inputs, f, Restriction::None, "")
}

/// [`TaskDispatcher::clustered_run`] on the process-wide dispatcher, unrestricted.
pub fn clustered_run<T, R, F>(inputs: Vec<T>, f: F, min_cluster_size: usize) -> Future<Vec<R>>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    TaskDispatcher::instance().clustered_run(inputs, f, min_cluster_size, Restriction::None, "")
}
