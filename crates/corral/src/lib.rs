// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A bounded worker-thread pool scheduling tasks under pluggable restriction
//! policies.
//!
//! [`TaskDispatcher`] owns a lazily grown pool of worker threads (bounded by a
//! configurable global capacity, default 64) and serves submitted producers in
//! FIFO order subject to their [`Restriction`]:
//!
//! - [`Restriction::None`] - bounded only by the global capacity;
//! - [`Restriction::Intensive`] - all such tasks share one bucket sized to the
//!   hardware concurrency;
//! - [`Restriction::Custom`] - named buckets with configurable capacity;
//! - [`Restriction::ThreadBound`] - all tasks sharing a key run sequentially
//!   on one sticky worker thread.
//!
//! Results come back as [`pledge`] futures; the [`run`] family returns
//! cancelable handles.
//!
//! # Quick start
//!
//! ```
//! use corral::{Restriction, TaskDispatcher};
//!
//! let dispatcher = TaskDispatcher::instance();
//! let future = dispatcher.submit(|| 6 * 7, Restriction::None, "");
//! assert_eq!(future.result(), 42);
//! ```
//!
//! # Cancellation
//!
//! [`run`] returns a [`CancelableFuture`](pledge::CancelableFuture). A cancel
//! that lands before the task starts suppresses the producer entirely; a later
//! cancel only settles the observer side and the producer runs to completion
//! with its outcome dropped.

mod dispatcher;
mod restriction;
mod run;
mod signal_waiters;
mod worker;

pub use dispatcher::TaskDispatcher;
pub use restriction::Restriction;
pub use run::{
    clustered_run, run, run_and_forget, run_and_forget_restricted, run_future, run_future_restricted, run_restricted,
    sequence_run,
};
pub use signal_waiters::{SignalWaiterHandle, add_signal_waiter, fire_signal_waiters};
