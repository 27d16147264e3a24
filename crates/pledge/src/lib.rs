// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Composable one-shot futures and promises with a typed failure model.
//!
//! This crate provides [`Future`], a shared one-shot result cell with a rich
//! combinator surface (`map`, `flat_map`, `filter`, `recover`, `zip`,
//! `sequence`, inner-container combinators), together with the write-side
//! [`Promise`], the cancellation wrapper [`CancelableFuture`], the [`Failure`]
//! value every rejected future carries, and the [`WithFailure`] escape hatch
//! for failing out of plain-value code paths.
//!
//! # Quick start
//!
//! ```
//! use pledge::{Future, Promise};
//!
//! let promise = Promise::new();
//! let doubled = promise.future().map(|value| value * 2);
//!
//! promise.success(21);
//! assert_eq!(doubled.result(), 42);
//! ```
//!
//! # Failure propagation
//!
//! Failures flow forward along combinator chains without invoking user
//! functions; `recover` and `recover_with` are the only places a failure can
//! be turned back into a success:
//!
//! ```
//! use pledge::{Failure, Future};
//!
//! let recovered = Future::<i32>::fail(Failure::new("lost", 0, 0)).recover(|_| -1);
//! assert_eq!(recovered.result(), -1);
//! ```
//!
//! # Threading model
//!
//! Futures are freely shareable across threads (`T: Send + Sync`). Each cell
//! transitions exactly once; callbacks registered before the transition run
//! exactly once afterwards, callbacks registered after it run inline. Blocking
//! accessors ([`Future::wait`], [`Future::result`], [`Future::failure_reason`])
//! suspend the calling thread until completion.

mod cancelable_future;
mod failure;
mod future;
mod last_failure;
mod promise;
mod spin_lock;
mod with_failure;

pub use cancelable_future::CancelableFuture;
pub use failure::{Failure, Hints};
pub use future::Future;
pub use promise::Promise;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use with_failure::WithFailure;
