// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The write side of a [`Future`].

use crate::{Failure, Future};

/// The single write-side handle for one [`Future`].
///
/// A promise owns exactly one future and is the only way to complete it from
/// the outside. It is deliberately neither cloneable nor copyable so there is
/// one producer per future; the first of [`Promise::success`] /
/// [`Promise::failure`] wins and later fills are silently ignored.
///
/// Dropping an unfilled promise leaves its future pending forever; producers
/// are expected to always deliver an outcome.
#[derive(Debug)]
pub struct Promise<T> {
    future: Future<T>,
}

impl<T> Promise<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a promise with a fresh pending future.
    #[must_use]
    pub fn new() -> Self {
        Self {
            future: Future::new_pending(),
        }
    }

    /// A handle to the owned future.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        self.future.clone()
    }

    /// Whether the owned future has already completed.
    #[must_use]
    pub fn filled(&self) -> bool {
        self.future.completed()
    }

    /// Completes the future with `value`.
    ///
    /// When the current thread's failure slot holds a pending failure (see
    /// [`WithFailure`](crate::WithFailure)), the future is failed with it
    /// instead. No-op when the future is already completed.
    pub fn success(&self, value: T) {
        self.future.fill_success(value);
    }

    /// Completes the future with `reason`. No-op when already completed.
    pub fn failure(&self, reason: Failure) {
        self.future.fill_failure(reason);
    }
}

impl<T> Default for Promise<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
