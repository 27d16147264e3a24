// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A future handle with a one-shot cancel operation.

use std::sync::Arc;

use crate::{Failure, Future, Promise};

/// A cloneable handle pairing a [`Future`] with the ability to cancel it.
///
/// `cancel` fills the bound promise with a failure, but only while it is
/// still pending - cancellation is an observer-side transition, not a way to
/// stop a producer that already started. After a cancel, the producer's
/// eventual fill is silently dropped.
#[derive(Debug)]
pub struct CancelableFuture<T> {
    promise: Arc<Promise<T>>,
}

impl<T> Clone for CancelableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            promise: Arc::clone(&self.promise),
        }
    }
}

impl<T> CancelableFuture<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a cancelable future over a fresh unfilled promise.
    #[must_use]
    pub fn new() -> Self {
        Self::from(Promise::new())
    }

    /// Cancels with the default `"Canceled"` reason. No-op once the bound
    /// promise is filled; idempotent.
    pub fn cancel(&self) {
        self.cancel_with(Failure::new("Canceled", 0, 0));
    }

    /// Cancels with an explicit reason. No-op once the bound promise is
    /// filled; idempotent.
    pub fn cancel_with(&self, reason: Failure) {
        if !self.promise.filled() {
            self.promise.failure(reason);
        }
    }

    /// A handle to the underlying future.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        self.promise.future()
    }
}

impl<T> Default for CancelableFuture<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Promise<T>> for CancelableFuture<T>
where
    T: Send + Sync + 'static,
{
    fn from(promise: Promise<T>) -> Self {
        Self {
            promise: Arc::new(promise),
        }
    }
}

impl<T> From<Arc<Promise<T>>> for CancelableFuture<T>
where
    T: Send + Sync + 'static,
{
    fn from(promise: Arc<Promise<T>>) -> Self {
        Self { promise }
    }
}

impl<T> From<CancelableFuture<T>> for Future<T>
where
    T: Send + Sync + 'static,
{
    fn from(cancelable: CancelableFuture<T>) -> Self {
        cancelable.future()
    }
}
