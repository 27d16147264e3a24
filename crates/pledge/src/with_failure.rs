// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Failing a chain from a code path whose static return type is a plain value.

use crate::{Failure, Future, last_failure};

/// A failure marker usable where a plain value or a future is expected.
///
/// `WithFailure` lets a producer abandon a computation from a code path whose
/// return type is an ordinary `T`:
///
/// ```
/// use pledge::{Future, WithFailure};
///
/// let future = Future::successful(5).map(|value| {
///     if *value > 3 {
///         return WithFailure::new("too big", 1, 2).into_value();
///     }
///     *value * 10
/// });
/// assert!(future.failed());
/// assert_eq!(future.failure_reason().message(), "too big");
/// ```
///
/// [`WithFailure::into_value`] publishes the failure into the current thread's
/// failure slot and returns `T::default()`; the next success write on this
/// thread (a `map` body's result, [`Promise::success`](crate::Promise::success),
/// a task producer's return value) picks the failure up and records it instead
/// of the placeholder value.
///
/// The marker is only meaningful in those documented sinks. Storing one, or
/// calling `into_value` outside a path that ends in a success write on the
/// same thread, leaves a stale failure in the slot that will divert an
/// unrelated later success.
#[derive(Debug)]
pub struct WithFailure(Failure);

impl WithFailure {
    /// Creates a marker from a message and a module/error code pair.
    #[must_use]
    pub fn new(message: impl Into<String>, module_code: i64, error_code: i64) -> Self {
        Self(Failure::new(message, module_code, error_code))
    }

    /// Publishes the failure into the current thread's slot and returns a
    /// placeholder `T::default()` for the enclosing success write to discard.
    #[must_use]
    pub fn into_value<T: Default>(self) -> T {
        last_failure::set_last_failure(self.0);
        T::default()
    }
}

impl From<Failure> for WithFailure {
    fn from(failure: Failure) -> Self {
        Self(failure)
    }
}

impl<T> From<WithFailure> for Future<T>
where
    T: Send + Sync + 'static,
{
    fn from(with_failure: WithFailure) -> Self {
        Self::fail(with_failure.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Promise, last_failure};

    #[test]
    fn into_value_arms_the_slot_and_returns_default() {
        let placeholder: i32 = WithFailure::new("armed", 1, 2).into_value();
        assert_eq!(placeholder, 0);
        let pending = last_failure::take_last_failure().unwrap();
        assert_eq!(pending.message(), "armed");
    }

    #[test]
    fn converts_into_a_failed_future() {
        let future: Future<String> = WithFailure::new("direct", 3, 4).into();
        assert!(future.failed());
        let reason = future.failure_reason();
        assert_eq!(reason.message(), "direct");
        assert_eq!(reason.module_code(), 3);
        assert_eq!(reason.error_code(), 4);
    }

    #[test]
    fn promise_success_honors_the_marker() {
        let promise = Promise::<i32>::new();
        let placeholder: i32 = WithFailure::new("bad", 1, 2).into_value();
        promise.success(placeholder);

        let future = promise.future();
        assert!(future.failed());
        assert_eq!(future.result(), 0);
        let reason = future.failure_reason();
        assert_eq!(reason.message(), "bad");
        assert_eq!(reason.module_code(), 1);
        assert_eq!(reason.error_code(), 2);
    }

    #[test]
    fn map_body_honors_the_marker() {
        let future = Future::successful(5)
            .map(|_| -> i32 { WithFailure::new("bad", 1, 2).into_value() })
            .map(|_| 24);

        assert!(future.failed());
        assert_eq!(future.result(), 0);
        let reason = future.failure_reason();
        assert_eq!(reason.message(), "bad");
        assert_eq!(reason.module_code(), 1);
        assert_eq!(reason.error_code(), 2);
    }
}
