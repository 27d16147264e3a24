// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-thread failure slot backing the [`WithFailure`](crate::WithFailure) pattern.
//!
//! A producer whose static return type is a plain value publishes a failure
//! here; the next success write on the same thread picks it up and records a
//! failure instead. The slot is strictly per-thread, so no synchronization is
//! involved.

use std::cell::RefCell;

use crate::Failure;

thread_local! {
    static LAST_FAILURE: RefCell<Option<Failure>> = const { RefCell::new(None) };
}

/// Publishes `failure` into the current thread's slot, replacing any previous one.
pub(crate) fn set_last_failure(failure: Failure) {
    LAST_FAILURE.with(|slot| *slot.borrow_mut() = Some(failure));
}

/// Takes the current thread's pending failure, clearing the slot.
pub(crate) fn take_last_failure() -> Option<Failure> {
    LAST_FAILURE.with(|slot| slot.borrow_mut().take())
}

#[cfg(test)]
pub(crate) fn has_last_failure() -> bool {
    LAST_FAILURE.with(|slot| slot.borrow().is_some())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn take_clears_the_slot() {
        set_last_failure(Failure::new("pending", 1, 2));
        let taken = take_last_failure().unwrap();
        assert_eq!(taken.message(), "pending");
        assert!(!has_last_failure());
        assert!(take_last_failure().is_none());
    }

    #[test]
    fn set_replaces_previous_value() {
        set_last_failure(Failure::new("first", 0, 0));
        set_last_failure(Failure::new("second", 0, 0));
        assert_eq!(take_last_failure().unwrap().message(), "second");
    }

    #[test]
    fn slot_is_per_thread() {
        set_last_failure(Failure::new("here", 0, 0));
        thread::spawn(|| {
            assert!(!has_last_failure());
        })
        .join()
        .unwrap();
        assert_eq!(take_last_failure().unwrap().message(), "here");
    }
}
