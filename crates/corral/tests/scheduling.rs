// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scheduling behavior exercised through the public API only.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, ThreadId};
use std::time::Duration;

use corral::{Restriction, TaskDispatcher, add_signal_waiter, fire_signal_waiters};
use pledge::{Future, WithFailure};
use testing_aids::{TEST_TIMEOUT, execute_or_abandon};

#[test]
fn global_capacity_bounds_concurrency() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::with_capacity(4);
        let release = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..8_usize)
            .map(|index| {
                let release = Arc::clone(&release);
                let started = Arc::clone(&started);
                dispatcher.submit(
                    move || {
                        started.fetch_add(1, Ordering::SeqCst);
                        while !release.load(Ordering::Acquire) {
                            thread::yield_now();
                        }
                        index * 10
                    },
                    Restriction::None,
                    "",
                )
            })
            .collect();

        while started.load(Ordering::SeqCst) < 4 {
            thread::yield_now();
        }
        // Give the dispatcher every chance to (wrongly) start a fifth task.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(started.load(Ordering::SeqCst), 4);

        release.store(true, Ordering::Release);
        for (index, future) in futures.iter().enumerate() {
            assert_eq!(future.result(), index * 10);
        }
        assert_eq!(started.load(Ordering::SeqCst), 8);
    })
    .unwrap();
}

#[test]
fn thread_bound_keys_pin_to_distinct_stable_threads() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let observe = |key: &str| -> ThreadId {
            dispatcher
                .submit(|| Some(thread::current().id()), Restriction::ThreadBound, key)
                .result()
                .expect("thread id was recorded")
        };

        let first_a = observe("A");
        let first_b = observe("B");
        assert_ne!(first_a, first_b, "distinct keys must bind to distinct workers");

        for _ in 0..20 {
            assert_eq!(observe("A"), first_a, "key A must stay on its bound thread");
            assert_eq!(observe("B"), first_b, "key B must stay on its bound thread");
        }
    })
    .unwrap();
}

#[test]
fn custom_restrictor_bounds_concurrency() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        dispatcher.add_custom_restrictor("narrow", 2);

        let in_flight = Arc::new(AtomicIsize::new(0));
        let peak = Arc::new(AtomicIsize::new(0));

        let futures: Vec<_> = (0..6)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                dispatcher.submit(
                    move || {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    },
                    Restriction::Custom,
                    "narrow",
                )
            })
            .collect();

        for future in futures {
            future.wait();
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= 2, "at most 2 tasks may run concurrently, saw {peak}");
    })
    .unwrap();
}

#[test]
fn head_of_line_restricted_task_does_not_block_other_buckets() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        dispatcher.add_custom_restrictor("solo", 1);

        let release = Arc::new(AtomicBool::new(false));
        let (started_sender, started_receiver) = mpsc::channel();
        let blocker = {
            let release = Arc::clone(&release);
            dispatcher.submit(
                move || {
                    started_sender.send(()).unwrap();
                    while !release.load(Ordering::Acquire) {
                        thread::yield_now();
                    }
                },
                Restriction::Custom,
                "solo",
            )
        };
        started_receiver.recv_timeout(TEST_TIMEOUT).unwrap();

        // This task is stuck behind the blocker in its bucket...
        let stuck = dispatcher.submit(|| "stuck", Restriction::Custom, "solo");
        // ...but an unrelated task sails past it.
        let unrelated = dispatcher.submit(|| "unrelated", Restriction::None, "");
        assert_eq!(unrelated.result(), "unrelated");
        assert!(!stuck.completed());

        release.store(true, Ordering::Release);
        blocker.wait();
        assert_eq!(stuck.result(), "stuck");
    })
    .unwrap();
}

#[test]
fn cancel_before_start_suppresses_the_producer() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        dispatcher.add_custom_restrictor("solo", 1);

        let release = Arc::new(AtomicBool::new(false));
        let (started_sender, started_receiver) = mpsc::channel();
        let blocker = {
            let release = Arc::clone(&release);
            dispatcher.run(
                move || {
                    started_sender.send(()).unwrap();
                    while !release.load(Ordering::Acquire) {
                        thread::yield_now();
                    }
                },
                Restriction::Custom,
                "solo",
            )
        };
        started_receiver.recv_timeout(TEST_TIMEOUT).unwrap();

        let side_effect = Arc::new(AtomicBool::new(false));
        let canceled = {
            let side_effect = Arc::clone(&side_effect);
            dispatcher.run(
                move || {
                    side_effect.store(true, Ordering::SeqCst);
                    1
                },
                Restriction::Custom,
                "solo",
            )
        };
        let follow_up = dispatcher.run(|| 42, Restriction::Custom, "solo");

        canceled.cancel();
        release.store(true, Ordering::Release);

        assert_eq!(follow_up.future().result(), 42);
        assert!(canceled.future().failed());
        assert_eq!(canceled.future().failure_reason().message(), "Canceled");
        assert!(
            !side_effect.load(Ordering::SeqCst),
            "a task canceled before starting must not run its producer"
        );
        blocker.future().wait();
    })
    .unwrap();
}

#[test]
fn cancel_after_completion_is_a_no_op() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let handle = dispatcher.run(|| 7, Restriction::None, "");
        handle.future().wait();
        handle.cancel();
        assert!(handle.future().succeeded());
        assert_eq!(handle.future().result(), 7);
    })
    .unwrap();
}

#[test]
fn intensive_tasks_with_different_keys_share_one_bucket() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let futures: Vec<_> = (0..8_usize)
            .map(|index| {
                dispatcher.submit(
                    move || index + 1,
                    Restriction::Intensive,
                    format!("ignored-{index}"),
                )
            })
            .collect();
        for (index, future) in futures.iter().enumerate() {
            assert_eq!(future.result(), index + 1);
        }
    })
    .unwrap();
}

#[test]
fn with_failure_marker_crosses_the_worker_boundary() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let future = dispatcher.submit(
            || -> i32 { WithFailure::new("refused", 2, 3).into_value() },
            Restriction::None,
            "",
        );
        future.wait();
        assert!(future.failed());
        let reason = future.failure_reason();
        assert_eq!(reason.message(), "refused");
        assert_eq!(reason.module_code(), 2);
        assert_eq!(reason.error_code(), 3);
    })
    .unwrap();
}

#[test]
fn run_future_chains_onto_the_inner_outcome() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let handle = dispatcher.run_future(|| Future::successful(5).map(|x| x + 1), Restriction::None, "");
        assert_eq!(handle.future().result(), 6);
    })
    .unwrap();
}

#[test]
fn sequence_run_preserves_input_order() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let squares = dispatcher.sequence_run((1..=5).collect(), |x: i64| x * x, Restriction::None, "");
        assert_eq!(squares.result(), vec![1, 4, 9, 16, 25]);
    })
    .unwrap();
}

#[test]
fn sequence_run_of_empty_input_succeeds_immediately() {
    let dispatcher = TaskDispatcher::new();
    let nothing = dispatcher.sequence_run(Vec::<i32>::new(), |x| x, Restriction::None, "");
    assert!(nothing.succeeded());
    assert_eq!(nothing.result(), Vec::<i32>::new());
}

#[test]
fn sequence_run_with_index_sees_positions() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let labeled = dispatcher.sequence_run_with_index(
            vec!["a", "b", "c"],
            |index, input| format!("{index}:{input}"),
            Restriction::None,
            "",
        );
        assert_eq!(labeled.result(), vec!["0:a".to_owned(), "1:b".to_owned(), "2:c".to_owned()]);
    })
    .unwrap();
}

#[test]
fn clustered_run_concatenates_in_input_order() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let inputs: Vec<i32> = (0..10).collect();
        let expected: Vec<i32> = inputs.iter().map(|x| x * 2).collect();
        let doubled = dispatcher.clustered_run(inputs, |x| x * 2, 3, Restriction::None, "");
        assert_eq!(doubled.result(), expected);
    })
    .unwrap();
}

#[test]
fn clustered_run_with_fewer_inputs_than_the_floor_uses_one_cluster() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let bumped = dispatcher.clustered_run(vec![1, 2], |x: i32| x + 1, 10, Restriction::None, "");
        assert_eq!(bumped.result(), vec![2, 3]);
    })
    .unwrap();
}

#[test]
fn clustered_run_honors_a_single_capacity_bucket() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        dispatcher.add_custom_restrictor("one-lane", 1);
        let inputs: Vec<i32> = (0..9).collect();
        let expected: Vec<i32> = inputs.iter().map(|x| x + 100).collect();
        let shifted = dispatcher.clustered_run(inputs, |x| x + 100, 2, Restriction::Custom, "one-lane");
        assert_eq!(shifted.result(), expected);
    })
    .unwrap();
}

#[test]
fn run_and_forget_still_runs_the_producer() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let (sender, receiver) = mpsc::channel();
        dispatcher.run_and_forget(move || sender.send("ran").unwrap(), Restriction::None, "");
        assert_eq!(receiver.recv_timeout(TEST_TIMEOUT).unwrap(), "ran");
    })
    .unwrap();
}

#[test]
fn signal_waiters_wake_a_parked_worker() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let future = dispatcher.submit(
            || {
                let (sender, receiver) = mpsc::channel();
                add_signal_waiter(move |handle| sender.send(handle).unwrap());
                let handle = receiver.recv().unwrap();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    handle.quit();
                });
                fire_signal_waiters();
                "woken"
            },
            Restriction::None,
            "",
        );
        assert_eq!(future.result(), "woken");
    })
    .unwrap();
}

#[test]
fn firing_with_no_registered_waiters_returns_immediately() {
    execute_or_abandon(|| {
        let dispatcher = TaskDispatcher::new();
        let future = dispatcher.submit(
            || {
                fire_signal_waiters();
                1
            },
            Restriction::None,
            "",
        );
        assert_eq!(future.result(), 1);
    })
    .unwrap();
}
