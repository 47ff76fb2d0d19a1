//! Property-based tests for the concurrency gate.

use std::sync::Arc;

use futures_util::future::join_all;
use proptest::prelude::*;
use serde_json::{Value, json};
use tokio::runtime::Builder;
use tokio::sync::{Barrier, watch};

use cadence_scheduler::{JobArgs, Outcome, Scheduler, SchedulerError};

/// Define `name` with an executor that stays in flight until `open` flips to true.
fn define_held(sch: &Scheduler, name: &str, limit: usize, open: &watch::Receiver<bool>) {
    let open = open.clone();
    sch.define_with_concurrency(name, limit, move |_args| {
        let mut open = open.clone();
        async move {
            let _ = open.wait_for(|open| *open).await;
            Ok::<_, String>(Value::Null)
        }
    })
    .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    })]

    // N simultaneous starts against a limit of k < N: exactly k are admitted
    #[test]
    fn concurrent_starts_admit_exactly_limit(limit in 1usize..8, extra in 1usize..16) {
        let attempts = limit + extra;
        let runtime = Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let (admitted, rejected, in_flight, settled_in_flight) = runtime.block_on(async {
            let sch = Arc::new(Scheduler::new());
            let (open_tx, open_rx) = watch::channel(false);
            define_held(&sch, "j", limit, &open_rx);

            let barrier = Arc::new(Barrier::new(attempts));
            let tasks: Vec<_> = (0..attempts)
                .map(|_| {
                    let sch = Arc::clone(&sch);
                    let barrier = Arc::clone(&barrier);
                    tokio::spawn(async move {
                        barrier.wait().await;
                        sch.start("j", JobArgs::new())
                    })
                })
                .collect();

            let results: Vec<_> = join_all(tasks)
                .await
                .into_iter()
                .map(|joined| joined.unwrap())
                .collect();

            let rejected = results
                .iter()
                .filter(|r| matches!(r, Err(SchedulerError::ConcurrencyExceeded { .. })))
                .count();
            let handles: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
            let admitted = handles.len();
            let in_flight = sch.in_flight("j").unwrap();

            open_tx.send_replace(true);
            for handle in handles {
                assert!(handle.outcome().await.is_resolved());
            }

            (admitted, rejected, in_flight, sch.in_flight("j").unwrap())
        });

        prop_assert_eq!(admitted, limit);
        prop_assert_eq!(rejected, attempts - limit);
        prop_assert_eq!(in_flight, limit);
        prop_assert_eq!(settled_in_flight, 0);
    }

    // Repeated start/settle cycles never leak or double-release a slot
    #[test]
    fn settle_cycles_restore_counter(
        limit in 1usize..4,
        outcomes in prop::collection::vec(any::<bool>(), 1..40),
    ) {
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();

        let counts = runtime.block_on(async {
            let sch = Scheduler::new();
            sch.define_with_concurrency("j", limit, |args: JobArgs| async move {
                tokio::task::yield_now().await;
                match args.get(0).and_then(Value::as_bool) {
                    Some(true) => Ok(json!("ok")),
                    _ => Err("Boom!".to_string()),
                }
            })
            .unwrap();

            let mut counts = Vec::new();
            for batch in outcomes.chunks(limit) {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|resolve| sch.start("j", JobArgs::new().with(*resolve)).unwrap())
                    .collect();
                counts.push(sch.in_flight("j").unwrap());

                for (handle, resolve) in handles.iter().zip(batch) {
                    let outcome = handle.outcome().await;
                    assert_eq!(outcome.is_resolved(), *resolve);
                    assert_eq!(outcome.is_rejected(), !*resolve);
                }
                counts.push(sch.in_flight("j").unwrap());
            }
            counts
        });

        for pair in counts.chunks(2) {
            prop_assert!(pair[0] >= 1 && pair[0] <= limit);
            prop_assert_eq!(pair[1], 0);
        }
    }
}

#[tokio::test]
async fn test_cancelled_executions_release_slots() {
    let sch = Scheduler::new();
    let (_open_tx, open_rx) = watch::channel(false);
    define_held(&sch, "held", 2, &open_rx);

    let first = sch.start("held", JobArgs::new()).unwrap();
    let second = sch.start("held", JobArgs::new()).unwrap();
    assert!(matches!(
        sch.start("held", JobArgs::new()),
        Err(SchedulerError::ConcurrencyExceeded { limit: 2, .. })
    ));

    first.cancel();
    second.cancel();
    assert_eq!(first.outcome().await, Outcome::Cancelled);
    assert_eq!(second.outcome().await, Outcome::Cancelled);
    assert_eq!(sch.in_flight("held").unwrap(), 0);
}

#[tokio::test]
async fn test_removed_job_in_flight_is_safe() {
    let sch = Scheduler::new();
    let (open_tx, open_rx) = watch::channel(false);
    define_held(&sch, "j", 1, &open_rx);

    let handle = sch.start("j", JobArgs::new()).unwrap();
    sch.remove("j").unwrap();
    define_held(&sch, "j", 1, &open_rx);

    // Fresh entry, fresh counter
    let again = sch.start("j", JobArgs::new()).unwrap();

    open_tx.send_replace(true);
    assert!(handle.outcome().await.is_resolved());
    assert!(again.outcome().await.is_resolved());
    assert_eq!(sch.in_flight("j").unwrap(), 0);
}
