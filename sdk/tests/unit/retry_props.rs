//! Property-based tests for the retry utility
//!
//! A call fails `k` times before succeeding; the clock is paused so the
//! sleeps between attempts can be measured exactly.

use std::sync::Arc;
use std::time::Duration;

use flowlane::worker::complete_with_retry;
use flowlane::{CoreError, Delay, RetryPolicy};
use flowlane_core::with_delay;
use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::time::Instant;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

fn policy(nb_times: u32, initial_ms: u64, multiplier: f64, max_ms: u64) -> RetryPolicy {
    RetryPolicy::default()
        .with_nb_times(nb_times)
        .with_delay(Delay::Exponential {
            initial: Duration::from_millis(initial_ms),
            multiplier,
            max: Duration::from_millis(max_ms),
        })
}

/// Call that fails `failures` times, recording when each attempt happened
async fn flaky(
    policy: &RetryPolicy,
    failures: u32,
) -> (Result<u32, CoreError>, Vec<Instant>) {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let result = with_delay(policy, || {
        let attempts = Arc::clone(&attempts);
        async move {
            let mut attempts = attempts.lock();
            attempts.push(Instant::now());
            if attempts.len() as u32 <= failures {
                Err(CoreError::Response {
                    code: "InternalFailure".into(),
                    message: format!("attempt {}", attempts.len()),
                })
            } else {
                Ok(attempts.len() as u32)
            }
        }
    })
    .await;
    let attempts = attempts.lock().clone();
    (result, attempts)
}

fn gaps(instants: &[Instant]) -> Vec<Duration> {
    instants.windows(2).map(|w| w[1] - w[0]).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn succeeds_after_k_failures(
        nb_times in 1u32..8,
        k in 0u32..8,
        initial_ms in 1u64..500,
        multiplier in 1.0f64..4.0,
        max_ms in 500u64..60_000,
    ) {
        prop_assume!(k < nb_times);
        let policy = policy(nb_times, initial_ms, multiplier, max_ms);
        let (result, attempts) = paused_runtime().block_on(flaky(&policy, k));

        prop_assert_eq!(result.unwrap(), k + 1);
        prop_assert_eq!(attempts.len() as u32, k + 1);
        let gaps = gaps(&attempts);
        prop_assert!(gaps.windows(2).all(|w| w[0] <= w[1]), "delays decreased: {:?}", gaps);
        prop_assert!(gaps.iter().all(|g| *g <= Duration::from_millis(max_ms + 1)));
    }

    #[test]
    fn gives_up_after_nb_times(
        nb_times in 1u32..8,
        extra in 0u32..4,
        initial_ms in 1u64..500,
    ) {
        let k = nb_times + extra;
        let policy = policy(nb_times, initial_ms, 2.0, 10_000);
        let (result, attempts) = paused_runtime().block_on(flaky(&policy, k));

        prop_assert!(result.is_err());
        prop_assert_eq!(attempts.len() as u32, nb_times);
    }

    #[test]
    fn complete_with_retry_swallows_exhaustion(nb_times in 1u32..6) {
        let policy = policy(nb_times, 10, 2.0, 1_000);
        let calls = Arc::new(Mutex::new(0u32));
        let out: Option<()> = paused_runtime().block_on(complete_with_retry(
            &policy,
            "respond_activity_task_completed",
            || {
                let calls = Arc::clone(&calls);
                async move {
                    *calls.lock() += 1;
                    Err(CoreError::Timeout("slow".into()))
                }
            },
        ));

        prop_assert!(out.is_none());
        prop_assert_eq!(*calls.lock(), nb_times);
    }
}

#[test]
fn does_not_exist_is_never_retried() {
    let policy = policy(5, 10, 2.0, 1_000);
    let calls = Arc::new(Mutex::new(0u32));
    let result: Result<(), CoreError> = paused_runtime().block_on(with_delay(&policy, || {
        let calls = Arc::clone(&calls);
        async move {
            *calls.lock() += 1;
            Err(CoreError::DoesNotExist("task".into()))
        }
    }));
    assert!(result.is_err());
    assert_eq!(*calls.lock(), 1);
}
