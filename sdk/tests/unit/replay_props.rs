//! Property-based tests for deterministic replay
//!
//! Histories are generated for a chain workflow (each step feeds the next)
//! and for a fan-out over possibly repeated arguments, then replayed.

use std::collections::HashSet;
use std::sync::Arc;

use flowlane::testing::HistoryBuilder;
use flowlane::workflow::{replay, FutureStatus, ReplayOptions};
use flowlane::{ActivitySpec, Decision, History, RegisteredWorkflow, WorkflowExecution};
use proptest::prelude::*;
use serde_json::{json, Value};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Runs `steps` activities one after the other, passing each result on
fn chain(steps: usize) -> RegisteredWorkflow {
    RegisteredWorkflow::from_fn("chain", "1.0", move |ctx, input| async move {
        let spec = ActivitySpec::new("step", "1.0");
        let mut acc = input;
        for _ in 0..steps {
            let future = ctx.submit(&spec, vec![acc])?;
            acc = future.await?;
        }
        Ok(acc)
    })
}

/// Submits one idempotent activity per argument, then waits for all
fn fan_out(args: Vec<i64>) -> RegisteredWorkflow {
    RegisteredWorkflow::from_fn("fan-out", "1.0", move |ctx, _input| {
        let args = args.clone();
        async move {
            let spec = ActivitySpec::new("item", "1.0").idempotent();
            let futures = args
                .iter()
                .map(|arg| ctx.submit(&spec, vec![json!(arg)]))
                .collect::<flowlane::Result<Vec<_>>>()?;
            ctx.wait(&futures)?;
            Ok(json!(futures.len()))
        }
    })
}

/// History of a chain run: `results` steps completed, the next one
/// optionally scheduled
fn chain_history(input: i64, results: &[i64], pending: bool) -> History {
    let mut builder = HistoryBuilder::new()
        .workflow_started(json!(input))
        .decision_completed(None);
    for (i, result) in results.iter().enumerate() {
        let id = format!("step-{}", i);
        builder = builder
            .activity_scheduled(&id, "step", "1.0")
            .activity_started(&id)
            .activity_completed(&id, json!(result))
            .decision_completed(None);
    }
    if pending {
        builder = builder.activity_scheduled(&format!("step-{}", results.len()), "step", "1.0");
    }
    builder.build()
}

fn execution() -> WorkflowExecution {
    WorkflowExecution::new("wf-prop", "run-prop")
}

fn arb_chain() -> impl Strategy<Value = (usize, Vec<i64>, bool, i64)> {
    (1usize..6).prop_flat_map(|steps| {
        (
            Just(steps),
            prop::collection::vec(-1000i64..1000, 0..=steps),
            any::<bool>(),
            -1000i64..1000,
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replay_is_idempotent((steps, results, pending, input) in arb_chain()) {
        let pending = pending && results.len() < steps;
        let history = Arc::new(chain_history(input, &results, pending));
        let workflow = chain(steps);
        let rt = runtime();

        let first = rt.block_on(replay(
            Arc::clone(&history),
            &workflow,
            json!(input),
            execution(),
            ReplayOptions::default(),
        ));
        let second = rt.block_on(replay(
            Arc::clone(&history),
            &workflow,
            json!(input),
            execution(),
            ReplayOptions::default(),
        ));

        prop_assert_eq!(&first.signatures, &second.signatures);
        prop_assert_eq!(&first.decisions, &second.decisions);
        prop_assert_eq!(&first.status, &second.status);

        if results.len() == steps {
            let last = results.last().map(|r| json!(r)).unwrap_or(json!(input));
            prop_assert_eq!(
                &first.decisions,
                &vec![Decision::CompleteWorkflowExecution { result: Some(last.to_string()) }]
            );
        } else if pending {
            prop_assert!(first.decisions.is_empty());
        } else {
            let next = format!("step-{}", results.len());
            prop_assert_eq!(first.decisions.len(), 1);
            prop_assert_eq!(first.decisions[0].activity_id(), Some(next.as_str()));
        }
    }

    #[test]
    fn futures_only_move_forward((steps, results, pending, input) in arb_chain()) {
        let pending = pending && results.len() < steps;
        let history = Arc::new(chain_history(input, &results, pending));
        let outcome = runtime().block_on(replay(
            history,
            &chain(steps),
            json!(input),
            execution(),
            ReplayOptions::default(),
        ));

        for future in &outcome.futures {
            let transitions = future.transitions();
            prop_assert_eq!(transitions[0], FutureStatus::Pending);
            prop_assert!(transitions.windows(2).all(|w| w[0] < w[1]));
            let settled = transitions.iter().filter(|s| s.is_settled()).count();
            prop_assert!(settled <= 1);
            prop_assert_eq!(future.status(), *transitions.last().unwrap());
        }
    }

    #[test]
    fn repeated_calls_schedule_once(args in prop::collection::vec(0i64..5, 1..12)) {
        let history = Arc::new(HistoryBuilder::new().workflow_started(Value::Null).build());
        let outcome = runtime().block_on(replay(
            history,
            &fan_out(args.clone()),
            Value::Null,
            execution(),
            ReplayOptions::default(),
        ));

        let distinct: HashSet<i64> = args.iter().copied().collect();
        let ids: Vec<&str> = outcome
            .decisions
            .iter()
            .filter_map(Decision::activity_id)
            .collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();

        prop_assert!(outcome.is_suspended());
        prop_assert_eq!(ids.len(), distinct.len());
        prop_assert_eq!(unique.len(), ids.len());
        prop_assert_eq!(outcome.futures.len(), distinct.len());
        prop_assert_eq!(outcome.signatures.len(), args.len());
    }
}
