//! Decider integration tests
//!
//! These drive a real [`Decider`] actor against the scripted
//! [`MockSwfService`]: poll, paginate, replay and respond.

use std::sync::Arc;
use std::time::Duration;

use flowlane::testing::{decision_page, HistoryBuilder, MockSwfService, ServiceCall};
use flowlane::{
    ActivitySpec, Decider, DeciderConfig, Decision, FlowError, ServiceContext, WorkflowRegistry,
    WorkflowType,
};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

/// `submit(A)`, wait for it, then `submit(B)` with A's result
fn two_step_registry() -> Arc<WorkflowRegistry> {
    let registry = WorkflowRegistry::new();
    registry
        .register_fn("pipeline", "1.0", |ctx, input| async move {
            let a = ctx.submit(&ActivitySpec::new("A", "1.0"), input)?;
            ctx.wait([&a])?;
            let first = a.result()?;
            let b = ctx.submit(&ActivitySpec::new("B", "1.0"), vec![first])?;
            Ok(b.await?)
        })
        .unwrap();
    registry
        .register_fn("broken", "1.0", |_ctx, _input| async move {
            Err::<Value, _>(FlowError::InvalidInput("amount must be positive".into()))
        })
        .unwrap();
    Arc::new(registry)
}

fn decider(service: &Arc<MockSwfService>, config: DeciderConfig) -> Decider {
    Decider::new(
        Arc::clone(service) as Arc<dyn flowlane::SwfService>,
        ServiceContext::new("test", "local").with_identity("decider-test"),
        "default",
        two_step_registry(),
        config,
    )
    .unwrap()
}

/// Run the decider actor until the first decision response is recorded
async fn run_until_response(service: &Arc<MockSwfService>, decider: Decider) -> Vec<ServiceCall> {
    let actor = decider.into_actor();
    let handle = actor.handle();
    let run = tokio::spawn(async move { actor.run().await });

    assert!(
        service
            .wait_for_call(ServiceCall::is_response, WAIT)
            .await,
        "decider never responded"
    );
    handle.stop(true, Duration::from_secs(1)).await;
    run.await.unwrap();
    assert!(!handle.is_running());
    service.responses()
}

fn args_of(payload: Option<&str>) -> Value {
    let payload: Value = serde_json::from_str(payload.expect("schedule carries input")).unwrap();
    payload["args"].clone()
}

fn only_decisions(responses: &[ServiceCall]) -> &[Decision] {
    match responses {
        [ServiceCall::RespondDecisionCompleted { decisions, .. }] => decisions,
        other => panic!("Expected exactly one decision response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_first_decision_schedules_a_only() {
    let service = Arc::new(MockSwfService::new());
    service.push_decision_page(Ok(decision_page(
        "tok-1",
        WorkflowType::new("pipeline", "1.0"),
        HistoryBuilder::new()
            .workflow_started(json!({"args": [3, 4]}))
            .decision_completed(None)
            .into_events(),
        None,
    )));

    let responses = run_until_response(&service, decider(&service, DeciderConfig::default())).await;
    let decisions = only_decisions(&responses);

    assert_eq!(decisions.len(), 1);
    match &decisions[0] {
        Decision::ScheduleActivityTask {
            activity_id,
            activity_type,
            input,
            ..
        } => {
            assert_eq!(activity_id, "A-0");
            assert_eq!(activity_type.name, "A");
            assert_eq!(args_of(input.as_deref()), json!([3, 4]));
        }
        other => panic!("Expected a schedule decision, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_decision_schedules_b_without_rescheduling_a() {
    let service = Arc::new(MockSwfService::new());
    service.push_decision_page(Ok(decision_page(
        "tok-2",
        WorkflowType::new("pipeline", "1.0"),
        HistoryBuilder::new()
            .workflow_started(json!({"args": [3, 4]}))
            .decision_completed(None)
            .activity_scheduled("A-0", "A", "1.0")
            .activity_started("A-0")
            .activity_completed("A-0", json!(7))
            .decision_completed(None)
            .into_events(),
        None,
    )));

    let responses = run_until_response(&service, decider(&service, DeciderConfig::default())).await;
    let decisions = only_decisions(&responses);

    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].activity_id(), Some("B-0"));
    match &decisions[0] {
        Decision::ScheduleActivityTask { input, .. } => {
            assert_eq!(args_of(input.as_deref()), json!([7]));
        }
        other => panic!("Expected a schedule decision, got {:?}", other),
    }
}

#[tokio::test]
async fn test_history_pages_are_merged() {
    let service = Arc::new(MockSwfService::new());
    let events = HistoryBuilder::new()
        .workflow_started(json!({"args": [1]}))
        .decision_completed(None)
        .activity_scheduled("A-0", "A", "1.0")
        .activity_completed("A-0", json!(2))
        .activity_scheduled("B-0", "B", "1.0")
        .activity_completed("B-0", json!(3))
        .into_events();
    let (first, second) = events.split_at(4);
    let workflow_type = WorkflowType::new("pipeline", "1.0");
    service.push_decision_page(Ok(decision_page(
        "tok-3",
        workflow_type.clone(),
        first.to_vec(),
        Some("page-2"),
    )));
    service.push_decision_page(Ok(decision_page(
        "tok-3",
        workflow_type,
        second.to_vec(),
        None,
    )));

    let responses = run_until_response(&service, decider(&service, DeciderConfig::default())).await;
    assert_eq!(
        only_decisions(&responses),
        &[Decision::CompleteWorkflowExecution {
            result: Some("3".into())
        }]
    );

    let page_polls = service.count(|call| {
        matches!(
            call,
            ServiceCall::PollDecision { next_page_token: Some(token), identity, .. }
                if token == "page-2" && identity == "decider-test"
        )
    });
    assert_eq!(page_polls, 1);
}

#[tokio::test]
async fn test_workflow_error_fails_execution() {
    let service = Arc::new(MockSwfService::new());
    service.push_decision_page(Ok(decision_page(
        "tok-4",
        WorkflowType::new("broken", "1.0"),
        HistoryBuilder::new().workflow_started(json!(null)).into_events(),
        None,
    )));

    let responses = run_until_response(&service, decider(&service, DeciderConfig::default())).await;
    match only_decisions(&responses) {
        [Decision::FailWorkflowExecution { reason, details }] => {
            assert!(reason.starts_with("InvalidInput: "));
            assert!(reason.len() <= 256);
            let details: Value = serde_json::from_str(details).unwrap();
            assert!(details["error"]
                .as_str()
                .unwrap()
                .contains("amount must be positive"));
        }
        other => panic!("Expected a failure decision, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unregistered_workflow_is_left_to_time_out() {
    let service = Arc::new(MockSwfService::new());
    service.push_decision_page(Ok(decision_page(
        "tok-5",
        WorkflowType::new("unknown", "9"),
        HistoryBuilder::new().workflow_started(json!(null)).into_events(),
        None,
    )));
    let actor = decider(&service, DeciderConfig::default()).into_actor();
    let handle = actor.handle();
    let run = tokio::spawn(async move { actor.run().await });

    // The scripted page is consumed, later polls come back empty.
    tokio::time::timeout(WAIT, async {
        while service.poll_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    handle.stop(false, Duration::from_secs(1)).await;
    run.await.unwrap();

    assert!(service.responses().is_empty());
}

#[tokio::test]
async fn test_max_parallel_defers_schedules() {
    let registry = WorkflowRegistry::new();
    registry
        .register_fn("fan-out", "1.0", |ctx, _input| async move {
            let spec = ActivitySpec::new("work", "1.0");
            let futures = (0..5)
                .map(|i| ctx.submit(&spec, vec![json!(i)]))
                .collect::<flowlane::Result<Vec<_>>>()?;
            ctx.wait(&futures)?;
            Ok(json!(futures.len()))
        })
        .unwrap();
    let service = Arc::new(MockSwfService::new());
    service.push_decision_page(Ok(decision_page(
        "tok-6",
        WorkflowType::new("fan-out", "1.0"),
        HistoryBuilder::new().workflow_started(json!(null)).into_events(),
        None,
    )));
    let decider = Decider::new(
        Arc::clone(&service) as Arc<dyn flowlane::SwfService>,
        ServiceContext::new("test", "local"),
        "default",
        Arc::new(registry),
        DeciderConfig::default().with_max_parallel(2),
    )
    .unwrap();

    let responses = run_until_response(&service, decider).await;
    let ids: Vec<_> = only_decisions(&responses)
        .iter()
        .filter_map(Decision::activity_id)
        .collect();
    assert_eq!(ids, vec!["work-0", "work-1"]);
}
