//! Activity worker integration tests
//!
//! An [`ActivityWorker`] actor runs against the scripted [`MockSwfService`];
//! assertions are made on the responses and heartbeats it sent. Handlers run
//! in-process here; `isolation_tests.rs` covers task processes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowlane::testing::{activity_task, MockSwfService, ServiceCall};
use flowlane::{
    ActivityError, ActivityRegistry, ActivityWorker, Actor, ActorHandle, CoreError, Isolation,
    ServiceContext, WorkerConfig,
};
use flowlane_core::HeartbeatResponse;
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(60);

fn start(
    service: &Arc<MockSwfService>,
    registry: ActivityRegistry,
    config: WorkerConfig,
) -> (ActorHandle<ActivityWorker>, Arc<ActivityWorker>, tokio::task::JoinHandle<()>) {
    let worker = ActivityWorker::new(
        Arc::clone(service) as Arc<dyn flowlane::SwfService>,
        ServiceContext::new("test", "local"),
        "default",
        Arc::new(registry),
        config.with_isolation(Isolation::InProcess),
    )
    .unwrap();
    let actor: Actor<ActivityWorker> = worker.into_actor();
    let handle = actor.handle();
    let worker = Arc::clone(actor.poller());
    let run = tokio::spawn(async move { actor.run().await });
    (handle, worker, run)
}

async fn wait_for_responses(service: &MockSwfService, count: usize) {
    tokio::time::timeout(WAIT, async {
        while service.responses().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("responses not sent in time");
}

fn sum_registry() -> ActivityRegistry {
    let registry = ActivityRegistry::new();
    registry
        .register_fn("sum", "1.0", |_ctx, input| async move {
            Ok(json!(input.arg::<i64>(0)? + input.arg::<i64>(1)?))
        })
        .unwrap();
    registry
        .register_fn("validate", "1.0", |_ctx, _input| async move {
            Err::<Value, _>(ActivityError::new("ValueError", "bad input"))
        })
        .unwrap();
    registry
}

#[tokio::test]
async fn test_sum_task_completes_once() {
    let service = Arc::new(MockSwfService::new());
    service.push_activity_task(Ok(activity_task("tok-sum", "sum-0", "sum", json!({"args": [3, 4]}))));
    let (handle, _worker, run) = start(&service, sum_registry(), WorkerConfig::default());

    wait_for_responses(&service, 1).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    assert_eq!(
        service.responses(),
        vec![ServiceCall::RespondActivityCompleted {
            task_token: "tok-sum".into(),
            result: Some("7".into()),
        }]
    );
}

#[tokio::test]
async fn test_handler_error_fails_once() {
    let service = Arc::new(MockSwfService::new());
    service.push_activity_task(Ok(activity_task("tok-bad", "validate-0", "validate", json!(null))));
    let (handle, _worker, run) = start(&service, sum_registry(), WorkerConfig::default());

    wait_for_responses(&service, 1).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    match &service.responses()[..] {
        [ServiceCall::RespondActivityFailed {
            task_token, reason, ..
        }] => {
            assert_eq!(task_token, "tok-bad");
            assert!(reason.contains("ValueError"));
            assert!(reason.contains("bad input"));
        }
        other => panic!("Expected exactly one failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_poll_timeouts_keep_polling() {
    let service = Arc::new(MockSwfService::new());
    for _ in 0..3 {
        service.push_activity_task(Err(CoreError::PollTimeout));
    }
    let (handle, _worker, run) = start(&service, sum_registry(), WorkerConfig::default());

    tokio::time::timeout(WAIT, async {
        while service.poll_count() < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(handle.is_running());
    assert!(!run.is_finished());

    handle.stop(true, Duration::from_secs(1)).await;
    run.await.unwrap();
    assert!(service.responses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_requested_on_third_heartbeat() {
    let completed = Arc::new(AtomicBool::new(false));
    let registry = ActivityRegistry::new();
    {
        let completed = Arc::clone(&completed);
        registry
            .register_fn("long", "1.0", move |_ctx, _input| {
                let completed = Arc::clone(&completed);
                async move {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    completed.store(true, Ordering::SeqCst);
                    Ok(json!("done"))
                }
            })
            .unwrap();
    }
    let service = Arc::new(MockSwfService::new());
    service.push_heartbeat(Ok(HeartbeatResponse::default()));
    service.push_heartbeat(Ok(HeartbeatResponse::default()));
    service.push_heartbeat(Ok(HeartbeatResponse {
        cancel_requested: true,
    }));
    service.push_activity_task(Ok(activity_task("tok-long", "long-0", "long", json!(null))));

    let config = WorkerConfig::default()
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_cancel_grace(Duration::from_secs(1));
    let (handle, worker, run) = start(&service, registry, config);

    wait_for_responses(&service, 1).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    assert_eq!(
        service.responses(),
        vec![ServiceCall::RespondActivityCanceled {
            task_token: "tok-long".into(),
            details: None,
        }]
    );
    assert_eq!(service.heartbeat_count(), 3);
    assert!(!completed.load(Ordering::SeqCst));
    assert_eq!(worker.supervisor().live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cooperative_handler_sees_cancellation() {
    let registry = ActivityRegistry::new();
    registry
        .register_fn("watch", "1.0", |ctx, _input| async move {
            ctx.record_heartbeat("halfway");
            ctx.cancelled().await;
            Err::<Value, _>(ActivityError::new("Canceled", "stopping"))
        })
        .unwrap();
    let service = Arc::new(MockSwfService::new());
    service.push_heartbeat(Ok(HeartbeatResponse {
        cancel_requested: true,
    }));
    service.push_activity_task(Ok(activity_task("tok-w", "watch-0", "watch", json!(null))));

    let config = WorkerConfig::default().with_heartbeat_interval(Duration::from_secs(1));
    let (handle, _worker, run) = start(&service, registry, config);

    wait_for_responses(&service, 1).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    assert_eq!(
        service.responses(),
        vec![ServiceCall::RespondActivityCanceled {
            task_token: "tok-w".into(),
            details: Some("halfway".into()),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_nb_processes() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let registry = ActivityRegistry::new();
    {
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        registry
            .register_fn("busy", "1.0", move |_ctx, _input| {
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .unwrap();
    }
    let service = Arc::new(MockSwfService::new());
    for i in 0..6 {
        service.push_activity_task(Ok(activity_task(
            &format!("tok-{}", i),
            &format!("busy-{}", i),
            "busy",
            json!(null),
        )));
    }

    let config = WorkerConfig::default().with_nb_processes(2);
    let (handle, worker, run) = start(&service, registry, config);

    wait_for_responses(&service, 6).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(worker.supervisor().peak() <= 2);
    assert_eq!(
        service.count(|call| matches!(call, ServiceCall::RespondActivityCompleted { .. })),
        6
    );
}

#[tokio::test(start_paused = true)]
async fn test_respond_is_retried_until_it_succeeds() {
    let service = Arc::new(MockSwfService::new());
    service.push_respond_error(CoreError::Response {
        code: "InternalFailure".into(),
        message: "blip".into(),
    });
    service.push_activity_task(Ok(activity_task("tok-r", "sum-0", "sum", json!({"args": [1, 1]}))));
    let (handle, _worker, run) = start(&service, sum_registry(), WorkerConfig::default());

    wait_for_responses(&service, 2).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    let responses = service.responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0], responses[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_handler_keeps_its_slot() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let registry = ActivityRegistry::new();
    {
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        registry
            .register_fn("nap", "1.0", move |_ctx, _input| {
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Blocks its thread and never looks at the cancellation.
                    std::thread::sleep(Duration::from_millis(800));
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!("rested"))
                }
            })
            .unwrap();
    }
    let service = Arc::new(MockSwfService::new());
    service.push_heartbeat(Ok(HeartbeatResponse {
        cancel_requested: true,
    }));
    service.push_activity_task(Ok(activity_task("tok-1", "nap-1", "nap", json!(null))));
    service.push_activity_task(Ok(activity_task("tok-2", "nap-2", "nap", json!(null))));

    let config = WorkerConfig::default()
        .with_nb_processes(1)
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_cancel_grace(Duration::from_millis(100));
    let (handle, worker, run) = start(&service, registry, config);

    wait_for_responses(&service, 2).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    assert_eq!(
        service.responses(),
        vec![
            ServiceCall::RespondActivityCanceled {
                task_token: "tok-1".into(),
                details: None,
            },
            ServiceCall::RespondActivityCompleted {
                task_token: "tok-2".into(),
                result: Some("\"rested\"".into()),
            },
        ]
    );
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(worker.supervisor().peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_stays_within_join_timeout() {
    let registry = ActivityRegistry::new();
    registry
        .register_fn("stuck", "1.0", |_ctx, _input| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        })
        .unwrap();
    let service = Arc::new(MockSwfService::new());
    service.push_activity_task(Ok(activity_task("tok-st", "stuck-0", "stuck", json!(null))));
    // Default cancel grace of 5s is longer than the join timeout.
    let (handle, worker, run) = start(&service, registry, WorkerConfig::default());

    tokio::time::timeout(WAIT, async {
        while worker.supervisor().live_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task never started");

    let started = tokio::time::Instant::now();
    handle.stop(true, Duration::from_secs(2)).await;
    assert!(started.elapsed() <= Duration::from_secs(2));
    run.await.unwrap();

    assert_eq!(worker.supervisor().live_count(), 0);
    match &service.responses()[..] {
        [ServiceCall::RespondActivityFailed { reason, .. }] => {
            assert!(reason.starts_with("WorkerShutdown"))
        }
        other => panic!("Expected one failure, got {:?}", other),
    }
}

#[cfg(unix)]
mod processes {
    use super::*;
    use flowlane::CommandSpec;

    fn process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_command_activity_round_trip() {
        let registry = ActivityRegistry::new();
        registry
            .register_command("echo", "1.0", CommandSpec::new("cat"))
            .unwrap();
        let service = Arc::new(MockSwfService::new());
        service.push_activity_task(Ok(activity_task("tok-cat", "echo-0", "echo", json!({"args": [1]}))));
        let (handle, _worker, run) = start(&service, registry, WorkerConfig::default());

        wait_for_responses(&service, 1).await;
        handle.stop(true, Duration::from_secs(5)).await;
        run.await.unwrap();

        match &service.responses()[..] {
            [ServiceCall::RespondActivityCompleted {
                result: Some(result),
                ..
            }] => {
                let value: Value = serde_json::from_str(result).unwrap();
                assert_eq!(value["args"], json!([1]));
            }
            other => panic!("Expected one completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_leaves_no_live_process() {
        let registry = ActivityRegistry::new();
        registry
            .register_command("sleepy", "1.0", CommandSpec::new("sleep").arg("600"))
            .unwrap();
        let service = Arc::new(MockSwfService::new());
        service.push_activity_task(Ok(activity_task("tok-s", "sleepy-0", "sleepy", json!(null))));
        let config = WorkerConfig::default()
            .with_join_timeout(Duration::from_secs(2))
            .with_cancel_grace(Duration::from_secs(1));
        let (handle, worker, run) = start(&service, registry, config);

        tokio::time::timeout(WAIT, async {
            while worker.supervisor().pids().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("child process never started");
        let pid = worker.supervisor().pids().snapshot()[0];

        tokio::time::timeout(Duration::from_secs(5), handle.stop(false, Duration::from_secs(2)))
            .await
            .expect("shutdown exceeded its budget");
        run.await.unwrap();

        assert!(!handle.is_running());
        assert_eq!(worker.supervisor().live_count(), 0);
        assert!(worker.supervisor().pids().is_empty());
        assert!(!worker.supervisor().pids().contains(pid));
        assert!(!process_alive(pid));
        assert_eq!(
            service.count(|call| matches!(call, ServiceCall::RespondActivityCompleted { .. })),
            0
        );
    }
}
