//! Task process tests
//!
//! The worker re-executes its own binary for every task, so this target
//! runs without the default harness: `main` first serves the task when it
//! was started as a task process, and otherwise runs the scenarios below.

#[cfg(unix)]
use std::sync::Arc;
#[cfg(unix)]
use std::time::{Duration, Instant};

#[cfg(unix)]
use flowlane::activity::serve_task;
#[cfg(unix)]
use flowlane::testing::{activity_task, MockSwfService, ServiceCall};
#[cfg(unix)]
use flowlane::{
    ActivityError, ActivityRegistry, ActivityWorker, Actor, ActorHandle, ServiceContext,
    WorkerConfig,
};
#[cfg(unix)]
use flowlane_core::HeartbeatResponse;
#[cfg(unix)]
use serde_json::{json, Value};

#[cfg(unix)]
const WAIT: Duration = Duration::from_secs(60);

#[cfg(unix)]
fn registry() -> ActivityRegistry {
    let registry = ActivityRegistry::new();
    registry
        .register_fn("sum", "1.0", |_ctx, input| async move {
            Ok(json!(input.arg::<i64>(0)? + input.arg::<i64>(1)?))
        })
        .unwrap();
    registry
        .register_fn("whoami", "1.0", |_ctx, _input| async move {
            Ok(json!(std::process::id()))
        })
        .unwrap();
    registry
        .register_fn("block", "1.0", |_ctx, _input| async move {
            std::thread::sleep(Duration::from_secs(600));
            Ok(Value::Null)
        })
        .unwrap();
    registry
        .register_fn("watch", "1.0", |ctx, _input| async move {
            ctx.record_heartbeat("halfway");
            ctx.cancelled().await;
            Err::<Value, _>(ActivityError::new("Canceled", "stopping"))
        })
        .unwrap();
    registry
        .register_fn("boom", "1.0", |_ctx, _input| async move {
            if true {
                panic!("handler exploded");
            }
            Ok(Value::Null)
        })
        .unwrap();
    registry
        .register_fn("crash", "1.0", |_ctx, _input| async move {
            if true {
                std::process::exit(3);
            }
            Ok(Value::Null)
        })
        .unwrap();
    registry
}

#[cfg(unix)]
fn start(
    service: &Arc<MockSwfService>,
    config: WorkerConfig,
) -> (ActorHandle<ActivityWorker>, Arc<ActivityWorker>, tokio::task::JoinHandle<()>) {
    let worker = ActivityWorker::new(
        Arc::clone(service) as Arc<dyn flowlane::SwfService>,
        ServiceContext::new("test", "local"),
        "default",
        Arc::new(registry()),
        config,
    )
    .unwrap();
    let actor: Actor<ActivityWorker> = worker.into_actor();
    let handle = actor.handle();
    let worker = Arc::clone(actor.poller());
    let run = tokio::spawn(async move { actor.run().await });
    (handle, worker, run)
}

#[cfg(unix)]
async fn wait_for_responses(service: &MockSwfService, count: usize) {
    tokio::time::timeout(WAIT, async {
        while service.responses().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("responses not sent in time");
}

#[cfg(unix)]
async fn first_pid(worker: &ActivityWorker) -> u32 {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(pid) = worker.supervisor().pids().snapshot().first() {
                return *pid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task process never started")
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
async fn test_handlers_run_in_a_task_process() {
    let service = Arc::new(MockSwfService::new());
    service.push_activity_task(Ok(activity_task("tok-sum", "sum-0", "sum", json!({"args": [3, 4]}))));
    service.push_activity_task(Ok(activity_task("tok-who", "whoami-0", "whoami", json!(null))));
    let (handle, _worker, run) = start(&service, WorkerConfig::default());

    wait_for_responses(&service, 2).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    let responses = service.responses();
    assert!(responses.contains(&ServiceCall::RespondActivityCompleted {
        task_token: "tok-sum".into(),
        result: Some("7".into()),
    }));
    let pid = responses
        .iter()
        .find_map(|call| match call {
            ServiceCall::RespondActivityCompleted { task_token, result } if task_token == "tok-who" => {
                result.as_deref().and_then(|r| r.parse::<u32>().ok())
            }
            _ => None,
        })
        .expect("whoami did not complete");
    assert_ne!(pid, std::process::id());
}

#[cfg(unix)]
async fn test_blocking_handler_is_killed_on_cancel() {
    let service = Arc::new(MockSwfService::new());
    service.push_heartbeat(Ok(HeartbeatResponse {
        cancel_requested: true,
    }));
    service.push_activity_task(Ok(activity_task("tok-1", "block-0", "block", json!(null))));
    service.push_activity_task(Ok(activity_task("tok-2", "sum-0", "sum", json!({"args": [3, 4]}))));
    let config = WorkerConfig::default()
        .with_nb_processes(1)
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_cancel_grace(Duration::from_secs(1));
    let started = Instant::now();
    let (handle, worker, run) = start(&service, config);
    let pid = first_pid(&worker).await;

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
                result: Some("7".into()),
            },
        ]
    );
    assert!(!process_alive(pid));
    assert_eq!(worker.supervisor().peak(), 1);
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[cfg(unix)]
async fn test_cooperative_cancel_keeps_details() {
    let service = Arc::new(MockSwfService::new());
    service.push_heartbeat(Ok(HeartbeatResponse {
        cancel_requested: true,
    }));
    service.push_activity_task(Ok(activity_task("tok-w", "watch-0", "watch", json!(null))));
    let config = WorkerConfig::default().with_heartbeat_interval(Duration::from_secs(1));
    let (handle, _worker, run) = start(&service, config);

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

#[cfg(unix)]
async fn test_panics_and_crashes_fail_the_task() {
    let service = Arc::new(MockSwfService::new());
    service.push_activity_task(Ok(activity_task("tok-boom", "boom-0", "boom", json!(null))));
    service.push_activity_task(Ok(activity_task("tok-crash", "crash-0", "crash", json!(null))));
    let (handle, _worker, run) = start(&service, WorkerConfig::default());

    wait_for_responses(&service, 2).await;
    handle.stop(true, Duration::from_secs(5)).await;
    run.await.unwrap();

    let reason_for = |token: &str| {
        service
            .responses()
            .into_iter()
            .find_map(|call| match call {
                ServiceCall::RespondActivityFailed {
                    task_token, reason, ..
                } if task_token == token => Some(reason),
                _ => None,
            })
            .unwrap_or_else(|| panic!("{} did not fail", token))
    };
    assert!(reason_for("tok-boom").contains("handler exploded"));
    assert!(reason_for("tok-crash").starts_with("ProcessExited"));
}

#[cfg(unix)]
async fn test_graceful_stop_kills_within_join_timeout() {
    let service = Arc::new(MockSwfService::new());
    service.push_activity_task(Ok(activity_task("tok-b", "block-0", "block", json!(null))));
    let (handle, worker, run) = start(&service, WorkerConfig::default());
    let pid = first_pid(&worker).await;

    let started = Instant::now();
    handle.stop(true, Duration::from_secs(2)).await;
    assert!(started.elapsed() < Duration::from_secs(3));
    run.await.unwrap();

    assert!(!process_alive(pid));
    assert!(worker.supervisor().pids().is_empty());
    match &service.responses()[..] {
        [ServiceCall::RespondActivityFailed { reason, .. }] => {
            assert!(reason.starts_with("WorkerShutdown"))
        }
        other => panic!("Expected one failure, got {:?}", other),
    }
}

#[cfg(unix)]
fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        if let Some(code) = serve_task(&registry()).await {
            std::process::exit(code);
        }

        println!("running 5 tests");
        test_handlers_run_in_a_task_process().await;
        println!("test test_handlers_run_in_a_task_process ... ok");
        test_blocking_handler_is_killed_on_cancel().await;
        println!("test test_blocking_handler_is_killed_on_cancel ... ok");
        test_cooperative_cancel_keeps_details().await;
        println!("test test_cooperative_cancel_keeps_details ... ok");
        test_panics_and_crashes_fail_the_task().await;
        println!("test test_panics_and_crashes_fail_the_task ... ok");
        test_graceful_stop_kills_within_join_timeout().await;
        println!("test test_graceful_stop_kills_within_join_timeout ... ok");
    });
}

#[cfg(not(unix))]
fn main() {}
