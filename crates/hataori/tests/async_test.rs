use hataori::prelude::*;
use hataori::{AsyncJob, JobOutcome, Transition};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn with_worker(flow: FlowBuilder) -> (Arc<Engine<InMemoryStore>>, AsyncWorker<InMemoryStore>) {
    let registry = FlowRegistry::bootstrap([flow]).expect("valid flow");
    let config = EngineConfig::default().with_queue_capacity(16);
    let (queue, jobs) = ChannelQueue::from_config(&config);
    let engine = Arc::new(
        Engine::builder(InMemoryStore::new(), registry)
            .queue(queue)
            .config(config)
            .build()
            .expect("valid engine"),
    );
    let worker = AsyncWorker::new(Arc::clone(&engine), jobs);
    (engine, worker)
}

async fn complete(engine: &Engine<InMemoryStore>, instance: &ActivityInstance) {
    engine.start(instance.id, None).await.expect("started");
    engine.finish(instance.id, None).await.expect("finished");
}

fn counting_flow(calls: Arc<AtomicU32>) -> FlowBuilder {
    FlowBuilder::new("dispatch")
        .start_with("start", ActivityKind::start(), ActivityConfig::new())
        .and_then(
            "send",
            ActivityKind::asynchronous(callback_fn("send", move |ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                ctx.set("sent", json!(true));
                Ok(())
            })),
            ActivityConfig::new(),
        )
        .and_then("end", ActivityKind::End, ActivityConfig::new())
}

#[tokio::test]
async fn test_async_activity_runs_on_worker() {
    let calls = Arc::new(AtomicU32::new(0));
    let (engine, mut worker) = with_worker(counting_flow(Arc::clone(&calls)));

    let started = engine
        .start_process("dispatch", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;

    let current = engine
        .current_activities(started.process.id, None)
        .await
        .expect("queryable");
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].status, InstanceStatus::Scheduled);
    assert!(current[0].scheduled_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let outcomes = worker.drain().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        &outcomes[0],
        JobOutcome::Completed(instance) if instance.status == InstanceStatus::Done
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let process = engine.process(started.process.id).await.expect("stored");
    assert_eq!(process.status, ProcessStatus::Done);
    assert_eq!(process.data["sent"], json!(true));
}

#[tokio::test]
async fn test_repeated_delivery_runs_callback_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let (engine, mut worker) = with_worker(counting_flow(Arc::clone(&calls)));

    let started = engine
        .start_process("dispatch", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;
    let send = engine
        .current_activities(started.process.id, None)
        .await
        .expect("queryable")
        .remove(0);

    worker.drain().await;

    let result = engine.run_async("dispatch", send.id).await;
    assert!(matches!(
        result,
        Err(FlowError::InvalidTransition {
            transition: Transition::Run,
            status: InstanceStatus::Done,
            ..
        })
    ));

    let outcome = worker
        .handle(AsyncJob {
            flow_label: "dispatch".into(),
            instance_id: send.id,
        })
        .await;
    assert!(matches!(outcome, JobOutcome::Duplicate(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_failure_is_captured_and_retried() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    let (engine, mut worker) = with_worker(
        FlowBuilder::new("export")
            .start_with("start", ActivityKind::start(), ActivityConfig::new())
            .and_then(
                "upload",
                ActivityKind::asynchronous(callback_fn("upload", move |_| {
                    if flag.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(CallbackError::new("bucket unreachable"))
                    }
                })),
                ActivityConfig::new(),
            )
            .and_then("end", ActivityKind::End, ActivityConfig::new()),
    );

    let started = engine
        .start_process("export", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;

    let outcomes = worker.drain().await;
    assert_eq!(outcomes.len(), 1);
    let upload = engine
        .activities(started.process.id)
        .await
        .expect("queryable")
        .into_iter()
        .find(|i| i.activity_name.as_str() == "upload")
        .expect("upload instance");
    assert_eq!(upload.status, InstanceStatus::Error);
    assert!(upload.failure.is_some());

    healthy.store(true, Ordering::SeqCst);
    let retried = engine.retry(upload.id, None).await.expect("retried");
    assert_eq!(retried.status, InstanceStatus::Done);

    let process = engine.process(started.process.id).await.expect("stored");
    assert_eq!(process.status, ProcessStatus::Done);
}

#[tokio::test]
async fn test_chained_async_activities_drain_in_one_pass() {
    let (engine, mut worker) = with_worker(
        FlowBuilder::new("pipeline")
            .start_with("start", ActivityKind::start(), ActivityConfig::new())
            .and_then(
                "extract",
                ActivityKind::asynchronous(callback_fn("extract", |ctx| {
                    ctx.set("rows", json!(3));
                    Ok(())
                })),
                ActivityConfig::new(),
            )
            .and_then(
                "load",
                ActivityKind::asynchronous(callback_fn("load", |ctx| {
                    let rows = ctx.data()["rows"].as_u64().unwrap_or(0);
                    ctx.set("loaded", json!(rows));
                    Ok(())
                })),
                ActivityConfig::new(),
            )
            .and_then("end", ActivityKind::End, ActivityConfig::new()),
    );

    let started = engine
        .start_process("pipeline", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;

    let outcomes = worker.drain().await;
    assert_eq!(outcomes.len(), 2);

    let process = engine.process(started.process.id).await.expect("stored");
    assert_eq!(process.status, ProcessStatus::Done);
    assert_eq!(process.data["loaded"], json!(3));
}

#[tokio::test]
async fn test_spawned_worker_processes_jobs() {
    let calls = Arc::new(AtomicU32::new(0));
    let (engine, worker) = with_worker(counting_flow(Arc::clone(&calls)));

    let started = engine
        .start_process("dispatch", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;

    let handle = tokio::spawn(worker.run());
    let mut finished = false;
    for _ in 0..100 {
        let process = engine.process(started.process.id).await.expect("stored");
        if process.status == ProcessStatus::Done {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.abort();

    assert!(finished);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fan_out_past_queue_capacity_does_not_block_worker() {
    let registry = FlowRegistry::bootstrap([FlowBuilder::new("broadcast")
        .start_with("start", ActivityKind::start(), ActivityConfig::new())
        .and_then(
            "prepare",
            ActivityKind::asynchronous(callback_fn("prepare", |_| Ok(()))),
            ActivityConfig::new(),
        )
        .and_then(
            "mail",
            ActivityKind::asynchronous(callback_fn("mail", |_| Ok(()))),
            ActivityConfig::new(),
        )
        .add_activity(
            "sms",
            ActivityKind::asynchronous(callback_fn("sms", |_| Ok(()))),
            Some("prepare"),
            ActivityConfig::new(),
        )])
    .expect("valid flow");
    let (queue, jobs) = ChannelQueue::new(1);
    let engine = Arc::new(
        Engine::builder(InMemoryStore::new(), registry)
            .queue(queue)
            .build()
            .expect("valid engine"),
    );
    let mut worker = AsyncWorker::new(Arc::clone(&engine), jobs);

    let started = engine
        .start_process("broadcast", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;

    let outcomes = tokio::time::timeout(Duration::from_secs(3), worker.drain())
        .await
        .expect("drain finishes");
    assert_eq!(outcomes.len(), 2);

    let all = engine
        .activities(started.process.id)
        .await
        .expect("queryable");
    let mail = all
        .iter()
        .find(|i| i.activity_name.as_str() == "mail")
        .expect("mail instance");
    assert_eq!(mail.status, InstanceStatus::Done);
    let sms = all
        .iter()
        .find(|i| i.activity_name.as_str() == "sms")
        .expect("sms instance");
    assert_eq!(sms.status, InstanceStatus::Error);
    assert!(sms
        .failure
        .as_ref()
        .is_some_and(|f| f.message.contains("full")));

    let retried = engine.retry(sms.id, None).await.expect("retried");
    assert_eq!(retried.status, InstanceStatus::Done);
}

#[tokio::test]
async fn test_refused_enqueue_is_recoverable() {
    let calls = Arc::new(AtomicU32::new(0));
    let registry =
        FlowRegistry::bootstrap([counting_flow(Arc::clone(&calls))]).expect("valid flow");
    let (queue, jobs) = ChannelQueue::new(4);
    drop(jobs);
    let engine = Engine::builder(InMemoryStore::new(), registry)
        .queue(queue)
        .build()
        .expect("valid engine");

    let started = engine
        .start_process("dispatch", StartOptions::new())
        .await
        .expect("process started");
    engine.start(started.start.id, None).await.expect("started");
    let finished = engine
        .finish(started.start.id, None)
        .await
        .expect("finish is durable");
    assert_eq!(finished.status, InstanceStatus::Done);

    let send = engine
        .activities(started.process.id)
        .await
        .expect("queryable")
        .into_iter()
        .find(|i| i.activity_name.as_str() == "send")
        .expect("send instance");
    assert_eq!(send.status, InstanceStatus::Error);
    assert!(send.failure.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let retried = engine.retry(send.id, None).await.expect("retried");
    assert_eq!(retried.status, InstanceStatus::Done);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let process = engine.process(started.process.id).await.expect("stored");
    assert_eq!(process.status, ProcessStatus::Done);
}

#[tokio::test]
async fn test_run_async_rejects_foreign_flow() {
    let registry = FlowRegistry::bootstrap([
        counting_flow(Arc::new(AtomicU32::new(0))),
        FlowBuilder::new("other")
            .start_with("start", ActivityKind::start(), ActivityConfig::new())
            .and_then(
                "send",
                ActivityKind::asynchronous(callback_fn("send", |_| Ok(()))),
                ActivityConfig::new(),
            ),
    ])
    .expect("valid flows");
    let (queue, mut jobs) = ChannelQueue::new(4);
    let engine = Engine::builder(InMemoryStore::new(), registry)
        .queue(queue)
        .build()
        .expect("valid engine");

    let started = engine
        .start_process("dispatch", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;
    let job = jobs.recv().await.expect("job queued");

    let result = engine.run_async("other", job.instance_id).await;
    assert!(matches!(result, Err(FlowError::UnknownActivity { .. })));
    let send = engine.instance(job.instance_id).await.expect("stored");
    assert_eq!(send.status, InstanceStatus::Scheduled);
}

#[tokio::test]
async fn test_run_async_rejects_non_async_instance() {
    let (engine, _worker) = with_worker(counting_flow(Arc::new(AtomicU32::new(0))));
    let started = engine
        .start_process("dispatch", StartOptions::new())
        .await
        .expect("process started");

    let result = engine.run_async("dispatch", started.start.id).await;
    assert!(matches!(result, Err(FlowError::InvalidTransition { .. })));

    let result = engine.run_async("unknown", started.start.id).await;
    assert!(matches!(result, Err(FlowError::UnknownFlow(_))));
}
