use hataori::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

fn engine(flow: FlowBuilder) -> Engine<InMemoryStore> {
    let registry = FlowRegistry::bootstrap([flow]).expect("valid flow");
    Engine::builder(InMemoryStore::new(), registry)
        .build()
        .expect("valid engine")
}

fn named<'a>(instances: &'a [ActivityInstance], name: &str) -> &'a ActivityInstance {
    instances
        .iter()
        .filter(|i| i.activity_name.as_str() == name)
        .last()
        .expect("instance present")
}

async fn complete(engine: &Engine<InMemoryStore>, instance: &ActivityInstance) {
    engine.start(instance.id, None).await.expect("started");
    engine.finish(instance.id, None).await.expect("finished");
}

fn review_flow() -> FlowBuilder {
    FlowBuilder::new("review")
        .start_with("start", ActivityKind::start(), ActivityConfig::new())
        .and_then("review", ActivityKind::view("review"), ActivityConfig::new())
        .and_then("end", ActivityKind::End, ActivityConfig::new())
}

async fn review_pending(
    engine: &Engine<InMemoryStore>,
) -> (Process, ActivityInstance, ActivityInstance) {
    let started = engine
        .start_process("review", StartOptions::new())
        .await
        .expect("process started");
    complete(engine, &started.start).await;
    let current = engine
        .current_activities(started.process.id, None)
        .await
        .expect("queryable");
    let review = named(&current, "review").clone();
    let start = engine.instance(started.start.id).await.expect("stored");
    (started.process, start, review)
}

#[tokio::test]
async fn test_undo_blocked_by_active_successor() {
    let engine = engine(review_flow());
    let (_, start, review) = review_pending(&engine).await;

    let result = engine.undo(start.id, None).await;
    assert!(matches!(result, Err(FlowError::UndoBlocked { .. })));

    engine.cancel(review.id, None).await.expect("canceled");
    let undone = engine.undo(start.id, None).await.expect("undone");
    assert_eq!(undone.status, InstanceStatus::Instantiated);
    assert!(undone.finished_at.is_none());
    assert!(undone.started_at.is_none());
}

#[tokio::test]
async fn test_undone_instance_can_run_again() {
    let engine = engine(review_flow());
    let (process, start, review) = review_pending(&engine).await;

    engine.cancel(review.id, None).await.expect("canceled");
    let undone = engine.undo(start.id, None).await.expect("undone");
    complete(&engine, &undone).await;

    let current = engine
        .current_activities(process.id, None)
        .await
        .expect("queryable");
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].activity_name.as_str(), "review");
    assert_ne!(current[0].id, review.id);
}

#[tokio::test]
async fn test_undo_requires_done() {
    let engine = engine(review_flow());
    let (_, _, review) = review_pending(&engine).await;

    let result = engine.undo(review.id, None).await;
    assert!(matches!(
        result,
        Err(FlowError::InvalidTransition {
            transition: hataori::Transition::Undo,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancel_only_while_instantiated() {
    let engine = engine(review_flow());
    let (_, _, review) = review_pending(&engine).await;

    engine.start(review.id, None).await.expect("started");
    let result = engine.cancel(review.id, None).await;
    assert!(matches!(
        result,
        Err(FlowError::InvalidTransition {
            status: InstanceStatus::Started,
            ..
        })
    ));

    let review = engine.instance(review.id).await.expect("stored");
    assert_eq!(review.status, InstanceStatus::Started);
}

#[tokio::test]
async fn test_cancel_and_undo_predecessors_reopens_predecessor() {
    let engine = engine(review_flow());
    let (process, start, review) = review_pending(&engine).await;

    let canceled = engine
        .cancel_and_undo_predecessors(review.id, None)
        .await
        .expect("canceled");
    assert_eq!(canceled.status, InstanceStatus::Canceled);

    let start = engine.instance(start.id).await.expect("stored");
    assert_eq!(start.status, InstanceStatus::Instantiated);
    assert!(start.finished_at.is_none());

    let current = engine
        .current_activities(process.id, None)
        .await
        .expect("queryable");
    assert_eq!(current.iter().map(|i| i.id).collect::<Vec<_>>(), vec![start.id]);
}

#[tokio::test]
async fn test_cancel_and_undo_blocked_by_sibling_branch() {
    let engine = engine(
        FlowBuilder::new("fan_out")
            .start_with("s", ActivityKind::start(), ActivityConfig::new())
            .and_then("x", ActivityKind::view("x"), ActivityConfig::new())
            .add_activity("y", ActivityKind::view("y"), Some("s"), ActivityConfig::new()),
    );
    let started = engine
        .start_process("fan_out", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;
    let current = engine
        .current_activities(started.process.id, None)
        .await
        .expect("queryable");
    let x = named(&current, "x").clone();

    let result = engine.cancel_and_undo_predecessors(x.id, None).await;
    assert!(matches!(result, Err(FlowError::UndoBlocked { .. })));

    let x = engine.instance(x.id).await.expect("stored");
    assert_eq!(x.status, InstanceStatus::Instantiated);
    let s = engine.instance(started.start.id).await.expect("stored");
    assert_eq!(s.status, InstanceStatus::Done);
}

#[tokio::test]
async fn test_failed_callback_then_retry() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    let engine = engine(
        FlowBuilder::new("charging")
            .start_with("start", ActivityKind::start(), ActivityConfig::new())
            .and_then(
                "charge",
                ActivityKind::function(callback_fn("charge", move |ctx| {
                    if flag.load(Ordering::SeqCst) {
                        ctx.set("charged", json!(true));
                        Ok(())
                    } else {
                        Err(CallbackError::new("payment gateway unavailable"))
                    }
                })),
                ActivityConfig::new(),
            )
            .and_then("receipt", ActivityKind::view("receipt"), ActivityConfig::new()),
    );

    let started = engine
        .start_process("charging", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;

    let all = engine
        .activities(started.process.id)
        .await
        .expect("queryable");
    let charge = named(&all, "charge").clone();
    assert_eq!(charge.status, InstanceStatus::Error);
    assert_eq!(
        charge.failure.as_ref().map(|f| f.message.as_str()),
        Some("payment gateway unavailable")
    );
    assert!(charge.finished_at.is_none());
    assert!(all.iter().all(|i| i.activity_name.as_str() != "receipt"));

    let still_failing = engine.retry(charge.id, None).await.expect("retried");
    assert_eq!(still_failing.status, InstanceStatus::Error);

    healthy.store(true, Ordering::SeqCst);
    let recovered = engine.retry(charge.id, None).await.expect("retried");
    assert_eq!(recovered.status, InstanceStatus::Done);
    assert!(recovered.failure.is_none());

    let current = engine
        .current_activities(started.process.id, None)
        .await
        .expect("queryable");
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].activity_name.as_str(), "receipt");
    let process = engine.process(started.process.id).await.expect("stored");
    assert_eq!(process.data["charged"], json!(true));

    let result = engine.retry(charge.id, None).await;
    assert!(matches!(result, Err(FlowError::InvalidTransition { .. })));
}

fn invoicing_flow(charge: Arc<dyn Callback>) -> FlowBuilder {
    FlowBuilder::new("invoicing")
        .start_with("start", ActivityKind::start(), ActivityConfig::new())
        .and_then("charge", ActivityKind::function(charge), ActivityConfig::new())
        .and_then("receipt", ActivityKind::view("receipt"), ActivityConfig::new())
}

#[tokio::test]
async fn test_retry_runs_redeployed_callback() {
    let store = InMemoryStore::new();
    let broken = Engine::builder(
        store.clone(),
        FlowRegistry::bootstrap([invoicing_flow(callback_fn("charge", |_| {
            Err(CallbackError::new("card rejected"))
        }))])
        .expect("valid flow"),
    )
    .build()
    .expect("valid engine");

    let started = broken
        .start_process("invoicing", StartOptions::new())
        .await
        .expect("process started");
    complete(&broken, &started.start).await;
    let all = broken
        .activities(started.process.id)
        .await
        .expect("queryable");
    let charge = named(&all, "charge").clone();
    assert_eq!(charge.status, InstanceStatus::Error);

    let fixed = Engine::builder(
        store.clone(),
        FlowRegistry::bootstrap([invoicing_flow(callback_fn("charge", |ctx| {
            ctx.set("charged_by", json!("fixed"));
            Ok(())
        }))])
        .expect("valid flow"),
    )
    .build()
    .expect("valid engine");

    let retried = fixed.retry(charge.id, None).await.expect("retried");
    assert_eq!(retried.status, InstanceStatus::Done);
    let process = fixed.process(started.process.id).await.expect("stored");
    assert_eq!(process.data["charged_by"], json!("fixed"));
    let current = fixed
        .current_activities(started.process.id, None)
        .await
        .expect("queryable");
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].activity_name.as_str(), "receipt");
}

#[tokio::test]
async fn test_start_after_undo_reruns_function() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let engine = engine(
        FlowBuilder::new("notify")
            .start_with("start", ActivityKind::start(), ActivityConfig::new())
            .and_then(
                "notify",
                ActivityKind::function(callback_fn("notify", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
                ActivityConfig::new(),
            )
            .and_then("ack", ActivityKind::view("ack"), ActivityConfig::new()),
    );

    let started = engine
        .start_process("notify", StartOptions::new())
        .await
        .expect("process started");
    complete(&engine, &started.start).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let all = engine
        .activities(started.process.id)
        .await
        .expect("queryable");
    let notify = named(&all, "notify").clone();
    let ack = named(&all, "ack").clone();

    engine.cancel(ack.id, None).await.expect("canceled");
    engine.undo(notify.id, None).await.expect("undone");
    let rerun = engine.start(notify.id, None).await.expect("started");

    assert_eq!(rerun.status, InstanceStatus::Done);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let current = engine
        .current_activities(started.process.id, None)
        .await
        .expect("queryable");
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].activity_name.as_str(), "ack");
    assert_ne!(current[0].id, ack.id);
}

#[tokio::test]
async fn test_cancel_process_while_idle() {
    let engine = engine(review_flow());
    let (process, _, review) = review_pending(&engine).await;

    assert!(engine.can_cancel_process(process.id).await.expect("queryable"));
    let canceled = engine
        .cancel_process(process.id, None)
        .await
        .expect("canceled");
    assert_eq!(canceled.status, ProcessStatus::Canceled);

    let review = engine.instance(review.id).await.expect("stored");
    assert_eq!(review.status, InstanceStatus::Canceled);
    assert!(engine
        .current_activities(process.id, None)
        .await
        .expect("queryable")
        .is_empty());

    let result = engine.cancel_process(process.id, None).await;
    assert!(matches!(result, Err(FlowError::ProcessNotCancelable { .. })));
}

#[tokio::test]
async fn test_cancel_process_refused_while_work_in_progress() {
    let engine = engine(review_flow());
    let (process, _, review) = review_pending(&engine).await;
    engine.start(review.id, None).await.expect("started");

    assert!(!engine.can_cancel_process(process.id).await.expect("queryable"));
    let result = engine.cancel_process(process.id, None).await;
    assert!(matches!(
        result,
        Err(FlowError::ProcessNotCancelable {
            status: ProcessStatus::Started,
            ..
        })
    ));

    let process = engine.process(process.id).await.expect("stored");
    assert_eq!(process.status, ProcessStatus::Started);
}
