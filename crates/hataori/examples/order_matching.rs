//! Incoming ERP order that has to be matched to an organisation and a person
//! before it is transmitted.
//!
//! Demonstrates:
//! - Skipping matching steps when the order already carries the match
//! - Joining the two matching branches with a wait activity
//! - Transmitting the order from a background worker

use async_trait::async_trait;
use hataori::prelude::*;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug)]
struct TransmitOrder;

#[async_trait]
impl Callback for TransmitOrder {
    async fn call(&self, ctx: &mut ActivityContext) -> Result<(), CallbackError> {
        let order = ctx
            .data()
            .get("order_number")
            .and_then(|n| n.as_str())
            .ok_or_else(|| CallbackError::new("order has no number"))?
            .to_string();
        println!("Transmitting order {} to the ERP", order);
        ctx.set("erp_reference", json!(format!("ERP-{}", order)));
        Ok(())
    }
}

fn erp_order_flow() -> FlowBuilder {
    FlowBuilder::new("erp_order")
        .description("Process an order")
        .start_with("receive_order", ActivityKind::start(), ActivityConfig::new())
        .and_then(
            "match_organisation",
            ActivityKind::view("match_organisation"),
            ActivityConfig::new()
                .skip_if(|p| p.field("organisation").is_some())
                .assign_to(AssignmentStrategy::Inherit),
        )
        .and_then("match_organisation_done", ActivityKind::State, ActivityConfig::new())
        .add_activity(
            "match_person",
            ActivityKind::view("match_person"),
            Some("receive_order"),
            ActivityConfig::new()
                .skip_if(|p| p.field("person").is_some())
                .assign_to(AssignmentStrategy::Inherit),
        )
        .and_then("match_person_done", ActivityKind::State, ActivityConfig::new())
        .and_then(
            "matching_done",
            ActivityKind::Wait,
            ActivityConfig::new().wait_for(["match_person_done", "match_organisation_done"]),
        )
        .and_then(
            "transmit_order",
            ActivityKind::asynchronous(Arc::new(TransmitOrder)),
            ActivityConfig::new(),
        )
        .and_then("success", ActivityKind::End, ActivityConfig::new())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env()?;
    let registry = FlowRegistry::bootstrap([erp_order_flow()])?;
    let (queue, jobs) = ChannelQueue::from_config(&config);
    let engine = Arc::new(
        Engine::builder(InMemoryStore::new(), registry)
            .queue(queue)
            .config(config)
            .build()?,
    );
    let mut worker = AsyncWorker::new(Arc::clone(&engine), jobs);

    // The organisation is already known, so only the person needs matching.
    let started = engine
        .start_process(
            "erp_order",
            StartOptions::new()
                .data(json!({"order_number": "4711", "organisation": 12}))
                .assign(Assignment::group("inside-sales")),
        )
        .await?;
    engine.start(started.start.id, None).await?;
    engine.finish(started.start.id, None).await?;

    for instance in engine.current_activities(started.process.id, None).await? {
        println!(
            "Waiting: {} ({}) assigned to {:?}",
            instance.activity_name, instance.status, instance.assigned_group
        );
    }

    let clerk = Actor::new("sam").with_groups(["inside-sales"]);
    for process in engine.current_processes_for_user(&clerk).await? {
        println!("{} has work in process {}", clerk.user, process.id);
    }

    let current = engine.current_activities(started.process.id, None).await?;
    if let Some(person) = current
        .iter()
        .find(|i| i.activity_name.as_str() == "match_person")
    {
        engine.start(person.id, Some(&clerk)).await?;
        engine.finish(person.id, Some(&clerk)).await?;
    }

    let outcomes = worker.drain().await;
    println!("Worker handled {} job(s)", outcomes.len());

    let process = engine.process(started.process.id).await?;
    println!(
        "Process {} is {} with ERP reference {}",
        process.id, process.status, process.data["erp_reference"]
    );

    Ok(())
}
