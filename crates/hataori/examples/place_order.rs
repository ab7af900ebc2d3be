//! Linear order form flow driven step by step, the way a UI would drive it.

use hataori::prelude::*;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let registry = FlowRegistry::bootstrap([FlowBuilder::new("place_order")
        .description("Place an order through a series of forms")
        .start_with("token", ActivityKind::start_view("token_form"), ActivityConfig::new())
        .and_then("recipient", ActivityKind::view("recipient_form"), ActivityConfig::new())
        .and_then("articles", ActivityKind::view("articles_form"), ActivityConfig::new())
        .and_then(
            "confirmation",
            ActivityKind::view("confirmation_form"),
            ActivityConfig::new(),
        )
        .and_then("end", ActivityKind::End, ActivityConfig::new())])?;

    let engine = Engine::builder(InMemoryStore::new(), registry).build()?;
    let customer = Actor::new("customer-17");

    let started = engine
        .start_process(
            "place_order",
            StartOptions::new()
                .actor(customer.clone())
                .data(json!({"token": "a9f3"})),
        )
        .await?;
    println!("Started process {}", started.process.id);

    loop {
        let current = engine
            .current_activities(started.process.id, Some(&customer))
            .await?;
        let Some(next) = current.first() else {
            break;
        };
        let (_, definition) = engine.definition_of(next.id).await?;
        println!(
            "Filling in '{}' (view {})",
            next.activity_name,
            definition.kind().view_name().unwrap_or("-")
        );
        engine.start(next.id, Some(&customer)).await?;
        engine.finish(next.id, Some(&customer)).await?;
    }

    let process = engine.process(started.process.id).await?;
    println!("Process {} is {}", process.id, process.status);
    for instance in engine.finished_activities(process.id).await? {
        println!("  {} done", instance.activity_name);
    }

    Ok(())
}
