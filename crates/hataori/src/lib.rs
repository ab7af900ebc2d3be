//! A persistent process engine for Rust.
//!
//! Flows are declared once with [`FlowBuilder`] and registered in a
//! [`FlowRegistry`]. The [`Engine`] then runs any number of processes over
//! them. Every activity instance is persisted, so a process can wait for
//! people or workers for as long as it takes.
//!
//! # Example
//!
//! ```rust
//! use hataori::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let registry = FlowRegistry::bootstrap([FlowBuilder::new("review")
//!     .start_with("submit", ActivityKind::start(), ActivityConfig::new())
//!     .and_then("approve", ActivityKind::view("approve"), ActivityConfig::new())
//!     .and_then("done", ActivityKind::End, ActivityConfig::new())])
//! .expect("valid flow");
//!
//! let engine = Engine::builder(InMemoryStore::new(), registry)
//!     .build()
//!     .expect("valid engine");
//!
//! let started = engine
//!     .start_process("review", StartOptions::new())
//!     .await
//!     .expect("process started");
//! engine.start(started.start.id, None).await.expect("started");
//! engine.finish(started.start.id, None).await.expect("finished");
//!
//! let current = engine
//!     .current_activities(started.process.id, None)
//!     .await
//!     .expect("queryable");
//! assert_eq!(current[0].activity_name.as_str(), "approve");
//! # });
//! ```

mod config;
mod engine;
mod memory;
mod query;
mod traversal;
mod worker;

// Re-export core types
pub use hataori_core::*;

pub use config::{EngineConfig, MAX_CASCADE_STEPS_VAR, QUEUE_CAPACITY_VAR};
pub use engine::{Engine, EngineBuilder, StartOptions, StartedProcess};
pub use memory::InMemoryStore;
pub use worker::{AsyncWorker, ChannelQueue, JobOutcome};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        callback_fn, ActivityConfig, ActivityContext, ActivityInstance, ActivityKind, Actor,
        Assignment, AssignmentStrategy, AsyncWorker, Callback, CallbackError, ChannelQueue,
        Engine, EngineConfig, FlowBuilder, FlowError, FlowRegistry, InMemoryStore,
        InstanceStatus, Process, ProcessStatus, StartOptions,
    };
}
