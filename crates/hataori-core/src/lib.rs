//! Core types and traits for the hataori process engine.
//!
//! This crate holds the flow model and the contracts the engine talks to,
//! without any runtime. Applications depend on it to declare flows and to plug
//! in their own store, work queue and authorization oracle.
//!
//! # Flow Model
//!
//! - [`FlowBuilder`] - Declares a flow and validates it
//! - [`FlowDefinition`] - Immutable graph of activities
//! - [`ActivityKind`] - Behavior of a node (start, view, function, async, wait, ...)
//! - [`ActivityConfig`] - Skip predicate, wait list, assignment, permission
//! - [`FlowRegistry`] - Definitions keyed by label
//!
//! # Records
//!
//! - [`Process`] - One execution of a flow
//! - [`ActivityInstance`] - One occurrence of an activity within a process
//!
//! # Contracts
//!
//! - [`ProcessStore`] - Atomic compare-and-swap persistence
//! - [`WorkQueue`] - Transport for asynchronous activities
//! - [`AuthorizationOracle`] - Permission checks
//! - [`Callback`] - Body of function and async activities

mod activity;
mod assignment;
mod callback;
mod error;
mod flow;
mod ids;
mod model;
mod permission;
mod queue;
mod registry;
mod store;

pub use activity::{ActivityConfig, ActivityDefinition, ActivityKind, SkipPredicate};
pub use assignment::{Assignment, AssignmentContext, AssignmentStrategy};
pub use callback::{callback_fn, ActivityContext, Callback, CallbackError, FnCallback};
pub use error::{FlowError, Transition};
pub use flow::{FlowBuilder, FlowDefinition};
pub use ids::{ActivityName, FlowLabel, GroupId, InstanceId, PermissionTag, ProcessId, UserId};
pub use model::{
    descends_from, find_open_instance, ActivityInstance, FailureDetail, InstanceStatus, Process,
    ProcessStatus,
};
pub use permission::{
    can_act_on, can_view_flow, missing_activity_permission, Actor, AllowAll,
    AuthorizationOracle, StaticPermissions,
};
pub use queue::{AsyncJob, QueueError, WorkQueue};
pub use registry::FlowRegistry;
pub use store::{ChangeSet, Guard, ProcessStore, StoreError, Write};
