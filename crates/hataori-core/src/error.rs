//! Engine error types.

use crate::ids::{ActivityName, FlowLabel, InstanceId, PermissionTag, ProcessId, UserId};
use crate::model::{InstanceStatus, ProcessStatus};
use crate::store::StoreError;
use thiserror::Error;

/// The state transition that was attempted.
///
/// Used in [`FlowError::InvalidTransition`] to identify the rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `instantiated`/`scheduled` → `started`.
    Start,
    /// `started` → `done`.
    Finish,
    /// `instantiated` → `canceled`.
    Cancel,
    /// `done` → `instantiated`.
    Undo,
    /// `error` → `started`.
    Retry,
    /// Worker pickup of a `scheduled` instance.
    Run,
    /// Changing the advisory assignment.
    Reassign,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Start => write!(f, "start"),
            Transition::Finish => write!(f, "finish"),
            Transition::Cancel => write!(f, "cancel"),
            Transition::Undo => write!(f, "undo"),
            Transition::Retry => write!(f, "retry"),
            Transition::Run => write!(f, "run"),
            Transition::Reassign => write!(f, "reassign"),
        }
    }
}

/// Errors returned by flow definition and process operations.
///
/// Build-time problems surface as [`FlowError::Validation`] or
/// [`FlowError::DuplicateFlow`]. Transition problems surface as
/// [`FlowError::InvalidTransition`] or [`FlowError::StateConflict`] and are left
/// to the caller to retry or report.
///
/// Callback failures are not represented here: they are recorded on the
/// instance as [`InstanceStatus::Error`].
///
/// # Non-Exhaustive
///
/// Always include a wildcard arm when matching:
///
/// ```
/// use hataori_core::FlowError;
///
/// fn report(error: &FlowError) -> String {
///     match error {
///         FlowError::UnknownFlow(label) => format!("no such flow {}", label),
///         FlowError::StateConflict(details) => format!("retry later: {}", details),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FlowError {
    /// A flow definition is malformed.
    #[error("Invalid flow definition '{flow}': {details}")]
    Validation {
        /// Label of the flow being built.
        flow: FlowLabel,
        /// What is wrong with it.
        details: String,
    },

    /// A flow with the same label is already registered.
    #[error("Flow already registered: {0}")]
    DuplicateFlow(FlowLabel),

    /// No flow is registered under the label.
    #[error("Unknown flow: {0}")]
    UnknownFlow(FlowLabel),

    /// The flow has no activity with the name.
    #[error("Unknown activity '{activity}' in flow '{flow}'")]
    UnknownActivity {
        /// Label of the flow searched.
        flow: FlowLabel,
        /// Name that was not found.
        activity: ActivityName,
    },

    /// The instance is not in a state that allows the transition.
    #[error("Cannot {transition} activity '{activity}' ({instance}) while {status}")]
    InvalidTransition {
        /// The instance the transition was attempted on.
        instance: InstanceId,
        /// Its activity name.
        activity: ActivityName,
        /// The attempted transition.
        transition: Transition,
        /// The status it was found in.
        status: InstanceStatus,
    },

    /// A concurrent transition changed the records first.
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Undo was refused because active successors exist.
    #[error("Undo of activity '{activity}' ({instance}) blocked by active successors")]
    UndoBlocked {
        /// The instance that could not be undone.
        instance: InstanceId,
        /// Its activity name.
        activity: ActivityName,
    },

    /// The actor lacks a required permission.
    #[error("User '{user}' lacks permission '{permission}'")]
    PermissionDenied {
        /// The acting user.
        user: UserId,
        /// The missing permission.
        permission: PermissionTag,
    },

    /// The process cannot be canceled in its current state.
    #[error("Process {process} cannot be canceled while {status} with work in progress")]
    ProcessNotCancelable {
        /// The process.
        process: ProcessId,
        /// Its status.
        status: ProcessStatus,
    },

    /// A single transition tried to cascade through too many activities.
    #[error("Cascade in flow '{flow}' exceeded {limit} steps")]
    CascadeLimit {
        /// Label of the flow.
        flow: FlowLabel,
        /// The configured bound.
        limit: usize,
    },

    /// Handing a job to the work queue failed.
    #[error("Work queue error: {0}")]
    Queue(String),

    /// The engine configuration is invalid.
    #[error("Invalid engine configuration: {0}")]
    Configuration(String),

    /// The durable store failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for FlowError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(details) => FlowError::StateConflict(details),
            other => FlowError::Store(other),
        }
    }
}

impl FlowError {
    /// Returns `true` when the error was caused by a competing transition or a
    /// repeated delivery rather than a real fault.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            FlowError::StateConflict(_) | FlowError::InvalidTransition { .. }
        )
    }
}
