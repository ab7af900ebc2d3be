//! Durable store contract.
//!
//! The engine never mutates records in place. It reads them with their
//! `version`, stages the new state, and hands the store one [`ChangeSet`] per
//! transition. The store applies the whole set or nothing: every update must
//! still match its expected version and every [`Guard`] must hold, otherwise the
//! commit fails with [`StoreError::Conflict`].

use crate::ids::{ActivityName, GroupId, InstanceId, ProcessId, UserId};
use crate::model::{ActivityInstance, Process, ProcessStatus};
use async_trait::async_trait;

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// A compare-and-swap precondition failed.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Backend-specific failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A single record write inside a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Write<T> {
    /// Create a record that must not exist yet.
    Insert(T),
    /// Replace a record whose stored version must equal `expected_version`.
    Update {
        /// Version the record was read at.
        expected_version: u64,
        /// The new state.
        record: T,
    },
}

impl<T> Write<T> {
    /// Returns the record being written.
    pub fn record(&self) -> &T {
        match self {
            Write::Insert(record) => record,
            Write::Update { record, .. } => record,
        }
    }
}

/// Extra precondition checked at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// No non-canceled instance of the activity may exist in the process.
    ///
    /// Used when a join creates its instance, so two racing branches cannot
    /// both create one.
    NoActiveInstance {
        /// The process.
        process_id: ProcessId,
        /// The activity.
        activity_name: ActivityName,
    },
}

/// The unit of atomic commit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Optional write of the owning process.
    pub process: Option<Write<Process>>,
    /// Instance writes, inserts in creation order.
    pub instances: Vec<Write<ActivityInstance>>,
    /// Preconditions checked against the state before the commit.
    pub guards: Vec<Guard>,
}

impl ChangeSet {
    /// Returns `true` if the change set writes nothing.
    pub fn is_empty(&self) -> bool {
        self.process.is_none() && self.instances.is_empty()
    }
}

/// Trait for durable storage of processes and activity instances.
///
/// Implementations must make [`commit`](ProcessStore::commit) atomic with
/// respect to every other call on the same store.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Applies a change set atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if a version or guard does not match,
    /// [`StoreError::NotFound`] if an updated record does not exist.
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;

    /// Loads a process.
    async fn process(&self, id: ProcessId) -> Result<Process, StoreError>;

    /// Loads an activity instance.
    async fn instance(&self, id: InstanceId) -> Result<ActivityInstance, StoreError>;

    /// Lists the instances of a process in insertion order.
    async fn instances(&self, process_id: ProcessId) -> Result<Vec<ActivityInstance>, StoreError>;

    /// Returns the instance a join arrival for the activity belongs to.
    ///
    /// See [`find_open_instance`](crate::find_open_instance) for the rule.
    async fn open_instance(
        &self,
        process_id: ProcessId,
        activity_name: &ActivityName,
    ) -> Result<Option<ActivityInstance>, StoreError>;

    /// Lists the instances that have `id` among their predecessors.
    async fn successors(&self, id: InstanceId) -> Result<Vec<ActivityInstance>, StoreError>;

    /// Lists processes, optionally filtered by status.
    async fn processes(&self, status: Option<ProcessStatus>) -> Result<Vec<Process>, StoreError>;

    /// Lists instances assigned to the user or to any of the groups.
    async fn assigned_instances(
        &self,
        user: &UserId,
        groups: &[GroupId],
    ) -> Result<Vec<ActivityInstance>, StoreError>;
}
