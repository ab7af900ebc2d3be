//! Persisted process and activity instance records.

use crate::ids::{ActivityName, FlowLabel, GroupId, InstanceId, ProcessId, UserId};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Lifecycle status of a [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// The process is running.
    Started,
    /// The process was canceled by a caller.
    Canceled,
    /// An End activity completed the process.
    Done,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Started => write!(f, "started"),
            ProcessStatus::Canceled => write!(f, "canceled"),
            ProcessStatus::Done => write!(f, "done"),
        }
    }
}

/// Lifecycle status of an [`ActivityInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created, nobody has picked up the work yet.
    Instantiated,
    /// Handed to the work queue, waiting for a worker.
    Scheduled,
    /// Work is in progress.
    Started,
    /// Canceled before pickup. Terminal.
    Canceled,
    /// Finished.
    Done,
    /// A callback failed; see [`ActivityInstance::failure`].
    Error,
}

impl InstanceStatus {
    /// Returns `true` for statuses that count as open work.
    pub fn is_open(&self) -> bool {
        !matches!(self, InstanceStatus::Done | InstanceStatus::Canceled)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Instantiated => write!(f, "instantiated"),
            InstanceStatus::Scheduled => write!(f, "scheduled"),
            InstanceStatus::Started => write!(f, "started"),
            InstanceStatus::Canceled => write!(f, "canceled"),
            InstanceStatus::Done => write!(f, "done"),
            InstanceStatus::Error => write!(f, "error"),
        }
    }
}

/// A runtime occurrence of one flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Process identity.
    pub id: ProcessId,
    /// Label of the flow this process runs.
    pub flow_label: FlowLabel,
    /// Current status.
    pub status: ProcessStatus,
    /// When the process was created.
    pub started_at: DateTime<Utc>,
    /// When an End activity completed the process.
    pub finished_at: Option<DateTime<Utc>>,
    /// Business payload read by skip predicates and updated by callbacks.
    pub data: serde_json::Value,
    /// Optimistic concurrency counter, maintained by the store.
    pub version: u64,
}

impl Process {
    /// Creates a new started process for the given flow.
    pub fn new(flow_label: FlowLabel, data: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: ProcessId::new(),
            flow_label,
            status: ProcessStatus::Started,
            started_at: now,
            finished_at: None,
            data,
            version: 0,
        }
    }

    /// Looks up a top-level field of the process payload.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// Failure captured when a callback returns an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Error message reported by the callback.
    pub message: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

/// The persisted runtime occurrence of one activity within one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInstance {
    /// Instance identity.
    pub id: InstanceId,
    /// Owning process.
    pub process_id: ProcessId,
    /// Name of the activity definition in the owning flow.
    pub activity_name: ActivityName,
    /// Current status.
    pub status: InstanceStatus,
    /// When the instance was created.
    pub instantiated_at: DateTime<Utc>,
    /// When the instance was handed to the work queue.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When work on the instance started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Instances whose completion led here, in arrival order.
    pub predecessors: IndexSet<InstanceId>,
    /// Advisory user assignment.
    pub assigned_user: Option<UserId>,
    /// Advisory group assignment.
    pub assigned_group: Option<GroupId>,
    /// Last actor that changed the instance.
    pub modified_by: Option<UserId>,
    /// Present only while `status` is [`InstanceStatus::Error`].
    pub failure: Option<FailureDetail>,
    /// Optimistic concurrency counter, maintained by the store.
    pub version: u64,
}

impl ActivityInstance {
    /// Creates a new instance in [`InstanceStatus::Instantiated`].
    pub fn new(process_id: ProcessId, activity_name: ActivityName, now: DateTime<Utc>) -> Self {
        Self {
            id: InstanceId::new(),
            process_id,
            activity_name,
            status: InstanceStatus::Instantiated,
            instantiated_at: now,
            scheduled_at: None,
            started_at: None,
            finished_at: None,
            predecessors: IndexSet::new(),
            assigned_user: None,
            assigned_group: None,
            modified_by: None,
            failure: None,
            version: 0,
        }
    }

    /// Returns `true` if the instance is neither done nor canceled.
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Returns `true` if the instance is assigned to the user or one of the groups.
    pub fn is_assigned_to(&self, user: &UserId, groups: &[GroupId]) -> bool {
        self.assigned_user.as_ref() == Some(user)
            || self
                .assigned_group
                .as_ref()
                .is_some_and(|group| groups.contains(group))
    }
}

/// Finds the instance of `activity_name` that a join arrival belongs to.
///
/// That is the most recent non-canceled instance whose own downstream self has
/// not finished, meaning no done instance of the same activity lists it as a
/// predecessor. `instances` must be in creation order.
pub fn find_open_instance<'a>(
    instances: &'a [ActivityInstance],
    activity_name: &ActivityName,
) -> Option<&'a ActivityInstance> {
    let named: Vec<&ActivityInstance> = instances
        .iter()
        .filter(|i| &i.activity_name == activity_name && i.status != InstanceStatus::Canceled)
        .collect();
    named.iter().rev().copied().find(|candidate| {
        !named.iter().any(|other| {
            other.status == InstanceStatus::Done && other.predecessors.contains(&candidate.id)
        })
    })
}

/// Returns `true` if `target` is `start` or one of its transitive predecessors.
pub fn descends_from(
    instances: &[ActivityInstance],
    start: InstanceId,
    target: InstanceId,
) -> bool {
    let by_id: HashMap<InstanceId, &ActivityInstance> =
        instances.iter().map(|i| (i.id, i)).collect();
    let mut seen = HashSet::new();
    let mut pending = vec![start];
    while let Some(id) = pending.pop() {
        if id == target {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(instance) = by_id.get(&id) {
            pending.extend(instance.predecessors.iter().copied());
        }
    }
    false
}
