//! In-memory implementation of [`ProcessStore`].

use async_trait::async_trait;
use hataori_core::{
    find_open_instance, ActivityInstance, ActivityName, ChangeSet, GroupId, Guard, InstanceId,
    InstanceStatus, Process, ProcessId, ProcessStatus, ProcessStore, StoreError, UserId, Write,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct State {
    processes: HashMap<ProcessId, Process>,
    process_order: Vec<ProcessId>,
    instances: HashMap<InstanceId, ActivityInstance>,
    instance_order: HashMap<ProcessId, Vec<InstanceId>>,
}

impl State {
    fn process_instances(&self, process_id: ProcessId) -> impl Iterator<Item = &ActivityInstance> {
        self.instance_order
            .get(&process_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id))
    }

    fn check_process(&self, write: &Write<Process>) -> Result<(), StoreError> {
        match write {
            Write::Insert(process) => {
                if self.processes.contains_key(&process.id) {
                    return Err(StoreError::Conflict(format!(
                        "process {} already exists",
                        process.id
                    )));
                }
            }
            Write::Update {
                expected_version,
                record,
            } => {
                let stored = self
                    .processes
                    .get(&record.id)
                    .ok_or_else(|| StoreError::NotFound(format!("process {}", record.id)))?;
                if stored.version != *expected_version {
                    return Err(StoreError::Conflict(format!(
                        "process {} changed (version {} != {})",
                        record.id, stored.version, expected_version
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_instance(&self, write: &Write<ActivityInstance>) -> Result<(), StoreError> {
        match write {
            Write::Insert(instance) => {
                if self.instances.contains_key(&instance.id) {
                    return Err(StoreError::Conflict(format!(
                        "instance {} already exists",
                        instance.id
                    )));
                }
            }
            Write::Update {
                expected_version,
                record,
            } => {
                let stored = self
                    .instances
                    .get(&record.id)
                    .ok_or_else(|| StoreError::NotFound(format!("instance {}", record.id)))?;
                if stored.version != *expected_version {
                    return Err(StoreError::Conflict(format!(
                        "activity '{}' ({}) changed (version {} != {})",
                        record.activity_name, record.id, stored.version, expected_version
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_guard(&self, guard: &Guard) -> Result<(), StoreError> {
        match guard {
            Guard::NoActiveInstance {
                process_id,
                activity_name,
            } => {
                if self.process_instances(*process_id).any(|i| {
                    &i.activity_name == activity_name && i.status != InstanceStatus::Canceled
                }) {
                    return Err(StoreError::Conflict(format!(
                        "activity '{}' already has an instance in process {}",
                        activity_name, process_id
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) {
        if let Some(write) = changes.process {
            match write {
                Write::Insert(process) => {
                    self.process_order.push(process.id);
                    self.processes.insert(process.id, process);
                }
                Write::Update {
                    expected_version,
                    mut record,
                } => {
                    record.version = expected_version + 1;
                    self.processes.insert(record.id, record);
                }
            }
        }
        for write in changes.instances {
            match write {
                Write::Insert(instance) => {
                    self.instance_order
                        .entry(instance.process_id)
                        .or_default()
                        .push(instance.id);
                    self.instances.insert(instance.id, instance);
                }
                Write::Update {
                    expected_version,
                    mut record,
                } => {
                    record.version = expected_version + 1;
                    self.instances.insert(record.id, record);
                }
            }
        }
    }
}

/// In-memory store keeping every record in hash maps.
///
/// Commits are serialized by a single lock, which makes every change set
/// atomic. Suitable for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Backend(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl ProcessStore for InMemoryStore {
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StoreError::Backend(format!("Lock error: {}", e)))?;

        if let Some(write) = &changes.process {
            state.check_process(write)?;
        }
        for write in &changes.instances {
            state.check_instance(write)?;
        }
        for guard in &changes.guards {
            state.check_guard(guard)?;
        }
        for write in &changes.instances {
            let process_id = write.record().process_id;
            let inserted_with = changes
                .process
                .as_ref()
                .is_some_and(|p| p.record().id == process_id);
            if !inserted_with && !state.processes.contains_key(&process_id) {
                return Err(StoreError::NotFound(format!("process {}", process_id)));
            }
        }

        state.apply(changes);
        Ok(())
    }

    async fn process(&self, id: ProcessId) -> Result<Process, StoreError> {
        self.read()?
            .processes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("process {}", id)))
    }

    async fn instance(&self, id: InstanceId) -> Result<ActivityInstance, StoreError> {
        self.read()?
            .instances
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("instance {}", id)))
    }

    async fn instances(&self, process_id: ProcessId) -> Result<Vec<ActivityInstance>, StoreError> {
        let state = self.read()?;
        Ok(state.process_instances(process_id).cloned().collect())
    }

    async fn open_instance(
        &self,
        process_id: ProcessId,
        activity_name: &ActivityName,
    ) -> Result<Option<ActivityInstance>, StoreError> {
        let instances: Vec<ActivityInstance> =
            self.read()?.process_instances(process_id).cloned().collect();
        Ok(find_open_instance(&instances, activity_name).cloned())
    }

    async fn successors(&self, id: InstanceId) -> Result<Vec<ActivityInstance>, StoreError> {
        let state = self.read()?;
        let process_id = state
            .instances
            .get(&id)
            .map(|i| i.process_id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {}", id)))?;
        Ok(state
            .process_instances(process_id)
            .filter(|i| i.predecessors.contains(&id))
            .cloned()
            .collect())
    }

    async fn processes(&self, status: Option<ProcessStatus>) -> Result<Vec<Process>, StoreError> {
        let state = self.read()?;
        Ok(state
            .process_order
            .iter()
            .filter_map(|id| state.processes.get(id))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }

    async fn assigned_instances(
        &self,
        user: &UserId,
        groups: &[GroupId],
    ) -> Result<Vec<ActivityInstance>, StoreError> {
        let state = self.read()?;
        Ok(state
            .process_order
            .iter()
            .flat_map(|id| state.process_instances(*id))
            .filter(|i| i.is_assigned_to(user, groups))
            .cloned()
            .collect())
    }
}
