//! Staging of one atomic commit and the cascade that runs inside it.

use chrono::{DateTime, Utc};
use hataori_core::{
    descends_from, find_open_instance, ActivityDefinition, ActivityInstance, ActivityKind,
    ActivityName, Actor, AssignmentContext, ChangeSet, FlowDefinition, FlowError, Guard,
    InstanceId, InstanceStatus, Process, ProcessStatus, ProcessStore, StoreError, Transition,
    Write,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, info};

/// Work that has to happen after the commit of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUp {
    /// Run the callback of a Function instance committed as started.
    RunCallback(InstanceId),
    /// Hand a scheduled Async instance to the work queue.
    Enqueue(InstanceId),
}

/// Builds the error for a transition attempted from the wrong status.
pub(crate) fn invalid_transition(instance: &ActivityInstance, transition: Transition) -> FlowError {
    FlowError::InvalidTransition {
        instance: instance.id,
        activity: instance.activity_name.clone(),
        transition,
        status: instance.status,
    }
}

#[derive(Debug)]
struct Staged<T> {
    record: T,
    // None for records created in this unit of work
    expected_version: Option<u64>,
    dirty: bool,
}

impl<T> Staged<T> {
    fn inserted(record: T) -> Self {
        Self {
            record,
            expected_version: None,
            dirty: true,
        }
    }

    fn loaded(record: T, version: u64) -> Self {
        Self {
            record,
            expected_version: Some(version),
            dirty: false,
        }
    }

    fn into_write(self) -> Option<Write<T>> {
        if !self.dirty {
            return None;
        }
        Some(match self.expected_version {
            None => Write::Insert(self.record),
            Some(expected_version) => Write::Update {
                expected_version,
                record: self.record,
            },
        })
    }
}

enum Task {
    Finish(InstanceId),
    Visit {
        activity: ActivityName,
        predecessor: InstanceId,
    },
}

/// Records read and changed by one transition, committed as one [`ChangeSet`].
///
/// Instances created during the cascade are visible to later steps of the same
/// cascade, so two branches reaching the same join before the commit share
/// one join instance.
pub(crate) struct UnitOfWork<'a, S: ?Sized> {
    store: &'a S,
    flow: &'a FlowDefinition,
    actor: Option<&'a Actor>,
    now: DateTime<Utc>,
    max_steps: usize,
    steps: usize,
    process: Staged<Process>,
    instances: IndexMap<InstanceId, Staged<ActivityInstance>>,
    guards: Vec<Guard>,
    follow_ups: Vec<FollowUp>,
}

impl<'a, S> UnitOfWork<'a, S>
where
    S: ProcessStore + ?Sized,
{
    pub(crate) fn new(
        store: &'a S,
        flow: &'a FlowDefinition,
        process: Process,
        actor: Option<&'a Actor>,
        max_steps: usize,
    ) -> Self {
        let version = process.version;
        Self {
            store,
            flow,
            actor,
            now: Utc::now(),
            max_steps,
            steps: 0,
            process: Staged::loaded(process, version),
            instances: IndexMap::new(),
            guards: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    /// Timestamp used for every change in this unit of work.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub(crate) fn process(&self) -> &Process {
        &self.process.record
    }

    pub(crate) fn process_mut(&mut self) -> &mut Process {
        self.process.dirty = true;
        &mut self.process.record
    }

    /// Stages a persisted instance unless it is staged already.
    pub(crate) fn stage(&mut self, instance: ActivityInstance) -> InstanceId {
        let id = instance.id;
        let version = instance.version;
        self.instances
            .entry(id)
            .or_insert_with(|| Staged::loaded(instance, version));
        id
    }

    /// Returns a staged instance, reading it from the store on first access.
    pub(crate) async fn load(&mut self, id: InstanceId) -> Result<&ActivityInstance, FlowError> {
        if !self.instances.contains_key(&id) {
            let instance = self.store.instance(id).await?;
            self.stage(instance);
        }
        self.instances
            .get(&id)
            .map(|staged| &staged.record)
            .ok_or_else(|| StoreError::NotFound(format!("instance {}", id)).into())
    }

    /// Returns a staged instance for modification and records the acting user.
    pub(crate) fn instance_mut(
        &mut self,
        id: InstanceId,
    ) -> Result<&mut ActivityInstance, FlowError> {
        let staged = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| FlowError::from(StoreError::NotFound(format!("instance {}", id))))?;
        staged.dirty = true;
        if let Some(actor) = self.actor {
            staged.record.modified_by = Some(actor.user.clone());
        }
        Ok(&mut staged.record)
    }

    /// Moves a staged instance back to instantiated.
    pub(crate) fn reopen(&mut self, id: InstanceId) -> Result<(), FlowError> {
        let instance = self.instance_mut(id)?;
        instance.status = InstanceStatus::Instantiated;
        instance.scheduled_at = None;
        instance.started_at = None;
        instance.finished_at = None;
        instance.failure = None;
        Ok(())
    }

    /// Finishes a started instance and cascades through its successors.
    pub(crate) async fn finish(&mut self, id: InstanceId) -> Result<(), FlowError> {
        self.cascade(Task::Finish(id)).await
    }

    /// Returns `true` when the join's predecessors cover every name it waits for.
    pub(crate) async fn is_join_satisfied(
        &mut self,
        id: InstanceId,
        definition: &ActivityDefinition,
    ) -> Result<bool, FlowError> {
        let predecessors: Vec<InstanceId> =
            self.load(id).await?.predecessors.iter().copied().collect();
        let mut arrived = HashSet::new();
        for predecessor in predecessors {
            arrived.insert(self.load(predecessor).await?.activity_name.clone());
        }
        Ok(definition
            .wait_for()
            .iter()
            .all(|name| arrived.contains(name)))
    }

    /// Writes everything staged and returns the work left for after the commit.
    pub(crate) async fn commit(self) -> Result<Vec<FollowUp>, FlowError> {
        let Self {
            store,
            process,
            instances,
            guards,
            follow_ups,
            ..
        } = self;
        let changes = ChangeSet {
            process: process.into_write(),
            instances: instances
                .into_values()
                .filter_map(Staged::into_write)
                .collect(),
            guards,
        };
        if !changes.is_empty() {
            store.commit(changes).await?;
        }
        Ok(follow_ups)
    }

    async fn cascade(&mut self, first: Task) -> Result<(), FlowError> {
        let flow = self.flow;
        let mut stack = vec![first];

        while let Some(task) = stack.pop() {
            self.steps += 1;
            if self.steps > self.max_steps {
                return Err(FlowError::CascadeLimit {
                    flow: flow.label().clone(),
                    limit: self.max_steps,
                });
            }

            match task {
                Task::Finish(id) => {
                    let name = self.complete(id)?;
                    push_successors(&mut stack, flow, &name, id);
                }
                Task::Visit {
                    activity,
                    predecessor,
                } => {
                    let definition = flow.activity(activity.as_str())?;
                    if definition.should_skip(self.process()) {
                        debug!(
                            "Skipping activity '{}' in process {}",
                            activity,
                            self.process().id
                        );
                        push_successors(&mut stack, flow, &activity, predecessor);
                    } else if let Some(next) = self.instantiate(definition, predecessor).await? {
                        stack.push(Task::Finish(next));
                    }
                }
            }
        }
        Ok(())
    }

    fn complete(&mut self, id: InstanceId) -> Result<ActivityName, FlowError> {
        let now = self.now;
        let instance = self.instance_mut(id)?;
        if instance.status != InstanceStatus::Started {
            return Err(invalid_transition(instance, Transition::Finish));
        }
        instance.status = InstanceStatus::Done;
        instance.finished_at = Some(now);
        instance.failure = None;
        let name = instance.activity_name.clone();

        if matches!(self.flow.activity(name.as_str())?.kind(), ActivityKind::End)
            && self.process().finished_at.is_none()
        {
            let process = self.process_mut();
            process.finished_at = Some(now);
            process.status = ProcessStatus::Done;
            info!("Process {} completed", process.id);
        }
        Ok(name)
    }

    async fn instantiate(
        &mut self,
        definition: &ActivityDefinition,
        predecessor: InstanceId,
    ) -> Result<Option<InstanceId>, FlowError> {
        if definition.kind().should_wait() {
            return self.join(definition, predecessor).await;
        }

        let mut instance = self.new_instance(definition, predecessor).await?;
        let id = instance.id;
        let next = match definition.kind() {
            ActivityKind::End | ActivityKind::State => {
                instance.status = InstanceStatus::Started;
                instance.started_at = Some(self.now);
                Some(id)
            }
            ActivityKind::Function(_) => {
                instance.status = InstanceStatus::Started;
                instance.started_at = Some(self.now);
                self.follow_ups.push(FollowUp::RunCallback(id));
                None
            }
            ActivityKind::Async(_) => {
                instance.status = InstanceStatus::Scheduled;
                instance.scheduled_at = Some(self.now);
                self.follow_ups.push(FollowUp::Enqueue(id));
                None
            }
            _ => None,
        };

        debug!(
            "Instantiated {} activity '{}' ({}) in process {}",
            definition.kind().label(),
            definition.name(),
            id,
            instance.process_id
        );
        self.instances.insert(id, Staged::inserted(instance));
        Ok(next)
    }

    async fn join(
        &mut self,
        definition: &ActivityDefinition,
        predecessor: InstanceId,
    ) -> Result<Option<InstanceId>, FlowError> {
        let snapshot = self.process_instances().await?;
        let open = find_open_instance(&snapshot, definition.name()).map(|i| (i.id, i.status));

        let id = match open {
            Some((id, InstanceStatus::Done)) if !descends_from(&snapshot, predecessor, id) => {
                // arrival on an edge the join does not wait for, after it fired
                self.load(id).await?;
                self.instance_mut(id)?.predecessors.insert(predecessor);
                debug!("Late arrival at finished join '{}' ({})", definition.name(), id);
                return Ok(None);
            }
            Some((id, InstanceStatus::Done)) => {
                debug!("Join '{}' ({}) re-entered", definition.name(), id);
                self.load(id).await?;
                let now = self.now;
                let instance = self.instance_mut(id)?;
                instance.status = InstanceStatus::Started;
                instance.started_at = Some(now);
                instance.finished_at = None;
                id
            }
            Some((id, _)) => {
                self.load(id).await?;
                id
            }
            None => {
                let instance = self.new_instance(definition, predecessor).await?;
                let id = instance.id;
                self.guards.push(Guard::NoActiveInstance {
                    process_id: instance.process_id,
                    activity_name: instance.activity_name.clone(),
                });
                self.instances.insert(id, Staged::inserted(instance));
                id
            }
        };

        let now = self.now;
        let instance = self.instance_mut(id)?;
        instance.predecessors.insert(predecessor);
        if instance.status == InstanceStatus::Instantiated {
            instance.status = InstanceStatus::Started;
            instance.started_at = Some(now);
        }

        if self.is_join_satisfied(id, definition).await? {
            debug!("Join '{}' ({}) satisfied", definition.name(), id);
            Ok(Some(id))
        } else {
            debug!("Join '{}' ({}) still waiting", definition.name(), id);
            Ok(None)
        }
    }

    /// Instances of the process in creation order, staged state taking precedence.
    async fn process_instances(&self) -> Result<Vec<ActivityInstance>, FlowError> {
        let process_id = self.process().id;
        let mut merged: IndexMap<InstanceId, ActivityInstance> = self
            .store
            .instances(process_id)
            .await?
            .into_iter()
            .map(|instance| (instance.id, instance))
            .collect();
        for staged in self.instances.values() {
            if staged.record.process_id == process_id {
                merged.insert(staged.record.id, staged.record.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    async fn new_instance(
        &mut self,
        definition: &ActivityDefinition,
        predecessor: InstanceId,
    ) -> Result<ActivityInstance, FlowError> {
        let previous = self.load(predecessor).await?.clone();
        let process = self.process();
        let mut instance = ActivityInstance::new(process.id, definition.name().clone(), self.now);
        instance.predecessors.insert(predecessor);

        let assignment = definition.assign_to().assign(&AssignmentContext {
            process,
            actor: self.actor,
            predecessor: Some(&previous),
        });
        instance.assigned_user = assignment.user;
        instance.assigned_group = assignment.group;
        instance.modified_by = self.actor.map(|actor| actor.user.clone());
        Ok(instance)
    }
}

fn push_successors(
    stack: &mut Vec<Task>,
    flow: &FlowDefinition,
    activity: &ActivityName,
    predecessor: InstanceId,
) {
    // reversed so the first declared successor is visited first
    for successor in flow.successors(activity.as_str()).iter().rev() {
        stack.push(Task::Visit {
            activity: successor.clone(),
            predecessor,
        });
    }
}
