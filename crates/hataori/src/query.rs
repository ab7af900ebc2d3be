//! Read-only queries over processes and activity instances.

use crate::engine::Engine;
use hataori_core::{
    can_act_on, can_view_flow, ActivityDefinition, ActivityInstance, Actor, FlowDefinition,
    FlowError, InstanceId, InstanceStatus, Process, ProcessId, ProcessStatus, ProcessStore,
};
use indexmap::IndexSet;
use std::sync::Arc;

impl<S: ProcessStore> Engine<S> {
    /// Loads a process.
    pub async fn process(&self, process_id: ProcessId) -> Result<Process, FlowError> {
        Ok(self.store().process(process_id).await?)
    }

    /// Loads an activity instance.
    pub async fn instance(&self, instance_id: InstanceId) -> Result<ActivityInstance, FlowError> {
        Ok(self.store().instance(instance_id).await?)
    }

    /// Resolves the flow and activity definition an instance runs.
    pub async fn definition_of(
        &self,
        instance_id: InstanceId,
    ) -> Result<(Arc<FlowDefinition>, ActivityDefinition), FlowError> {
        let instance = self.store().instance(instance_id).await?;
        let process = self.store().process(instance.process_id).await?;
        let flow = self.registry().flow(process.flow_label.as_str())?;
        let definition = flow.activity(instance.activity_name.as_str())?.clone();
        Ok((flow, definition))
    }

    /// Open instances of a process, oldest first.
    ///
    /// With an actor, instances the actor may not act on are left out.
    pub async fn current_activities(
        &self,
        process_id: ProcessId,
        actor: Option<&Actor>,
    ) -> Result<Vec<ActivityInstance>, FlowError> {
        let mut current = self
            .ordered_instances(process_id, ActivityInstance::is_open)
            .await?;
        if let Some(actor) = actor {
            let process = self.store().process(process_id).await?;
            let flow = self.registry().flow(process.flow_label.as_str())?;
            let mut permitted = Vec::with_capacity(current.len());
            for instance in current {
                let definition = flow.activity(instance.activity_name.as_str())?;
                if can_act_on(self.oracle(), actor, &flow, definition) {
                    permitted.push(instance);
                }
            }
            current = permitted;
        }
        Ok(current)
    }

    /// Done instances of a process, oldest first.
    pub async fn finished_activities(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ActivityInstance>, FlowError> {
        self.ordered_instances(process_id, |i| i.status == InstanceStatus::Done)
            .await
    }

    /// Every instance of a process that was not canceled, oldest first.
    pub async fn activities(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ActivityInstance>, FlowError> {
        self.ordered_instances(process_id, |i| i.status != InstanceStatus::Canceled)
            .await
    }

    /// Returns `true` if the actor may see the process.
    pub async fn can_view_process(
        &self,
        process_id: ProcessId,
        actor: &Actor,
    ) -> Result<bool, FlowError> {
        let process = self.store().process(process_id).await?;
        let flow = self.registry().flow(process.flow_label.as_str())?;
        Ok(can_view_flow(self.oracle(), actor, &flow))
    }

    /// Processes with a non-canceled instance assigned to the actor or one of
    /// their groups.
    pub async fn processes_for_user(&self, actor: &Actor) -> Result<Vec<Process>, FlowError> {
        let ids: IndexSet<ProcessId> = self
            .store()
            .assigned_instances(&actor.user, &actor.groups)
            .await?
            .into_iter()
            .filter(|i| i.status != InstanceStatus::Canceled)
            .map(|i| i.process_id)
            .collect();
        self.load_processes(ids, |_| true).await
    }

    /// Started processes waiting on an instantiated instance assigned to the
    /// actor or one of their groups.
    pub async fn current_processes_for_user(
        &self,
        actor: &Actor,
    ) -> Result<Vec<Process>, FlowError> {
        let ids: IndexSet<ProcessId> = self
            .store()
            .assigned_instances(&actor.user, &actor.groups)
            .await?
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Instantiated)
            .map(|i| i.process_id)
            .collect();
        self.load_processes(ids, |p| p.status == ProcessStatus::Started)
            .await
    }

    async fn ordered_instances<F>(
        &self,
        process_id: ProcessId,
        keep: F,
    ) -> Result<Vec<ActivityInstance>, FlowError>
    where
        F: Fn(&ActivityInstance) -> bool + Send,
    {
        let mut instances: Vec<ActivityInstance> = self
            .store()
            .instances(process_id)
            .await?
            .into_iter()
            .filter(|i| keep(i))
            .collect();
        // stable: ties keep creation order
        instances.sort_by_key(|i| i.instantiated_at);
        Ok(instances)
    }

    async fn load_processes<F>(
        &self,
        ids: IndexSet<ProcessId>,
        keep: F,
    ) -> Result<Vec<Process>, FlowError>
    where
        F: Fn(&Process) -> bool + Send,
    {
        let mut processes = Vec::with_capacity(ids.len());
        for id in ids {
            let process = self.store().process(id).await?;
            if keep(&process) {
                processes.push(process);
            }
        }
        Ok(processes)
    }
}
