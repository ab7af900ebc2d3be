//! The process engine: activity transitions over a [`ProcessStore`].

use crate::config::EngineConfig;
use crate::traversal::{invalid_transition, FollowUp, UnitOfWork};
use hataori_core::{
    can_view_flow, missing_activity_permission, ActivityContext, ActivityDefinition,
    ActivityInstance, ActivityKind, Actor, AllowAll, Assignment, AssignmentContext, AsyncJob,
    AuthorizationOracle, ChangeSet, FailureDetail, FlowDefinition, FlowError, FlowRegistry,
    InstanceId, InstanceStatus, Process, ProcessId, ProcessStatus, ProcessStore, Transition,
    WorkQueue, Write,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options for [`Engine::start_process`].
#[derive(Debug, Clone)]
pub struct StartOptions {
    actor: Option<Actor>,
    data: serde_json::Value,
    assignment: Option<Assignment>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            actor: None,
            data: serde_json::Value::Object(serde_json::Map::new()),
            assignment: None,
        }
    }
}

impl StartOptions {
    /// Creates options with an empty payload and no actor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the process on behalf of an actor, checking permissions.
    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Sets the initial process payload.
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Assigns the start instance, overriding its configured strategy.
    pub fn assign(mut self, assignment: Assignment) -> Self {
        self.assignment = Some(assignment);
        self
    }
}

/// A freshly created process and its start instance.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedProcess {
    /// The new process.
    pub process: Process,
    /// Instance of the flow's start activity.
    pub start: ActivityInstance,
}

struct Loaded {
    flow: Arc<FlowDefinition>,
    process: Process,
    instance: ActivityInstance,
}

/// Drives processes through their flows.
///
/// Every transition reads the affected records, stages the new state and hands
/// the store a single change set. When a competing transition wins, the call
/// fails with [`FlowError::StateConflict`] and nothing is written.
pub struct Engine<S> {
    store: Arc<S>,
    registry: Arc<FlowRegistry>,
    queue: Option<Arc<dyn WorkQueue>>,
    oracle: Arc<dyn AuthorizationOracle>,
    config: EngineConfig,
}

impl<S> fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("flows", &self.registry.len())
            .field("queue", &self.queue.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            queue: self.queue.clone(),
            oracle: Arc::clone(&self.oracle),
            config: self.config.clone(),
        }
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder<S> {
    store: Arc<S>,
    registry: Arc<FlowRegistry>,
    queue: Option<Arc<dyn WorkQueue>>,
    oracle: Arc<dyn AuthorizationOracle>,
    config: EngineConfig,
}

impl<S: ProcessStore> EngineBuilder<S> {
    /// Sets the work queue for async activities.
    pub fn queue(mut self, queue: impl WorkQueue + 'static) -> Self {
        self.queue = Some(Arc::new(queue));
        self
    }

    /// Sets the authorization oracle. Defaults to [`AllowAll`].
    pub fn oracle(mut self, oracle: impl AuthorizationOracle + 'static) -> Self {
        self.oracle = Arc::new(oracle);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine.
    ///
    /// Fails with [`FlowError::Configuration`] when the configuration is invalid
    /// or a registered flow has async activities but no queue is set.
    pub fn build(self) -> Result<Engine<S>, FlowError> {
        self.config.validate()?;
        if self.queue.is_none() {
            if let Some(flow) = self.registry.flows().find(|flow| {
                flow.activities()
                    .any(|a| matches!(a.kind(), ActivityKind::Async(_)))
            }) {
                return Err(FlowError::Configuration(format!(
                    "flow '{}' has async activities but no work queue is configured",
                    flow.label()
                )));
            }
        }
        Ok(Engine {
            store: self.store,
            registry: self.registry,
            queue: self.queue,
            oracle: self.oracle,
            config: self.config,
        })
    }
}

impl<S: ProcessStore> Engine<S> {
    /// Creates a builder over a store and a registry.
    pub fn builder(store: S, registry: impl Into<Arc<FlowRegistry>>) -> EngineBuilder<S> {
        EngineBuilder {
            store: Arc::new(store),
            registry: registry.into(),
            queue: None,
            oracle: Arc::new(AllowAll),
            config: EngineConfig::default(),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the flow registry.
    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn oracle(&self) -> &dyn AuthorizationOracle {
        self.oracle.as_ref()
    }

    /// Creates a process of the flow together with its start instance.
    pub async fn start_process(
        &self,
        flow_label: &str,
        options: StartOptions,
    ) -> Result<StartedProcess, FlowError> {
        let flow = self.registry.flow(flow_label)?;
        let definition = flow.start_activity();
        self.authorize(options.actor.as_ref(), &flow, definition)?;

        let process = Process::new(flow.label().clone(), options.data, chrono::Utc::now());
        let mut start =
            ActivityInstance::new(process.id, definition.name().clone(), process.started_at);
        let assignment = match options.assignment {
            Some(assignment) => assignment,
            None => definition.assign_to().assign(&AssignmentContext {
                process: &process,
                actor: options.actor.as_ref(),
                predecessor: None,
            }),
        };
        start.assigned_user = assignment.user;
        start.assigned_group = assignment.group;
        start.modified_by = options.actor.as_ref().map(|actor| actor.user.clone());

        self.store
            .commit(ChangeSet {
                process: Some(Write::Insert(process.clone())),
                instances: vec![Write::Insert(start.clone())],
                guards: Vec::new(),
            })
            .await?;

        info!("Started process {} of flow '{}'", process.id, flow.label());
        Ok(StartedProcess { process, start })
    }

    /// Starts an instantiated instance.
    ///
    /// Function and Async instances, which are only instantiated after an
    /// undo, run their callback right away. A Wait instance finishes at once if
    /// its predecessors are already complete.
    pub async fn start(
        &self,
        instance_id: InstanceId,
        actor: Option<&Actor>,
    ) -> Result<ActivityInstance, FlowError> {
        let Loaded {
            flow,
            process,
            instance,
        } = self.load(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        self.authorize(actor, &flow, definition)?;
        if instance.status != InstanceStatus::Instantiated {
            return Err(invalid_transition(&instance, Transition::Start));
        }

        let mut unit = self.unit(&flow, process, actor);
        let id = unit.stage(instance);
        let now = unit.now();
        let started = unit.instance_mut(id)?;
        started.status = InstanceStatus::Started;
        started.started_at = Some(now);
        if definition.kind().should_wait() && unit.is_join_satisfied(id, definition).await? {
            unit.finish(id).await?;
        }
        let mut follow_ups = unit.commit().await?;
        debug!("Activity '{}' ({}) started", definition.name(), id);

        if definition.kind().callback().is_some() {
            follow_ups.insert(0, FollowUp::RunCallback(id));
        }
        self.run_follow_ups(&flow, follow_ups).await?;
        Ok(self.store.instance(id).await?)
    }

    /// Finishes a started instance and activates whatever follows it.
    pub async fn finish(
        &self,
        instance_id: InstanceId,
        actor: Option<&Actor>,
    ) -> Result<ActivityInstance, FlowError> {
        let Loaded {
            flow,
            process,
            instance,
        } = self.load(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        self.authorize(actor, &flow, definition)?;
        if instance.status != InstanceStatus::Started {
            return Err(invalid_transition(&instance, Transition::Finish));
        }

        let mut unit = self.unit(&flow, process, actor);
        let id = unit.stage(instance);
        unit.finish(id).await?;
        let follow_ups = unit.commit().await?;
        info!("Activity '{}' ({}) finished", definition.name(), id);

        self.run_follow_ups(&flow, follow_ups).await?;
        Ok(self.store.instance(id).await?)
    }

    /// Cancels an instantiated instance.
    pub async fn cancel(
        &self,
        instance_id: InstanceId,
        actor: Option<&Actor>,
    ) -> Result<ActivityInstance, FlowError> {
        let Loaded {
            flow,
            process,
            instance,
        } = self.load(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        self.authorize(actor, &flow, definition)?;
        if instance.status != InstanceStatus::Instantiated {
            return Err(invalid_transition(&instance, Transition::Cancel));
        }

        let mut unit = self.unit(&flow, process, actor);
        let id = unit.stage(instance);
        unit.instance_mut(id)?.status = InstanceStatus::Canceled;
        unit.commit().await?;
        info!("Activity '{}' ({}) canceled", definition.name(), id);
        Ok(self.store.instance(id).await?)
    }

    /// Reopens a done instance.
    ///
    /// Refused with [`FlowError::UndoBlocked`] while any successor is not canceled.
    pub async fn undo(
        &self,
        instance_id: InstanceId,
        actor: Option<&Actor>,
    ) -> Result<ActivityInstance, FlowError> {
        let Loaded {
            flow,
            process,
            instance,
        } = self.load(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        self.authorize(actor, &flow, definition)?;
        if instance.status != InstanceStatus::Done {
            return Err(invalid_transition(&instance, Transition::Undo));
        }
        self.ensure_undoable(&instance, None).await?;

        let mut unit = self.unit(&flow, process, actor);
        let id = unit.stage(instance);
        unit.reopen(id)?;
        unit.commit().await?;
        info!("Activity '{}' ({}) undone", definition.name(), id);
        Ok(self.store.instance(id).await?)
    }

    /// Cancels an instantiated instance and reopens each of its direct
    /// predecessors, all in one commit.
    pub async fn cancel_and_undo_predecessors(
        &self,
        instance_id: InstanceId,
        actor: Option<&Actor>,
    ) -> Result<ActivityInstance, FlowError> {
        let Loaded {
            flow,
            process,
            instance,
        } = self.load(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        self.authorize(actor, &flow, definition)?;
        if instance.status != InstanceStatus::Instantiated {
            return Err(invalid_transition(&instance, Transition::Cancel));
        }

        let predecessors: Vec<InstanceId> = instance.predecessors.iter().copied().collect();
        let mut unit = self.unit(&flow, process, actor);
        let id = unit.stage(instance);
        unit.instance_mut(id)?.status = InstanceStatus::Canceled;

        for predecessor_id in predecessors {
            let predecessor = unit.load(predecessor_id).await?.clone();
            let predecessor_definition = flow.activity(predecessor.activity_name.as_str())?;
            self.authorize(actor, &flow, predecessor_definition)?;
            if predecessor.status != InstanceStatus::Done {
                return Err(invalid_transition(&predecessor, Transition::Undo));
            }
            self.ensure_undoable(&predecessor, Some(id)).await?;
            unit.reopen(predecessor_id)?;
        }

        unit.commit().await?;
        info!(
            "Activity '{}' ({}) canceled and predecessors reopened",
            definition.name(),
            id
        );
        Ok(self.store.instance(id).await?)
    }

    /// Runs the callback of a failed instance again.
    ///
    /// The callback is resolved from the registry at call time.
    pub async fn retry(
        &self,
        instance_id: InstanceId,
        actor: Option<&Actor>,
    ) -> Result<ActivityInstance, FlowError> {
        let Loaded {
            flow,
            process,
            instance,
        } = self.load(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        self.authorize(actor, &flow, definition)?;
        if instance.status != InstanceStatus::Error || definition.kind().callback().is_none() {
            return Err(invalid_transition(&instance, Transition::Retry));
        }

        let mut unit = self.unit(&flow, process, actor);
        let id = unit.stage(instance);
        let now = unit.now();
        let retried = unit.instance_mut(id)?;
        retried.status = InstanceStatus::Started;
        retried.started_at = Some(now);
        retried.failure = None;
        unit.commit().await?;
        info!("Retrying activity '{}' ({})", definition.name(), id);

        self.run_follow_ups(&flow, vec![FollowUp::RunCallback(id)])
            .await?;
        Ok(self.store.instance(id).await?)
    }

    /// Worker entry point for a scheduled async instance.
    ///
    /// A repeated delivery finds the instance past `scheduled` and fails with
    /// [`FlowError::InvalidTransition`]; the callback is not run again.
    pub async fn run_async(
        &self,
        flow_label: &str,
        instance_id: InstanceId,
    ) -> Result<ActivityInstance, FlowError> {
        let flow = self.registry.flow(flow_label)?;
        let instance = self.store.instance(instance_id).await?;
        let process = self.store.process(instance.process_id).await?;
        if &process.flow_label != flow.label() {
            return Err(FlowError::UnknownActivity {
                flow: flow.label().clone(),
                activity: instance.activity_name,
            });
        }
        let definition = flow.activity(instance.activity_name.as_str())?;
        if instance.status != InstanceStatus::Scheduled
            || !matches!(definition.kind(), ActivityKind::Async(_))
        {
            return Err(invalid_transition(&instance, Transition::Run));
        }

        let mut unit = self.unit(&flow, process, None);
        let id = unit.stage(instance);
        let now = unit.now();
        let picked = unit.instance_mut(id)?;
        picked.status = InstanceStatus::Started;
        picked.started_at = Some(now);
        unit.commit().await?;
        debug!("Picked up async activity '{}' ({})", definition.name(), id);

        self.run_follow_ups(&flow, vec![FollowUp::RunCallback(id)])
            .await?;
        Ok(self.store.instance(id).await?)
    }

    /// Cancels every open instance and the process itself.
    ///
    /// Only allowed while the process is started and no work is in progress,
    /// that is every open instance is still instantiated.
    pub async fn cancel_process(
        &self,
        process_id: ProcessId,
        actor: Option<&Actor>,
    ) -> Result<Process, FlowError> {
        let process = self.store.process(process_id).await?;
        let flow = self.registry.flow(process.flow_label.as_str())?;
        self.authorize_process(actor, &flow)?;
        let instances = self.store.instances(process_id).await?;
        if !is_cancelable(&process, &instances) {
            return Err(FlowError::ProcessNotCancelable {
                process: process_id,
                status: process.status,
            });
        }

        let mut unit = self.unit(&flow, process, actor);
        for instance in instances.into_iter().filter(ActivityInstance::is_open) {
            let id = unit.stage(instance);
            unit.instance_mut(id)?.status = InstanceStatus::Canceled;
        }
        unit.process_mut().status = ProcessStatus::Canceled;
        unit.commit().await?;

        info!("Process {} canceled", process_id);
        Ok(self.store.process(process_id).await?)
    }

    /// Returns `true` if [`cancel_process`](Self::cancel_process) would succeed
    /// for a caller with sufficient permissions.
    pub async fn can_cancel_process(&self, process_id: ProcessId) -> Result<bool, FlowError> {
        let process = self.store.process(process_id).await?;
        let instances = self.store.instances(process_id).await?;
        Ok(is_cancelable(&process, &instances))
    }

    /// Replaces the advisory assignment of an open instance.
    pub async fn reassign(
        &self,
        instance_id: InstanceId,
        assignment: Assignment,
        actor: Option<&Actor>,
    ) -> Result<ActivityInstance, FlowError> {
        let Loaded {
            flow,
            process,
            instance,
        } = self.load(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        self.authorize(actor, &flow, definition)?;
        if !instance.is_open() {
            return Err(invalid_transition(&instance, Transition::Reassign));
        }

        let mut unit = self.unit(&flow, process, actor);
        let id = unit.stage(instance);
        let reassigned = unit.instance_mut(id)?;
        reassigned.assigned_user = assignment.user;
        reassigned.assigned_group = assignment.group;
        unit.commit().await?;
        debug!("Activity '{}' ({}) reassigned", definition.name(), id);
        Ok(self.store.instance(id).await?)
    }

    fn unit<'a>(
        &'a self,
        flow: &'a FlowDefinition,
        process: Process,
        actor: Option<&'a Actor>,
    ) -> UnitOfWork<'a, S> {
        UnitOfWork::new(
            self.store.as_ref(),
            flow,
            process,
            actor,
            self.config.max_cascade_steps,
        )
    }

    async fn load(&self, instance_id: InstanceId) -> Result<Loaded, FlowError> {
        let instance = self.store.instance(instance_id).await?;
        let process = self.store.process(instance.process_id).await?;
        let flow = self.registry.flow(process.flow_label.as_str())?;
        Ok(Loaded {
            flow,
            process,
            instance,
        })
    }

    fn authorize(
        &self,
        actor: Option<&Actor>,
        flow: &FlowDefinition,
        definition: &ActivityDefinition,
    ) -> Result<(), FlowError> {
        let Some(actor) = actor else {
            return Ok(());
        };
        match missing_activity_permission(self.oracle(), actor, flow, definition) {
            Some(permission) => Err(FlowError::PermissionDenied {
                user: actor.user.clone(),
                permission: permission.clone(),
            }),
            None => Ok(()),
        }
    }

    fn authorize_process(
        &self,
        actor: Option<&Actor>,
        flow: &FlowDefinition,
    ) -> Result<(), FlowError> {
        let Some(actor) = actor else {
            return Ok(());
        };
        if can_view_flow(self.oracle(), actor, flow) {
            return Ok(());
        }
        let permission = flow
            .permission()
            .or_else(|| flow.activities().find_map(|a| a.permission()));
        match permission {
            Some(permission) => Err(FlowError::PermissionDenied {
                user: actor.user.clone(),
                permission: permission.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn ensure_undoable(
        &self,
        instance: &ActivityInstance,
        ignoring: Option<InstanceId>,
    ) -> Result<(), FlowError> {
        let blocked = self
            .store
            .successors(instance.id)
            .await?
            .iter()
            .any(|s| Some(s.id) != ignoring && s.status != InstanceStatus::Canceled);
        if blocked {
            return Err(FlowError::UndoBlocked {
                instance: instance.id,
                activity: instance.activity_name.clone(),
            });
        }
        Ok(())
    }

    async fn run_follow_ups(
        &self,
        flow: &FlowDefinition,
        follow_ups: Vec<FollowUp>,
    ) -> Result<(), FlowError> {
        let mut pending: VecDeque<FollowUp> = follow_ups.into();
        let mut first_error = None;

        while let Some(next) = pending.pop_front() {
            let result = match next {
                FollowUp::RunCallback(id) => self
                    .execute_callback(flow, id)
                    .await
                    .map(|more| pending.extend(more)),
                FollowUp::Enqueue(id) => match self.enqueue(flow, id).await {
                    Ok(()) => Ok(()),
                    Err(error) => self.record_enqueue_failure(flow, id, error).await,
                },
            };
            if let Err(error) = result {
                warn!("Follow-up {:?} in flow '{}' failed: {}", next, flow.label(), error);
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn execute_callback(
        &self,
        flow: &FlowDefinition,
        instance_id: InstanceId,
    ) -> Result<Vec<FollowUp>, FlowError> {
        let instance = self.store.instance(instance_id).await?;
        let definition = flow.activity(instance.activity_name.as_str())?;
        let callback = match definition.kind().callback() {
            Some(callback) if instance.status == InstanceStatus::Started => Arc::clone(callback),
            _ => return Err(invalid_transition(&instance, Transition::Run)),
        };

        let snapshot = self.store.process(instance.process_id).await?;
        let mut ctx = ActivityContext::new(snapshot, instance.clone());
        let outcome = callback.call(&mut ctx).await;

        let process = self.store.process(instance.process_id).await?;
        let mut unit = self.unit(flow, process, None);
        let id = unit.stage(instance);

        match outcome {
            Ok(()) => {
                if ctx.is_data_changed() {
                    unit.process_mut().data = ctx.into_data();
                }
                unit.finish(id).await?;
                let follow_ups = unit.commit().await?;
                info!("Activity '{}' ({}) finished", definition.name(), id);
                Ok(follow_ups)
            }
            Err(error) => {
                warn!(
                    "Activity '{}' ({}) failed: {}",
                    definition.name(),
                    id,
                    error
                );
                let now = unit.now();
                let failed = unit.instance_mut(id)?;
                failed.status = InstanceStatus::Error;
                failed.failure = Some(FailureDetail {
                    message: error.message().to_string(),
                    failed_at: now,
                });
                unit.commit().await
            }
        }
    }

    /// Moves a scheduled instance the queue refused to `error`, so that
    /// [`retry`](Self::retry) can run it.
    async fn record_enqueue_failure(
        &self,
        flow: &FlowDefinition,
        instance_id: InstanceId,
        error: FlowError,
    ) -> Result<(), FlowError> {
        warn!(
            "Async instance {} of flow '{}' could not be enqueued: {}",
            instance_id,
            flow.label(),
            error
        );
        let instance = self.store.instance(instance_id).await?;
        if instance.status != InstanceStatus::Scheduled {
            return Ok(());
        }
        let process = self.store.process(instance.process_id).await?;
        let mut unit = self.unit(flow, process, None);
        let id = unit.stage(instance);
        let now = unit.now();
        let failed = unit.instance_mut(id)?;
        failed.status = InstanceStatus::Error;
        failed.failure = Some(FailureDetail {
            message: error.to_string(),
            failed_at: now,
        });
        unit.commit().await?;
        Ok(())
    }

    async fn enqueue(
        &self,
        flow: &FlowDefinition,
        instance_id: InstanceId,
    ) -> Result<(), FlowError> {
        let queue = self.queue.as_ref().ok_or_else(|| {
            FlowError::Queue(format!(
                "no work queue configured for async instance {}",
                instance_id
            ))
        })?;
        queue
            .enqueue(AsyncJob {
                flow_label: flow.label().clone(),
                instance_id,
            })
            .await
            .map_err(|e| FlowError::Queue(e.to_string()))?;
        debug!(
            "Enqueued async instance {} of flow '{}'",
            instance_id,
            flow.label()
        );
        Ok(())
    }
}

fn is_cancelable(process: &Process, instances: &[ActivityInstance]) -> bool {
    process.status == ProcessStatus::Started
        && instances
            .iter()
            .filter(|i| i.is_open())
            .all(|i| i.status == InstanceStatus::Instantiated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use hataori_core::{callback_fn, ActivityConfig, FlowBuilder, StaticPermissions};

    fn engine_with(flow: FlowBuilder) -> Engine<InMemoryStore> {
        let registry = FlowRegistry::bootstrap([flow]).expect("valid flow");
        Engine::builder(InMemoryStore::new(), registry)
            .build()
            .expect("valid engine")
    }

    #[tokio::test]
    async fn test_async_flow_requires_queue() {
        let registry = FlowRegistry::bootstrap([FlowBuilder::new("background")
            .start_with("start", ActivityKind::start(), ActivityConfig::new())
            .and_then(
                "send",
                ActivityKind::asynchronous(callback_fn("send", |_| Ok(()))),
                ActivityConfig::new(),
            )])
        .expect("valid flow");

        let result = Engine::builder(InMemoryStore::new(), registry).build();
        assert!(matches!(result, Err(FlowError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_process_assignment_override() {
        let engine = engine_with(
            FlowBuilder::new("f")
                .start_with(
                    "start",
                    ActivityKind::start(),
                    ActivityConfig::new().assign_to(hataori_core::AssignmentStrategy::Actor),
                )
                .and_then("end", ActivityKind::End, ActivityConfig::new()),
        );

        let started = engine
            .start_process("f", StartOptions::new().actor(Actor::new("alice")))
            .await
            .expect("started");
        assert_eq!(started.start.assigned_user.as_ref().map(|u| u.as_str()), Some("alice"));
        assert_eq!(started.start.modified_by.as_ref().map(|u| u.as_str()), Some("alice"));

        let started = engine
            .start_process(
                "f",
                StartOptions::new()
                    .actor(Actor::new("alice"))
                    .assign(Assignment::group("ops")),
            )
            .await
            .expect("started");
        assert!(started.start.assigned_user.is_none());
        assert_eq!(started.start.assigned_group.as_ref().map(|g| g.as_str()), Some("ops"));
    }

    #[tokio::test]
    async fn test_permission_denied_on_transition() {
        let registry = FlowRegistry::bootstrap([FlowBuilder::new("guarded")
            .permission("orders.run")
            .start_with("start", ActivityKind::start(), ActivityConfig::new())
            .and_then("end", ActivityKind::End, ActivityConfig::new())])
        .expect("valid flow");
        let engine = Engine::builder(InMemoryStore::new(), registry)
            .oracle(StaticPermissions::new().grant_user("alice", "orders.run"))
            .build()
            .expect("valid engine");

        let result = engine
            .start_process("guarded", StartOptions::new().actor(Actor::new("mallory")))
            .await;
        assert!(matches!(result, Err(FlowError::PermissionDenied { .. })));

        let started = engine
            .start_process("guarded", StartOptions::new())
            .await
            .expect("system caller");
        let result = engine
            .start(started.start.id, Some(&Actor::new("mallory")))
            .await;
        assert!(matches!(result, Err(FlowError::PermissionDenied { .. })));

        engine
            .start(started.start.id, Some(&Actor::new("alice")))
            .await
            .expect("permitted");
    }

    #[tokio::test]
    async fn test_unknown_flow() {
        let engine = engine_with(
            FlowBuilder::new("f")
                .start_with("start", ActivityKind::start(), ActivityConfig::new()),
        );
        let result = engine.start_process("missing", StartOptions::new()).await;
        assert!(matches!(result, Err(FlowError::UnknownFlow(_))));
    }
}
