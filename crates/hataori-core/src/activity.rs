//! Activity kinds and definitions.

use crate::assignment::AssignmentStrategy;
use crate::callback::Callback;
use crate::ids::{ActivityName, PermissionTag};
use crate::model::Process;
use indexmap::IndexSet;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether an activity is folded away for a process.
pub type SkipPredicate = Arc<dyn Fn(&Process) -> bool + Send + Sync>;

/// The behavior of a node in a flow.
#[derive(Debug, Clone)]
pub enum ActivityKind {
    /// Entry point, created together with its process. An optional view lets
    /// a UI collaborator drive it.
    Start {
        /// View identifier handed to the UI collaborator.
        view: Option<String>,
    },
    /// Completes the process; runs inline.
    End,
    /// Zero-work marker; runs inline. Gives skip-folding a stable target.
    State,
    /// Interaction point driven by the UI collaborator.
    View {
        /// View identifier handed to the UI collaborator.
        view: String,
    },
    /// Synchronous callback run as soon as the instance is created.
    Function(Arc<dyn Callback>),
    /// Callback handed to the work queue.
    Async(Arc<dyn Callback>),
    /// Join waiting for its required predecessors.
    Wait,
}

impl ActivityKind {
    /// A start activity without a view.
    pub fn start() -> Self {
        ActivityKind::Start { view: None }
    }

    /// A start activity driven by a view.
    pub fn start_view(view: impl Into<String>) -> Self {
        ActivityKind::Start {
            view: Some(view.into()),
        }
    }

    /// A view activity.
    pub fn view(view: impl Into<String>) -> Self {
        ActivityKind::View { view: view.into() }
    }

    /// A synchronous callback activity.
    pub fn function(callback: Arc<dyn Callback>) -> Self {
        ActivityKind::Function(callback)
    }

    /// An asynchronous callback activity.
    pub fn asynchronous(callback: Arc<dyn Callback>) -> Self {
        ActivityKind::Async(callback)
    }

    /// Returns `true` for start kinds.
    pub fn is_start(&self) -> bool {
        matches!(self, ActivityKind::Start { .. })
    }

    /// Returns `true` if a UI collaborator drives this activity.
    pub fn has_view(&self) -> bool {
        self.view_name().is_some()
    }

    /// Returns the view identifier, if any.
    pub fn view_name(&self) -> Option<&str> {
        match self {
            ActivityKind::Start { view } => view.as_deref(),
            ActivityKind::View { view } => Some(view),
            _ => None,
        }
    }

    /// Returns `true` for joins.
    pub fn should_wait(&self) -> bool {
        matches!(self, ActivityKind::Wait)
    }

    /// Returns `true` for kinds that start and finish inline on instantiation.
    pub fn auto_completes(&self) -> bool {
        matches!(self, ActivityKind::End | ActivityKind::State)
    }

    /// Returns the callback of Function and Async kinds.
    pub fn callback(&self) -> Option<&Arc<dyn Callback>> {
        match self {
            ActivityKind::Function(callback) | ActivityKind::Async(callback) => Some(callback),
            _ => None,
        }
    }

    /// Short name of the kind, for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::Start { .. } => "start",
            ActivityKind::End => "end",
            ActivityKind::State => "state",
            ActivityKind::View { .. } => "view",
            ActivityKind::Function(_) => "function",
            ActivityKind::Async(_) => "async",
            ActivityKind::Wait => "wait",
        }
    }
}

/// Per-activity configuration passed to the flow builder.
///
/// # Examples
///
/// ```
/// use hataori_core::{ActivityConfig, AssignmentStrategy};
///
/// let config = ActivityConfig::new()
///     .skip_if(|process| process.field("organisation").is_some())
///     .assign_to(AssignmentStrategy::Inherit)
///     .permission("orders.match");
/// ```
#[derive(Clone, Default)]
pub struct ActivityConfig {
    pub(crate) skip_if: Option<SkipPredicate>,
    pub(crate) wait_for: IndexSet<ActivityName>,
    pub(crate) assign_to: AssignmentStrategy,
    pub(crate) permission: Option<PermissionTag>,
    pub(crate) description: Option<String>,
}

impl fmt::Debug for ActivityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityConfig")
            .field("skip_if", &self.skip_if.is_some())
            .field("wait_for", &self.wait_for)
            .field("assign_to", &self.assign_to)
            .field("permission", &self.permission)
            .finish()
    }
}

impl ActivityConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skips the activity whenever the predicate holds for the process.
    pub fn skip_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Process) -> bool + Send + Sync + 'static,
    {
        self.skip_if = Some(Arc::new(predicate));
        self
    }

    /// Requires these predecessors before a Wait activity completes.
    pub fn wait_for<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<ActivityName>,
    {
        self.wait_for.extend(names.into_iter().map(Into::into));
        self
    }

    /// Sets the assignment strategy.
    pub fn assign_to(mut self, strategy: AssignmentStrategy) -> Self {
        self.assign_to = strategy;
        self
    }

    /// Requires a permission to act on the activity.
    pub fn permission(mut self, tag: impl Into<PermissionTag>) -> Self {
        self.permission = Some(tag.into());
        self
    }

    /// Sets a human-readable description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// One node of a flow.
#[derive(Clone)]
pub struct ActivityDefinition {
    name: ActivityName,
    kind: ActivityKind,
    config: ActivityConfig,
}

impl fmt::Debug for ActivityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("config", &self.config)
            .finish()
    }
}

impl ActivityDefinition {
    pub(crate) fn new(name: ActivityName, kind: ActivityKind, config: ActivityConfig) -> Self {
        Self { name, kind, config }
    }

    /// Returns the activity name.
    pub fn name(&self) -> &ActivityName {
        &self.name
    }

    /// Returns the activity kind.
    pub fn kind(&self) -> &ActivityKind {
        &self.kind
    }

    /// Returns `true` if the activity is conditional.
    pub fn is_conditional(&self) -> bool {
        self.config.skip_if.is_some()
    }

    /// Evaluates the skip predicate against a process snapshot.
    pub fn should_skip(&self, process: &Process) -> bool {
        self.config
            .skip_if
            .as_ref()
            .is_some_and(|predicate| predicate(process))
    }

    /// Names a Wait activity requires among its predecessors.
    pub fn wait_for(&self) -> &IndexSet<ActivityName> {
        &self.config.wait_for
    }

    /// Returns the assignment strategy.
    pub fn assign_to(&self) -> &AssignmentStrategy {
        &self.config.assign_to
    }

    /// Returns the permission tag, if any.
    pub fn permission(&self) -> Option<&PermissionTag> {
        self.config.permission.as_ref()
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.config.description.as_deref()
    }

    /// Returns `true` if a UI collaborator drives this activity.
    pub fn has_view(&self) -> bool {
        self.kind.has_view()
    }
}
