//! Flow definitions and the flow builder.

use crate::activity::{ActivityConfig, ActivityDefinition, ActivityKind};
use crate::error::FlowError;
use crate::ids::{ActivityName, FlowLabel, PermissionTag};
use crate::registry::FlowRegistry;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An immutable, named graph of activities.
///
/// Built once with [`FlowBuilder`] and shared through the [`FlowRegistry`].
#[derive(Clone)]
pub struct FlowDefinition {
    label: FlowLabel,
    description: Option<String>,
    permission: Option<PermissionTag>,
    activities: IndexMap<ActivityName, ActivityDefinition>,
    out_edges: HashMap<ActivityName, Vec<ActivityName>>,
    in_edges: HashMap<ActivityName, Vec<ActivityName>>,
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("label", &self.label)
            .field("activities", &self.activities.keys().collect::<Vec<_>>())
            .field("permission", &self.permission)
            .finish()
    }
}

impl FlowDefinition {
    /// Returns the flow label.
    pub fn label(&self) -> &FlowLabel {
        &self.label
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the flow-level permission tag, if any.
    pub fn permission(&self) -> Option<&PermissionTag> {
        self.permission.as_ref()
    }

    /// Returns `true` if the flow or any of its activities carries a permission tag.
    pub fn has_any_permission(&self) -> bool {
        self.permission.is_some() || self.activities().any(|a| a.permission().is_some())
    }

    /// Returns the activities in declaration order.
    pub fn activities(&self) -> impl Iterator<Item = &ActivityDefinition> {
        self.activities.values()
    }

    /// Returns the number of activities.
    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }

    /// Looks up an activity by name.
    pub fn activity(&self, name: &str) -> Result<&ActivityDefinition, FlowError> {
        self.activities
            .get(name)
            .ok_or_else(|| FlowError::UnknownActivity {
                flow: self.label.clone(),
                activity: ActivityName::new(name),
            })
    }

    /// Returns the start activity.
    pub fn start_activity(&self) -> &ActivityDefinition {
        // `FlowBuilder::build` rejects empty flows.
        &self.activities[0]
    }

    /// Returns the direct successors of an activity in declaration order.
    pub fn successors(&self, name: &str) -> &[ActivityName] {
        self.out_edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the direct predecessors of an activity in declaration order.
    pub fn predecessors(&self, name: &str) -> &[ActivityName] {
        self.in_edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Builder for [`FlowDefinition`].
///
/// The first activity must be added with [`start_with`](Self::start_with).
/// [`and_then`](Self::and_then) chains from the most recently added activity and
/// [`add_activity`](Self::add_activity) names the predecessor explicitly.
/// A wait activity may name a predecessor that is declared later, which closes
/// a loop back into the join.
/// The first mistake is kept and reported by [`build`](Self::build) or
/// [`register`](Self::register).
///
/// # Examples
///
/// ```
/// use hataori_core::{ActivityConfig, ActivityKind, FlowBuilder};
///
/// let flow = FlowBuilder::new("erp_order")
///     .start_with("receive_order", ActivityKind::start(), ActivityConfig::new())
///     .and_then(
///         "match_organisation",
///         ActivityKind::view("match_organisation"),
///         ActivityConfig::new().skip_if(|p| p.field("organisation").is_some()),
///     )
///     .and_then("organisation_matched", ActivityKind::State, ActivityConfig::new())
///     .add_activity(
///         "match_person",
///         ActivityKind::view("match_person"),
///         Some("receive_order"),
///         ActivityConfig::new().skip_if(|p| p.field("person").is_some()),
///     )
///     .and_then("person_matched", ActivityKind::State, ActivityConfig::new())
///     .and_then(
///         "matching_done",
///         ActivityKind::Wait,
///         ActivityConfig::new().wait_for(["person_matched", "organisation_matched"]),
///     )
///     .and_then("success", ActivityKind::End, ActivityConfig::new())
///     .build()
///     .expect("valid flow");
///
/// assert_eq!(flow.successors("receive_order").len(), 2);
/// ```
#[derive(Debug)]
pub struct FlowBuilder {
    label: FlowLabel,
    description: Option<String>,
    permission: Option<PermissionTag>,
    activities: IndexMap<ActivityName, ActivityDefinition>,
    out_edges: HashMap<ActivityName, Vec<ActivityName>>,
    in_edges: HashMap<ActivityName, Vec<ActivityName>>,
    // (wait, later predecessor) pairs resolved by `build`
    loop_edges: Vec<(ActivityName, ActivityName)>,
    error: Option<String>,
}

impl FlowBuilder {
    /// Creates an empty builder for the label.
    pub fn new(label: impl Into<FlowLabel>) -> Self {
        Self {
            label: label.into(),
            description: None,
            permission: None,
            activities: IndexMap::new(),
            out_edges: HashMap::new(),
            in_edges: HashMap::new(),
            loop_edges: Vec::new(),
            error: None,
        }
    }

    /// Returns the label being built.
    pub fn label(&self) -> &FlowLabel {
        &self.label
    }

    /// Sets a human-readable description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Requires a permission for every activity of the flow.
    pub fn permission(mut self, tag: impl Into<PermissionTag>) -> Self {
        self.permission = Some(tag.into());
        self
    }

    /// Adds the start activity. Must be the first call.
    pub fn start_with(
        mut self,
        name: impl Into<ActivityName>,
        kind: ActivityKind,
        config: ActivityConfig,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = name.into();
        if !self.activities.is_empty() {
            self.fail(format!(
                "start_with('{}') has to be the first activity added",
                name
            ));
        } else if !kind.is_start() {
            self.fail(format!(
                "start activity '{}' must be a start kind, got {}",
                name,
                kind.label()
            ));
        } else if !config.wait_for.is_empty() {
            self.fail(format!("start activity '{}' cannot wait for anything", name));
        } else {
            self.activities
                .insert(name.clone(), ActivityDefinition::new(name, kind, config));
        }
        self
    }

    /// Adds an activity after the most recently added one.
    pub fn and_then(
        self,
        name: impl Into<ActivityName>,
        kind: ActivityKind,
        config: ActivityConfig,
    ) -> Self {
        self.add_activity(name, kind, None, config)
    }

    /// Adds an activity after `after`, or after the most recently added one.
    ///
    /// Names in the config's `wait_for` become additional predecessors. For a
    /// wait activity `after` may name an activity declared further down; the
    /// name is checked by [`build`](Self::build).
    pub fn add_activity(
        mut self,
        name: impl Into<ActivityName>,
        kind: ActivityKind,
        after: Option<&str>,
        config: ActivityConfig,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = name.into();
        if let Err(details) = self.validate_activity(&name, &kind, after, &config) {
            self.fail(details);
            return self;
        }

        let after = match after {
            Some(after) => ActivityName::new(after),
            None => match self.activities.last() {
                Some((last, _)) => last.clone(),
                None => return self,
            },
        };

        if !self.activities.contains_key(&after) {
            self.loop_edges.push((name.clone(), after.clone()));
        }

        let mut predecessors = vec![after];
        for required in &config.wait_for {
            if !predecessors.contains(required) {
                predecessors.push(required.clone());
            }
        }
        for predecessor in predecessors {
            self.out_edges
                .entry(predecessor.clone())
                .or_default()
                .push(name.clone());
            self.in_edges.entry(name.clone()).or_default().push(predecessor);
        }

        self.activities
            .insert(name.clone(), ActivityDefinition::new(name, kind, config));
        self
    }

    fn validate_activity(
        &self,
        name: &ActivityName,
        kind: &ActivityKind,
        after: Option<&str>,
        config: &ActivityConfig,
    ) -> Result<(), String> {
        if self.activities.is_empty() {
            return Err(format!(
                "a start activity has to be added with start_with before '{}'",
                name
            ));
        }
        if self.activities.contains_key(name) {
            return Err(format!("activity '{}' is declared twice", name));
        }
        if kind.is_start() {
            return Err(format!(
                "only the first activity may be a start activity, got '{}'",
                name
            ));
        }
        if let Some(after) = after {
            if after == name.as_str() {
                return Err(format!("activity '{}' cannot come after itself", name));
            }
            if !self.activities.contains_key(after) && !kind.should_wait() {
                return Err(format!(
                    "activity '{}' comes after unknown activity '{}'",
                    name, after
                ));
            }
        }
        if kind.should_wait() && config.wait_for.is_empty() {
            return Err(format!("wait activity '{}' needs to wait for something", name));
        }
        if !kind.should_wait() && !config.wait_for.is_empty() {
            return Err(format!(
                "only wait activities may declare wait_for, '{}' is {}",
                name,
                kind.label()
            ));
        }
        for required in &config.wait_for {
            match self.activities.get(required) {
                None => {
                    return Err(format!(
                        "activity '{}' waits for unknown activity '{}'",
                        name, required
                    ))
                }
                Some(definition) if definition.is_conditional() => {
                    return Err(format!(
                        "activity '{}' waits for conditional activity '{}', which may never run",
                        name, required
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn fail(&mut self, details: String) {
        if self.error.is_none() {
            self.error = Some(details);
        }
    }

    /// Finishes the definition.
    pub fn build(self) -> Result<FlowDefinition, FlowError> {
        if let Some(details) = self.error {
            return Err(FlowError::Validation {
                flow: self.label,
                details,
            });
        }
        if self.activities.is_empty() {
            return Err(FlowError::Validation {
                flow: self.label,
                details: "flow has no activities".to_string(),
            });
        }
        let dangling = self
            .loop_edges
            .iter()
            .find(|(_, after)| !self.activities.contains_key(after))
            .map(|(wait, after)| {
                format!("activity '{}' comes after unknown activity '{}'", wait, after)
            });
        if let Some(details) = dangling {
            return Err(FlowError::Validation {
                flow: self.label,
                details,
            });
        }
        Ok(FlowDefinition {
            label: self.label,
            description: self.description,
            permission: self.permission,
            activities: self.activities,
            out_edges: self.out_edges,
            in_edges: self.in_edges,
        })
    }

    /// Builds the definition and publishes it into the registry.
    pub fn register(self, registry: &mut FlowRegistry) -> Result<Arc<FlowDefinition>, FlowError> {
        registry.register(self.build()?)
    }
}
