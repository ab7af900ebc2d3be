//! Actors and the authorization oracle.

use crate::activity::ActivityDefinition;
use crate::flow::FlowDefinition;
use crate::ids::{GroupId, PermissionTag, UserId};
use std::collections::{HashMap, HashSet};

/// The caller performing a transition or query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// The acting user.
    pub user: UserId,
    /// Groups the user belongs to.
    pub groups: Vec<GroupId>,
}

impl Actor {
    /// Creates an actor without groups.
    pub fn new(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            groups: Vec::new(),
        }
    }

    /// Adds group memberships.
    pub fn with_groups<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GroupId>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }
}

/// External authority deciding whether an actor holds a permission.
///
/// The engine stores no policy of its own; it only asks.
pub trait AuthorizationOracle: Send + Sync {
    /// Returns `true` if the actor holds the permission.
    fn has_permission(&self, actor: &Actor, permission: &PermissionTag) -> bool;
}

/// Oracle granting every permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorizationOracle for AllowAll {
    fn has_permission(&self, _actor: &Actor, _permission: &PermissionTag) -> bool {
        true
    }
}

/// Oracle backed by fixed user and group grants.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    users: HashMap<UserId, HashSet<PermissionTag>>,
    groups: HashMap<GroupId, HashSet<PermissionTag>>,
}

impl StaticPermissions {
    /// Creates an oracle without grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a permission to a user.
    pub fn grant_user(
        mut self,
        user: impl Into<UserId>,
        permission: impl Into<PermissionTag>,
    ) -> Self {
        self.users
            .entry(user.into())
            .or_default()
            .insert(permission.into());
        self
    }

    /// Grants a permission to every member of a group.
    pub fn grant_group(
        mut self,
        group: impl Into<GroupId>,
        permission: impl Into<PermissionTag>,
    ) -> Self {
        self.groups
            .entry(group.into())
            .or_default()
            .insert(permission.into());
        self
    }
}

impl AuthorizationOracle for StaticPermissions {
    fn has_permission(&self, actor: &Actor, permission: &PermissionTag) -> bool {
        self.users
            .get(&actor.user)
            .is_some_and(|granted| granted.contains(permission))
            || actor.groups.iter().any(|group| {
                self.groups
                    .get(group)
                    .is_some_and(|granted| granted.contains(permission))
            })
    }
}

/// Returns the first permission the actor lacks for acting on an activity.
///
/// Both the flow permission and the activity permission are required when
/// present. An activity without either is open to everyone.
pub fn missing_activity_permission<'a>(
    oracle: &dyn AuthorizationOracle,
    actor: &Actor,
    flow: &'a FlowDefinition,
    activity: &'a ActivityDefinition,
) -> Option<&'a PermissionTag> {
    [flow.permission(), activity.permission()]
        .into_iter()
        .flatten()
        .find(|tag| !oracle.has_permission(actor, tag))
}

/// Returns `true` if the actor may act on the activity.
pub fn can_act_on(
    oracle: &dyn AuthorizationOracle,
    actor: &Actor,
    flow: &FlowDefinition,
    activity: &ActivityDefinition,
) -> bool {
    missing_activity_permission(oracle, actor, flow, activity).is_none()
}

/// Returns `true` if the actor may see processes of the flow.
///
/// A flow without any permission tags is visible to everyone; otherwise the
/// flow permission or any single activity permission is enough.
pub fn can_view_flow(
    oracle: &dyn AuthorizationOracle,
    actor: &Actor,
    flow: &FlowDefinition,
) -> bool {
    if !flow.has_any_permission() {
        return true;
    }
    flow.permission()
        .into_iter()
        .chain(flow.activities().filter_map(|a| a.permission()))
        .any(|tag| oracle.has_permission(actor, tag))
}
