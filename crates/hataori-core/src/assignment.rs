//! Advisory assignment of activity instances.

use crate::ids::{GroupId, UserId};
use crate::model::{ActivityInstance, Process};
use crate::permission::Actor;
use std::fmt;
use std::sync::Arc;

/// The user and group an instance is assigned to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Assigned user.
    pub user: Option<UserId>,
    /// Assigned group.
    pub group: Option<GroupId>,
}

impl Assignment {
    /// Assignment to nobody.
    pub fn nobody() -> Self {
        Self::default()
    }

    /// Assignment to a single user.
    pub fn user(user: impl Into<UserId>) -> Self {
        Self {
            user: Some(user.into()),
            group: None,
        }
    }

    /// Assignment to a group.
    pub fn group(group: impl Into<GroupId>) -> Self {
        Self {
            user: None,
            group: Some(group.into()),
        }
    }
}

/// Inputs available to an assignment strategy.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentContext<'a> {
    /// The owning process.
    pub process: &'a Process,
    /// The caller performing the triggering transition, if any.
    pub actor: Option<&'a Actor>,
    /// The predecessor instance, if any.
    pub predecessor: Option<&'a ActivityInstance>,
}

type AssignFn = dyn Fn(&AssignmentContext<'_>) -> Assignment + Send + Sync;

/// How a new instance is assigned.
///
/// Evaluated once at instantiation. Assignment only feeds "my work" queries;
/// it never decides whether a transition is allowed.
#[derive(Clone, Default)]
pub enum AssignmentStrategy {
    /// Assign to nobody.
    #[default]
    Unassigned,
    /// Copy the predecessor's user and group.
    Inherit,
    /// Assign to the acting user.
    Actor,
    /// Custom rule.
    Custom(Arc<AssignFn>),
}

impl fmt::Debug for AssignmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStrategy::Unassigned => write!(f, "Unassigned"),
            AssignmentStrategy::Inherit => write!(f, "Inherit"),
            AssignmentStrategy::Actor => write!(f, "Actor"),
            AssignmentStrategy::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl AssignmentStrategy {
    /// Creates a custom strategy.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&AssignmentContext<'_>) -> Assignment + Send + Sync + 'static,
    {
        AssignmentStrategy::Custom(Arc::new(f))
    }

    /// Evaluates the strategy.
    pub fn assign(&self, ctx: &AssignmentContext<'_>) -> Assignment {
        match self {
            AssignmentStrategy::Unassigned => Assignment::nobody(),
            AssignmentStrategy::Inherit => ctx
                .predecessor
                .map(|p| Assignment {
                    user: p.assigned_user.clone(),
                    group: p.assigned_group.clone(),
                })
                .unwrap_or_default(),
            AssignmentStrategy::Actor => Assignment {
                user: ctx.actor.map(|a| a.user.clone()),
                group: None,
            },
            AssignmentStrategy::Custom(f) => f(ctx),
        }
    }
}
