//! Callbacks invoked by Function and Async activities.

use crate::model::{ActivityInstance, Process};
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a callback.
///
/// It never escapes a transition: the engine records it on the instance and
/// moves the instance to the error status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Creates a new callback error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// What a callback sees while it runs.
///
/// Holds snapshots of the process and instance taken when the instance was
/// started, and a working copy of the process payload. Changes to the payload
/// are committed together with the finish transition.
#[derive(Debug)]
pub struct ActivityContext {
    process: Process,
    instance: ActivityInstance,
    data: serde_json::Value,
}

impl ActivityContext {
    /// Creates a context for the given snapshots.
    pub fn new(process: Process, instance: ActivityInstance) -> Self {
        let data = process.data.clone();
        Self {
            process,
            instance,
            data,
        }
    }

    /// Returns the process snapshot.
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Returns the instance snapshot.
    pub fn instance(&self) -> &ActivityInstance {
        &self.instance
    }

    /// Returns the working copy of the process payload.
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Returns the working copy of the process payload for modification.
    pub fn data_mut(&mut self) -> &mut serde_json::Value {
        &mut self.data
    }

    /// Sets a top-level payload field, turning a non-object payload into an object.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        if !self.data.is_object() {
            self.data = serde_json::Value::Object(serde_json::Map::new());
        }
        if let serde_json::Value::Object(map) = &mut self.data {
            map.insert(key.into(), value);
        }
    }

    /// Returns `true` if the payload differs from the process snapshot.
    pub fn is_data_changed(&self) -> bool {
        self.data != self.process.data
    }

    /// Consumes the context and returns the working payload.
    pub fn into_data(self) -> serde_json::Value {
        self.data
    }
}

/// The body of a Function or Async activity.
///
/// # Examples
///
/// ```
/// use hataori_core::{ActivityContext, Callback, CallbackError};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct TransmitOrder;
///
/// #[async_trait]
/// impl Callback for TransmitOrder {
///     async fn call(&self, ctx: &mut ActivityContext) -> Result<(), CallbackError> {
///         ctx.set("transmitted", serde_json::json!(true));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Callback: Send + Sync + Debug {
    /// Runs the activity body.
    async fn call(&self, ctx: &mut ActivityContext) -> Result<(), CallbackError>;
}

type CallbackFn = dyn Fn(&mut ActivityContext) -> Result<(), CallbackError> + Send + Sync;

/// Adapter turning a synchronous closure into a [`Callback`].
pub struct FnCallback {
    name: String,
    f: Box<CallbackFn>,
}

impl Debug for FnCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCallback").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Callback for FnCallback {
    async fn call(&self, ctx: &mut ActivityContext) -> Result<(), CallbackError> {
        (self.f)(ctx)
    }
}

/// Wraps a closure as a shareable callback.
pub fn callback_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn Callback>
where
    F: Fn(&mut ActivityContext) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(FnCallback {
        name: name.into(),
        f: Box::new(f),
    })
}
