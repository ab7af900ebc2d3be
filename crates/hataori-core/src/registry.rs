//! Registry of flow definitions keyed by label.

use crate::error::FlowError;
use crate::flow::{FlowBuilder, FlowDefinition};
use crate::ids::FlowLabel;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of immutable flow definitions.
///
/// Populated at bootstrap and read-only afterwards; the engine holds it behind
/// an `Arc`, so process records only carry the flow label and resolve their
/// definition through here.
#[derive(Debug, Default, Clone)]
pub struct FlowRegistry {
    flows: HashMap<FlowLabel, Arc<FlowDefinition>>,
}

impl FlowRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and registers every flow, stopping at the first error.
    pub fn bootstrap<I>(builders: I) -> Result<Self, FlowError>
    where
        I: IntoIterator<Item = FlowBuilder>,
    {
        let mut registry = Self::new();
        for builder in builders {
            builder.register(&mut registry)?;
        }
        Ok(registry)
    }

    /// Publishes a definition under its label.
    pub fn register(&mut self, flow: FlowDefinition) -> Result<Arc<FlowDefinition>, FlowError> {
        if self.flows.contains_key(flow.label()) {
            return Err(FlowError::DuplicateFlow(flow.label().clone()));
        }
        let flow = Arc::new(flow);
        self.flows.insert(flow.label().clone(), Arc::clone(&flow));
        Ok(flow)
    }

    /// Resolves a label.
    pub fn flow(&self, label: &str) -> Result<Arc<FlowDefinition>, FlowError> {
        self.flows
            .get(label)
            .cloned()
            .ok_or_else(|| FlowError::UnknownFlow(FlowLabel::new(label)))
    }

    /// Returns `true` if a flow is registered under the label.
    pub fn contains(&self, label: &str) -> bool {
        self.flows.contains_key(label)
    }

    /// Returns all registered definitions.
    pub fn flows(&self) -> impl Iterator<Item = &Arc<FlowDefinition>> {
        self.flows.values()
    }

    /// Returns the number of registered flows.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
