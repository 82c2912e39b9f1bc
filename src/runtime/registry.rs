//! Node callback registry
//!
//! Hosts register condition and action callbacks against stable node
//! identifiers once at startup, then hand the registry to
//! [`Runner::initialize`](super::runner::Runner::initialize), which resolves
//! it into position-indexed jump tables.

use std::collections::HashMap;
use std::sync::Arc;

use super::listener::{ActionTask, DialogueContext};

/// Condition callback: `true` lets the edge into the node be taken
pub type ConditionFn = Arc<dyn Fn(&DialogueContext<'_>) -> bool + Send + Sync>;

/// Action callback: `None` completes instantly, `Some` starts a latent task
pub type ActionFn =
    Arc<dyn Fn(&DialogueContext<'_>) -> Option<Box<dyn ActionTask>> + Send + Sync>;

/// Registered callbacks keyed by node identifier
#[derive(Clone, Default)]
pub struct NodeRegistry {
    conditions: HashMap<i32, ConditionFn>,
    actions: HashMap<i32, ActionFn>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the condition for `node_id`
    pub fn register_condition<F>(&mut self, node_id: i32, condition: F) -> &mut Self
    where
        F: Fn(&DialogueContext<'_>) -> bool + Send + Sync + 'static,
    {
        if self.conditions.insert(node_id, Arc::new(condition)).is_some() {
            tracing::warn!(node_id, "Condition registered twice; keeping the latest");
        }
        self
    }

    /// Register the action for `node_id`
    pub fn register_action<F>(&mut self, node_id: i32, action: F) -> &mut Self
    where
        F: Fn(&DialogueContext<'_>) -> Option<Box<dyn ActionTask>> + Send + Sync + 'static,
    {
        if self.actions.insert(node_id, Arc::new(action)).is_some() {
            tracing::warn!(node_id, "Action registered twice; keeping the latest");
        }
        self
    }

    /// Condition registered for `node_id`
    pub fn condition(&self, node_id: i32) -> Option<&ConditionFn> {
        self.conditions.get(&node_id)
    }

    /// Action registered for `node_id`
    pub fn action(&self, node_id: i32) -> Option<&ActionFn> {
        self.actions.get(&node_id)
    }

    /// All `(node_id, condition)` registrations
    pub fn conditions(&self) -> impl Iterator<Item = (i32, &ConditionFn)> {
        self.conditions.iter().map(|(id, f)| (*id, f))
    }

    /// All `(node_id, action)` registrations
    pub fn actions(&self) -> impl Iterator<Item = (i32, &ActionFn)> {
        self.actions.iter().map(|(id, f)| (*id, f))
    }

    /// Number of registered conditions
    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    /// Number of registered actions
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("conditions", &self.conditions.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}
