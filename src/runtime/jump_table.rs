//! Position-indexed callback tables
//!
//! Built once per loaded snapshot so the state machine can dispatch a
//! node's condition or action by array index.

use std::fmt;

use super::database::Database;
use super::registry::{ActionFn, ConditionFn, NodeRegistry};

/// Dense condition/action arrays, indexed by node position
#[derive(Clone, Default)]
pub struct JumpTables {
    conditions: Vec<Option<ConditionFn>>,
    actions: Vec<Option<ActionFn>>,
    unknown: Vec<i32>,
}

impl JumpTables {
    /// Resolve every registration against `database`
    ///
    /// Registrations for node ids absent from the snapshot are skipped
    /// with a warning.
    pub fn build(database: &Database, registry: &NodeRegistry) -> Self {
        let node_count = database.node_count();
        let mut tables = Self {
            conditions: vec![None; node_count],
            actions: vec![None; node_count],
            unknown: Vec::new(),
        };

        for (node_id, condition) in registry.conditions() {
            match database.node_index(node_id) {
                Some(index) => tables.conditions[index as usize] = Some(condition.clone()),
                None => {
                    tracing::warn!(node_id, "Condition registered for unknown node");
                    tables.unknown.push(node_id);
                }
            }
        }

        for (node_id, action) in registry.actions() {
            match database.node_index(node_id) {
                Some(index) => tables.actions[index as usize] = Some(action.clone()),
                None => {
                    tracing::warn!(node_id, "Action registered for unknown node");
                    tables.unknown.push(node_id);
                }
            }
        }

        tables.unknown.sort_unstable();
        tables.unknown.dedup();
        tables
    }

    /// Condition for the node at `index`
    pub fn condition(&self, index: i32) -> Option<&ConditionFn> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.conditions.get(i))
            .and_then(Option::as_ref)
    }

    /// Action for the node at `index`
    pub fn action(&self, index: i32) -> Option<&ActionFn> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.actions.get(i))
            .and_then(Option::as_ref)
    }

    /// Table length (node count at build time)
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Whether the tables are empty
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Node ids that were registered but not found
    pub fn unknown_registrations(&self) -> &[i32] {
        &self.unknown
    }

    /// Cross-check node flags against the tables
    pub fn validate(&self, database: &Database) -> ValidationReport {
        let mut report = ValidationReport::default();

        let node_count = database.node_count();
        if self.conditions.len() != node_count || self.actions.len() != node_count {
            report.size_mismatch = Some((self.conditions.len().min(self.actions.len()), node_count));
        }

        for index in 0..node_count as i32 {
            let node = database.node(index);
            if node.has_condition() && self.condition(index).is_none() {
                report.missing_conditions.push(node.id());
            }
            if node.has_action() && self.action(index).is_none() {
                report.missing_actions.push(node.id());
            }
        }

        report
    }
}

impl fmt::Debug for JumpTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JumpTables")
            .field("len", &self.len())
            .field("conditions", &self.conditions.iter().flatten().count())
            .field("actions", &self.actions.iter().flatten().count())
            .field("unknown", &self.unknown)
            .finish()
    }
}

/// Mismatches between node flags and registered callbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Ids of nodes flagged `has_condition` without a condition
    pub missing_conditions: Vec<i32>,
    /// Ids of nodes flagged `has_action` without an action
    pub missing_actions: Vec<i32>,
    /// `(table_len, node_count)` when the tables were built for another snapshot
    pub size_mismatch: Option<(usize, usize)>,
}

impl ValidationReport {
    /// No mismatches found
    pub fn is_ok(&self) -> bool {
        self.missing_conditions.is_empty()
            && self.missing_actions.is_empty()
            && self.size_mismatch.is_none()
    }

    /// Emit one warning per mismatch
    pub fn log(&self) {
        if let Some((tables, nodes)) = self.size_mismatch {
            tracing::warn!(tables, nodes, "Jump tables sized for a different snapshot");
        }
        for node_id in &self.missing_conditions {
            tracing::warn!(node_id, "Node has a condition flag but no registered condition");
        }
        for node_id in &self.missing_actions {
            tracing::warn!(node_id, "Node has an action flag but no registered action");
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "all flagged nodes have callbacks");
        }
        if let Some((tables, nodes)) = self.size_mismatch {
            writeln!(f, "table size {} does not match node count {}", tables, nodes)?;
        }
        if !self.missing_conditions.is_empty() {
            writeln!(f, "missing conditions: {:?}", self.missing_conditions)?;
        }
        if !self.missing_actions.is_empty() {
            writeln!(f, "missing actions: {:?}", self.missing_actions)?;
        }
        Ok(())
    }
}
