//! Entity references over a loaded snapshot
//!
//! Every reference is a `(database, position)` pair: `Copy`, cheap, and
//! default-constructible to an invalid state. Accessors never fail. On an
//! invalid reference (no database, no snapshot, position out of range) they
//! return `-1`, `""`, `0`, `false` or another invalid reference.

use std::fmt;

use super::database::Database;
use super::format::{
    ActorRecord, ConversationRecord, EdgeRecord, EdgeType, ListRef, LocalizationRecord, NodeRecord,
    NodeType, PropertyRecord, PropertyTemplateRecord, PropertyType, PropertyValue,
    CONVERSATION_FLAG_LAYOUT_AUTO, CONVERSATION_FLAG_LAYOUT_VERTICAL, NODE_FLAG_ACTION,
    NODE_FLAG_CONDITION, NODE_FLAG_PREVENT_RESPONSE,
};

macro_rules! entity_ref {
    ($(#[$meta:meta])* $name:ident, $record:ident, $getter:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        pub struct $name<'a> {
            database: Option<&'a Database>,
            index: i32,
        }

        impl<'a> $name<'a> {
            pub(crate) fn new(database: &'a Database, index: i32) -> Self {
                Self {
                    database: Some(database),
                    index,
                }
            }

            /// An explicitly invalid reference
            pub fn invalid() -> Self {
                Self {
                    database: None,
                    index: -1,
                }
            }

            /// Whether this reference resolves against a loaded snapshot
            pub fn is_valid(&self) -> bool {
                self.record().is_some()
            }

            /// Position within the snapshot collection
            pub fn index(&self) -> i32 {
                self.index
            }

            /// Backing database, if any
            pub fn database(&self) -> Option<&'a Database> {
                self.database
            }

            fn record(&self) -> Option<$record<'a>> {
                self.database?.snapshot()?.$getter(self.index)
            }
        }

        impl Default for $name<'_> {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl PartialEq for $name<'_> {
            fn eq(&self, other: &Self) -> bool {
                let same_db = match (self.database, other.database) {
                    (Some(a), Some(b)) => std::ptr::eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
                same_db && self.index == other.index
            }
        }

        impl Eq for $name<'_> {}

        impl fmt::Debug for $name<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("index", &self.index)
                    .field("valid", &self.is_valid())
                    .finish()
            }
        }
    };
}

fn list_item(database: Option<&Database>, list: Option<ListRef>, i: usize) -> i32 {
    database
        .and_then(Database::snapshot)
        .zip(list)
        .and_then(|(snapshot, list)| snapshot.list_item(list, i))
        .unwrap_or(-1)
}

fn property_at(database: Option<&Database>, list: Option<ListRef>, i: usize) -> PropertyRef<'_> {
    match (database, list) {
        (Some(db), Some(list)) if i < list.len as usize => {
            PropertyRef::new(db, (list.start as usize + i) as i32)
        }
        _ => PropertyRef::invalid(),
    }
}

fn conversation_at(database: Option<&Database>, index: i32) -> ConversationRef<'_> {
    database.map_or_else(ConversationRef::invalid, |db| db.conversation(index))
}

fn node_at(database: Option<&Database>, index: i32) -> NodeRef<'_> {
    database.map_or_else(NodeRef::invalid, |db| db.node(index))
}

fn edge_at(database: Option<&Database>, index: i32) -> EdgeRef<'_> {
    database.map_or_else(EdgeRef::invalid, |db| db.edge(index))
}

entity_ref!(
    /// Reference to a conversation
    ConversationRef,
    ConversationRecord,
    conversation
);

impl<'a> ConversationRef<'a> {
    /// Stable identifier, or -1
    pub fn id(&self) -> i32 {
        self.record().map_or(-1, |r| r.id())
    }

    /// Name
    pub fn name(&self) -> &'a str {
        self.record().map_or("", |r| r.name())
    }

    /// Author notes
    pub fn notes(&self) -> &'a str {
        self.record().map_or("", |r| r.notes())
    }

    /// Editor auto-layout hint
    pub fn is_layout_auto(&self) -> bool {
        self.record()
            .is_some_and(|r| r.flags() & CONVERSATION_FLAG_LAYOUT_AUTO != 0)
    }

    /// Editor vertical-layout hint
    pub fn is_layout_vertical(&self) -> bool {
        self.record()
            .is_some_and(|r| r.flags() & CONVERSATION_FLAG_LAYOUT_VERTICAL != 0)
    }

    /// Root node
    pub fn root_node(&self) -> NodeRef<'a> {
        node_at(self.database, self.record().map_or(-1, |r| r.root_node_idx()))
    }

    /// Number of member nodes
    pub fn node_count(&self) -> usize {
        self.record().map_or(0, |r| r.nodes().len as usize)
    }

    /// Member node `i`
    pub fn node(&self, i: usize) -> NodeRef<'a> {
        node_at(self.database, list_item(self.database, self.record().map(|r| r.nodes()), i))
    }

    /// Member nodes in snapshot order
    pub fn nodes(self) -> impl Iterator<Item = NodeRef<'a>> {
        (0..self.node_count()).map(move |i| self.node(i))
    }

    /// Number of member edges
    pub fn edge_count(&self) -> usize {
        self.record().map_or(0, |r| r.edges().len as usize)
    }

    /// Member edge `i`
    pub fn edge(&self, i: usize) -> EdgeRef<'a> {
        edge_at(self.database, list_item(self.database, self.record().map(|r| r.edges()), i))
    }

    /// Member edges in snapshot order
    pub fn edges(self) -> impl Iterator<Item = EdgeRef<'a>> {
        (0..self.edge_count()).map(move |i| self.edge(i))
    }

    /// Number of custom properties
    pub fn property_count(&self) -> usize {
        self.record().map_or(0, |r| r.properties().len as usize)
    }

    /// Custom property `i`
    pub fn property(&self, i: usize) -> PropertyRef<'a> {
        property_at(self.database, self.record().map(|r| r.properties()), i)
    }

    /// Custom properties
    pub fn properties(self) -> impl Iterator<Item = PropertyRef<'a>> {
        (0..self.property_count()).map(move |i| self.property(i))
    }

    /// First custom property whose template has `name`
    pub fn find_property(self, name: &str) -> Option<PropertyRef<'a>> {
        self.properties().find(|p| p.name() == name)
    }
}

entity_ref!(
    /// Reference to a node
    NodeRef,
    NodeRecord,
    node
);

impl<'a> NodeRef<'a> {
    /// Stable identifier, or -1
    pub fn id(&self) -> i32 {
        self.record().map_or(-1, |r| r.id())
    }

    /// Owning conversation
    pub fn conversation(&self) -> ConversationRef<'a> {
        conversation_at(self.database, self.record().map_or(-1, |r| r.conversation_idx()))
    }

    /// Node type (`Root` when invalid)
    pub fn node_type(&self) -> NodeType {
        self.record().map(|r| r.node_type()).unwrap_or_default()
    }

    /// Whether this is a root node
    pub fn is_root(&self) -> bool {
        self.is_valid() && self.node_type() == NodeType::Root
    }

    /// Speaking actor (invalid when the node has none)
    pub fn actor(&self) -> ActorRef<'a> {
        let index = self.record().map_or(-1, |r| r.actor_idx());
        self.database
            .map_or_else(ActorRef::invalid, |db| db.actor(index))
    }

    /// Voice text
    pub fn voice_text(&self) -> &'a str {
        self.record().map_or("", |r| r.voice_text())
    }

    /// UI response text
    pub fn ui_response_text(&self) -> &'a str {
        self.record().map_or("", |r| r.ui_response_text())
    }

    /// Author notes
    pub fn notes(&self) -> &'a str {
        self.record().map_or("", |r| r.notes())
    }

    /// Editor position
    pub fn position(&self) -> (f32, f32) {
        self.record().map_or((0.0, 0.0), |r| r.position())
    }

    fn flag(&self, bit: u8) -> bool {
        self.record().is_some_and(|r| r.flags() & bit != 0)
    }

    /// Node declares a condition
    pub fn has_condition(&self) -> bool {
        self.flag(NODE_FLAG_CONDITION)
    }

    /// Node declares an action
    pub fn has_action(&self) -> bool {
        self.flag(NODE_FLAG_ACTION)
    }

    /// Leaving this node never prompts a decision
    pub fn is_prevent_response(&self) -> bool {
        self.flag(NODE_FLAG_PREVENT_RESPONSE)
    }

    /// Number of outgoing edges
    pub fn outgoing_edge_count(&self) -> usize {
        self.record().map_or(0, |r| r.outgoing_edges().len as usize)
    }

    /// Outgoing edge `i` (descending priority order)
    pub fn outgoing_edge(&self, i: usize) -> EdgeRef<'a> {
        let list = self.record().map(|r| r.outgoing_edges());
        edge_at(self.database, list_item(self.database, list, i))
    }

    /// Outgoing edges in descending priority order
    pub fn outgoing_edges(self) -> impl Iterator<Item = EdgeRef<'a>> {
        (0..self.outgoing_edge_count()).map(move |i| self.outgoing_edge(i))
    }

    /// Number of incoming edges
    pub fn incoming_edge_count(&self) -> usize {
        self.record().map_or(0, |r| r.incoming_edges().len as usize)
    }

    /// Incoming edge `i`
    pub fn incoming_edge(&self, i: usize) -> EdgeRef<'a> {
        let list = self.record().map(|r| r.incoming_edges());
        edge_at(self.database, list_item(self.database, list, i))
    }

    /// Incoming edges
    pub fn incoming_edges(self) -> impl Iterator<Item = EdgeRef<'a>> {
        (0..self.incoming_edge_count()).map(move |i| self.incoming_edge(i))
    }

    /// Number of custom properties
    pub fn property_count(&self) -> usize {
        self.record().map_or(0, |r| r.properties().len as usize)
    }

    /// Custom property `i`
    pub fn property(&self, i: usize) -> PropertyRef<'a> {
        property_at(self.database, self.record().map(|r| r.properties()), i)
    }

    /// Custom properties
    pub fn properties(self) -> impl Iterator<Item = PropertyRef<'a>> {
        (0..self.property_count()).map(move |i| self.property(i))
    }

    /// First custom property whose template has `name`
    pub fn find_property(self, name: &str) -> Option<PropertyRef<'a>> {
        self.properties().find(|p| p.name() == name)
    }
}

entity_ref!(
    /// Reference to an edge
    EdgeRef,
    EdgeRecord,
    edge
);

impl<'a> EdgeRef<'a> {
    /// Stable identifier, or -1
    pub fn id(&self) -> i32 {
        self.record().map_or(-1, |r| r.id())
    }

    /// Owning conversation
    pub fn conversation(&self) -> ConversationRef<'a> {
        conversation_at(self.database, self.record().map_or(-1, |r| r.conversation_idx()))
    }

    /// Source node
    pub fn source(&self) -> NodeRef<'a> {
        node_at(self.database, self.record().map_or(-1, |r| r.source_idx()))
    }

    /// Target node
    pub fn target(&self) -> NodeRef<'a> {
        node_at(self.database, self.record().map_or(-1, |r| r.target_idx()))
    }

    /// Priority, or 0
    pub fn priority(&self) -> i32 {
        self.record().map_or(0, |r| r.priority())
    }

    /// Edge type
    pub fn edge_type(&self) -> EdgeType {
        self.record().map(|r| r.edge_type()).unwrap_or_default()
    }
}

entity_ref!(
    /// Reference to an actor
    ActorRef,
    ActorRecord,
    actor
);

impl<'a> ActorRef<'a> {
    /// Stable identifier, or -1
    pub fn id(&self) -> i32 {
        self.record().map_or(-1, |r| r.id())
    }

    /// Internal name
    pub fn name(&self) -> &'a str {
        self.record().map_or("", |r| r.name())
    }

    /// Display name for the loaded locale
    pub fn localized_name(&self) -> &'a str {
        self.record().map_or("", |r| r.localized_name())
    }

    /// Hex color hint
    pub fn color(&self) -> &'a str {
        self.record().map_or("", |r| r.color())
    }
}

entity_ref!(
    /// Reference to a localized string entry
    LocalizationRef,
    LocalizationRecord,
    localization
);

impl<'a> LocalizationRef<'a> {
    /// Stable identifier, or -1
    pub fn id(&self) -> i32 {
        self.record().map_or(-1, |r| r.id())
    }

    /// Lookup key
    pub fn name(&self) -> &'a str {
        self.record().map_or("", |r| r.name())
    }

    /// Text for the loaded locale
    pub fn text(&self) -> &'a str {
        self.record().map_or("", |r| r.text())
    }
}

entity_ref!(
    /// Reference to a property template
    PropertyTemplateRef,
    PropertyTemplateRecord,
    property_template
);

impl<'a> PropertyTemplateRef<'a> {
    /// Stable identifier, or -1
    pub fn id(&self) -> i32 {
        self.record().map_or(-1, |r| r.id())
    }

    /// Template name
    pub fn name(&self) -> &'a str {
        self.record().map_or("", |r| r.name())
    }

    /// Declared value type
    pub fn property_type(&self) -> PropertyType {
        self.record().map(|r| r.property_type()).unwrap_or_default()
    }
}

entity_ref!(
    /// Reference to a node or conversation property value
    PropertyRef,
    PropertyRecord,
    property
);

impl<'a> PropertyRef<'a> {
    /// Template this value instantiates
    pub fn template(&self) -> PropertyTemplateRef<'a> {
        let index = self.record().map_or(-1, |r| r.template_idx());
        self.database
            .map_or_else(PropertyTemplateRef::invalid, |db| db.property_template(index))
    }

    /// Template name
    pub fn name(&self) -> &'a str {
        self.template().name()
    }

    /// Declared type of the template
    pub fn property_type(&self) -> PropertyType {
        self.template().property_type()
    }

    /// Tagged value
    pub fn value(&self) -> Option<PropertyValue<'a>> {
        self.record().map(|r| r.value())
    }

    /// String value, if this property holds one
    pub fn try_get_string(&self) -> Option<&'a str> {
        match self.value()? {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, if this property holds one
    pub fn try_get_integer(&self) -> Option<i32> {
        match self.value()? {
            PropertyValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// Decimal value, if this property holds one
    pub fn try_get_decimal(&self) -> Option<f32> {
        match self.value()? {
            PropertyValue::Decimal(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean value, if this property holds one
    pub fn try_get_boolean(&self) -> Option<bool> {
        match self.value()? {
            PropertyValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// String value, or `""` on a type mismatch
    pub fn string_value(&self) -> &'a str {
        self.try_get_string().unwrap_or_default()
    }

    /// Integer value, or `0` on a type mismatch
    pub fn integer_value(&self) -> i32 {
        self.try_get_integer().unwrap_or_default()
    }

    /// Decimal value, or `0.0` on a type mismatch
    pub fn decimal_value(&self) -> f32 {
        self.try_get_decimal().unwrap_or_default()
    }

    /// Boolean value, or `false` on a type mismatch
    pub fn boolean_value(&self) -> bool {
        self.try_get_boolean().unwrap_or_default()
    }
}
