//! Snapshot writer
//!
//! `SnapshotBuilder` produces buffers in the `.gsb` layout read by
//! [`Snapshot`](super::format::Snapshot). Entities are added by value and
//! refer to each other by position; derived lists (conversation members,
//! outgoing/incoming edges, root node) are computed in [`SnapshotBuilder::build`].

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;

use super::format::{
    EdgeType, ListRef, NodeType, PropertyType, PropertyValue, SectionKind, StrRef,
    CONVERSATION_FLAG_LAYOUT_AUTO, CONVERSATION_FLAG_LAYOUT_VERTICAL, HEADER_SIZE, MAGIC,
    NODE_FLAG_ACTION, NODE_FLAG_CONDITION, NODE_FLAG_PREVENT_RESPONSE, SECTION_ENTRY_SIZE,
    VERSION_MAJOR, VERSION_MINOR,
};
use super::storage::Storage;

/// Conversation definition
#[derive(Debug, Clone, Default)]
pub struct ConversationSpec {
    /// Stable identifier
    pub id: i32,
    /// Name
    pub name: String,
    /// Author notes
    pub notes: String,
    /// Editor auto-layout hint
    pub layout_auto: bool,
    /// Editor vertical-layout hint
    pub layout_vertical: bool,
}

impl ConversationSpec {
    /// Conversation with an id and a name
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Node definition
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Stable identifier
    pub id: i32,
    /// Owning conversation position
    pub conversation: i32,
    /// Node type
    pub node_type: NodeType,
    /// Speaker position, or -1
    pub actor: i32,
    /// Voice text
    pub voice_text: String,
    /// UI response text
    pub ui_response_text: String,
    /// Author notes
    pub notes: String,
    /// Node declares a condition
    pub has_condition: bool,
    /// Node declares an action
    pub has_action: bool,
    /// Never present a decision when leaving this node
    pub prevent_response: bool,
    /// Editor position
    pub position: (f32, f32),
}

impl NodeSpec {
    /// Node of the given type in `conversation`
    pub fn new(id: i32, conversation: i32, node_type: NodeType) -> Self {
        Self {
            id,
            conversation,
            node_type,
            actor: -1,
            voice_text: String::new(),
            ui_response_text: String::new(),
            notes: String::new(),
            has_condition: false,
            has_action: false,
            prevent_response: false,
            position: (0.0, 0.0),
        }
    }

    /// Root node
    pub fn root(id: i32, conversation: i32) -> Self {
        Self::new(id, conversation, NodeType::Root)
    }

    /// Dialogue node
    pub fn dialogue(id: i32, conversation: i32) -> Self {
        Self::new(id, conversation, NodeType::Dialogue)
    }

    /// Logic node
    pub fn logic(id: i32, conversation: i32) -> Self {
        Self::new(id, conversation, NodeType::Logic)
    }

    /// Set the speaker
    pub fn actor(mut self, actor: i32) -> Self {
        self.actor = actor;
        self
    }

    /// Set the voice text
    pub fn voice(mut self, text: impl Into<String>) -> Self {
        self.voice_text = text.into();
        self
    }

    /// Set the UI response text
    pub fn ui_response(mut self, text: impl Into<String>) -> Self {
        self.ui_response_text = text.into();
        self
    }

    /// Set author notes
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Flag the node as having a condition
    pub fn with_condition(mut self) -> Self {
        self.has_condition = true;
        self
    }

    /// Flag the node as having an action
    pub fn with_action(mut self) -> Self {
        self.has_action = true;
        self
    }

    /// Flag the node as preventing responses
    pub fn prevent_response(mut self) -> Self {
        self.prevent_response = true;
        self
    }

    /// Set the editor position
    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = (x, y);
        self
    }
}

/// Edge definition
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    /// Stable identifier
    pub id: i32,
    /// Source node position
    pub source: i32,
    /// Target node position
    pub target: i32,
    /// Priority (higher is preferred)
    pub priority: i32,
    /// Edge type
    pub edge_type: EdgeType,
}

impl EdgeSpec {
    /// Default-priority edge between two node positions
    pub fn new(id: i32, source: i32, target: i32) -> Self {
        Self {
            id,
            source,
            target,
            priority: 0,
            edge_type: EdgeType::Default,
        }
    }

    /// Set the priority
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as hidden
    pub fn hidden(mut self) -> Self {
        self.edge_type = EdgeType::Hidden;
        self
    }
}

/// Actor definition
#[derive(Debug, Clone, Default)]
pub struct ActorSpec {
    /// Stable identifier
    pub id: i32,
    /// Internal name
    pub name: String,
    /// Display name
    pub localized_name: String,
    /// Hex color
    pub color: String,
}

impl ActorSpec {
    /// Actor whose display name equals its name
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            localized_name: name.clone(),
            name,
            color: "#808080".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum StoredValue {
    String(String),
    Integer(i32),
    Decimal(f32),
    Boolean(bool),
}

impl From<PropertyValue<'_>> for StoredValue {
    fn from(value: PropertyValue<'_>) -> Self {
        match value {
            PropertyValue::String(s) => StoredValue::String(s.to_string()),
            PropertyValue::Integer(v) => StoredValue::Integer(v),
            PropertyValue::Decimal(v) => StoredValue::Decimal(v),
            PropertyValue::Boolean(v) => StoredValue::Boolean(v),
        }
    }
}

#[derive(Debug, Clone)]
struct Localization {
    id: i32,
    name: String,
    text: String,
}

#[derive(Debug, Clone)]
struct PropertyTemplate {
    id: i32,
    name: String,
    property_type: PropertyType,
}

fn push_list(indices: &mut Vec<i32>, items: Vec<i32>) -> ListRef {
    let list = ListRef {
        start: indices.len() as u32,
        len: items.len() as u32,
    };
    indices.extend(items);
    list
}

#[derive(Default)]
struct StringTable {
    bytes: Vec<u8>,
    interned: HashMap<String, StrRef>,
}

impl StringTable {
    fn intern(&mut self, s: &str) -> StrRef {
        if let Some(r) = self.interned.get(s) {
            return *r;
        }
        let r = StrRef {
            offset: self.bytes.len() as u32,
            len: s.len() as u32,
        };
        self.bytes.extend_from_slice(s.as_bytes());
        self.interned.insert(s.to_string(), r);
        r
    }
}

struct RecordWriter {
    bytes: Vec<u8>,
}

impl RecordWriter {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn f32(&mut self, v: f32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    fn pad(&mut self, n: usize) -> &mut Self {
        self.bytes.extend(std::iter::repeat_n(0u8, n));
        self
    }

    fn str(&mut self, r: StrRef) -> &mut Self {
        self.u32(r.offset).u32(r.len)
    }

    fn list(&mut self, r: ListRef) -> &mut Self {
        self.u32(r.start).u32(r.len)
    }
}

/// Writer for `.gsb` snapshot buffers
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    locale_id: i32,
    locale_name: String,
    conversations: Vec<ConversationSpec>,
    conversation_properties: Vec<Vec<(i32, StoredValue)>>,
    nodes: Vec<NodeSpec>,
    node_properties: Vec<Vec<(i32, StoredValue)>>,
    edges: Vec<EdgeSpec>,
    actors: Vec<ActorSpec>,
    localizations: Vec<Localization>,
    templates: Vec<PropertyTemplate>,
}

impl SnapshotBuilder {
    /// Builder for one locale
    pub fn new(locale_id: i32, locale_name: impl Into<String>) -> Self {
        Self {
            locale_id,
            locale_name: locale_name.into(),
            ..Self::default()
        }
    }

    /// Add a conversation, returning its position
    pub fn add_conversation(&mut self, spec: ConversationSpec) -> i32 {
        self.conversations.push(spec);
        self.conversation_properties.push(Vec::new());
        self.conversations.len() as i32 - 1
    }

    /// Add a node, returning its position
    pub fn add_node(&mut self, spec: NodeSpec) -> i32 {
        self.nodes.push(spec);
        self.node_properties.push(Vec::new());
        self.nodes.len() as i32 - 1
    }

    /// Add an edge, returning its position
    pub fn add_edge(&mut self, spec: EdgeSpec) -> i32 {
        self.edges.push(spec);
        self.edges.len() as i32 - 1
    }

    /// Add an actor, returning its position
    pub fn add_actor(&mut self, spec: ActorSpec) -> i32 {
        self.actors.push(spec);
        self.actors.len() as i32 - 1
    }

    /// Add a localization entry, returning its position
    pub fn add_localization(&mut self, id: i32, name: impl Into<String>, text: impl Into<String>) -> i32 {
        self.localizations.push(Localization {
            id,
            name: name.into(),
            text: text.into(),
        });
        self.localizations.len() as i32 - 1
    }

    /// Add a property template, returning its position
    pub fn add_property_template(
        &mut self,
        id: i32,
        name: impl Into<String>,
        property_type: PropertyType,
    ) -> i32 {
        self.templates.push(PropertyTemplate {
            id,
            name: name.into(),
            property_type,
        });
        self.templates.len() as i32 - 1
    }

    /// Attach a property to a node; unknown node positions are ignored
    pub fn add_node_property(&mut self, node: i32, template: i32, value: PropertyValue<'_>) {
        if let Some(props) = usize::try_from(node).ok().and_then(|i| self.node_properties.get_mut(i)) {
            props.push((template, value.into()));
        }
    }

    /// Attach a property to a conversation; unknown positions are ignored
    pub fn add_conversation_property(
        &mut self,
        conversation: i32,
        template: i32,
        value: PropertyValue<'_>,
    ) {
        if let Some(props) = usize::try_from(conversation)
            .ok()
            .and_then(|i| self.conversation_properties.get_mut(i))
        {
            props.push((template, value.into()));
        }
    }

    /// Number of nodes added so far
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_conversation(&self, node: i32) -> i32 {
        usize::try_from(node)
            .ok()
            .and_then(|i| self.nodes.get(i))
            .map(|n| n.conversation)
            .unwrap_or(-1)
    }

    /// Serialize into a snapshot buffer
    pub fn build(&self) -> Vec<u8> {
        let mut strings = StringTable::default();
        let mut indices: Vec<i32> = Vec::new();
        let mut properties = RecordWriter::new();
        let mut property_count: u32 = 0;

        let mut push_properties =
            |strings: &mut StringTable, props: &[(i32, StoredValue)]| -> ListRef {
                let list = ListRef {
                    start: property_count,
                    len: props.len() as u32,
                };
                for (template, value) in props {
                    properties.i32(*template);
                    match value {
                        StoredValue::String(s) => {
                            let r = strings.intern(s);
                            properties.u8(PropertyType::String.tag()).pad(3).str(r);
                        }
                        StoredValue::Integer(v) => {
                            properties.u8(PropertyType::Integer.tag()).pad(3).i32(*v).pad(4);
                        }
                        StoredValue::Decimal(v) => {
                            properties.u8(PropertyType::Decimal.tag()).pad(3).f32(*v).pad(4);
                        }
                        StoredValue::Boolean(v) => {
                            properties.u8(PropertyType::Boolean.tag()).pad(3).u8(*v as u8).pad(7);
                        }
                    }
                    property_count += 1;
                }
                list
            };

        let locale_name = strings.intern(&self.locale_name);

        let mut conversations = RecordWriter::new();
        for (idx, conv) in self.conversations.iter().enumerate() {
            let idx = idx as i32;
            let members: Vec<i32> = (0..self.nodes.len() as i32)
                .filter(|n| self.nodes[*n as usize].conversation == idx)
                .collect();
            let root = members
                .iter()
                .copied()
                .find(|n| self.nodes[*n as usize].node_type == NodeType::Root)
                .unwrap_or(-1);
            let edges: Vec<i32> = (0..self.edges.len() as i32)
                .filter(|e| self.node_conversation(self.edges[*e as usize].source) == idx)
                .collect();

            let mut flags = 0;
            if conv.layout_auto {
                flags |= CONVERSATION_FLAG_LAYOUT_AUTO;
            }
            if conv.layout_vertical {
                flags |= CONVERSATION_FLAG_LAYOUT_VERTICAL;
            }

            let name = strings.intern(&conv.name);
            let notes = strings.intern(&conv.notes);
            let nodes_list = push_list(&mut indices, members);
            let edges_list = push_list(&mut indices, edges);
            let props = push_properties(&mut strings, &self.conversation_properties[idx as usize]);

            conversations
                .i32(conv.id)
                .str(name)
                .str(notes)
                .u32(flags)
                .i32(root)
                .list(nodes_list)
                .list(edges_list)
                .list(props);
        }

        let mut nodes = RecordWriter::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            let idx = idx as i32;
            let mut outgoing: Vec<i32> = (0..self.edges.len() as i32)
                .filter(|e| self.edges[*e as usize].source == idx)
                .collect();
            // stable: equal priorities keep insertion order
            outgoing.sort_by_key(|e| std::cmp::Reverse(self.edges[*e as usize].priority));
            let incoming: Vec<i32> = (0..self.edges.len() as i32)
                .filter(|e| self.edges[*e as usize].target == idx)
                .collect();

            let mut flags = 0;
            if node.has_condition {
                flags |= NODE_FLAG_CONDITION;
            }
            if node.has_action {
                flags |= NODE_FLAG_ACTION;
            }
            if node.prevent_response {
                flags |= NODE_FLAG_PREVENT_RESPONSE;
            }

            let voice = strings.intern(&node.voice_text);
            let ui = strings.intern(&node.ui_response_text);
            let notes = strings.intern(&node.notes);
            let outgoing = push_list(&mut indices, outgoing);
            let incoming = push_list(&mut indices, incoming);
            let props = push_properties(&mut strings, &self.node_properties[idx as usize]);

            nodes
                .i32(node.id)
                .i32(node.conversation)
                .i32(node.actor)
                .u8(node.node_type.tag())
                .u8(flags)
                .pad(2)
                .str(voice)
                .str(ui)
                .str(notes)
                .f32(node.position.0)
                .f32(node.position.1)
                .list(outgoing)
                .list(incoming)
                .list(props);
        }

        let mut edges = RecordWriter::new();
        for edge in &self.edges {
            edges
                .i32(edge.id)
                .i32(self.node_conversation(edge.source))
                .i32(edge.source)
                .i32(edge.target)
                .i32(edge.priority)
                .u8(edge.edge_type.tag())
                .pad(3);
        }

        let mut actors = RecordWriter::new();
        for actor in &self.actors {
            let name = strings.intern(&actor.name);
            let localized = strings.intern(&actor.localized_name);
            let color = strings.intern(&actor.color);
            actors.i32(actor.id).str(name).str(localized).str(color);
        }

        let mut localizations = RecordWriter::new();
        for loc in &self.localizations {
            let name = strings.intern(&loc.name);
            let text = strings.intern(&loc.text);
            localizations.i32(loc.id).str(name).str(text);
        }

        let mut templates = RecordWriter::new();
        for template in &self.templates {
            let name = strings.intern(&template.name);
            templates
                .i32(template.id)
                .str(name)
                .u8(template.property_type.tag())
                .pad(3);
        }

        let mut index_pool = RecordWriter::new();
        for i in &indices {
            index_pool.i32(*i);
        }

        let sections: [(SectionKind, usize, Vec<u8>); 9] = [
            (SectionKind::Conversations, self.conversations.len(), conversations.bytes),
            (SectionKind::Nodes, self.nodes.len(), nodes.bytes),
            (SectionKind::Edges, self.edges.len(), edges.bytes),
            (SectionKind::Actors, self.actors.len(), actors.bytes),
            (SectionKind::Localizations, self.localizations.len(), localizations.bytes),
            (SectionKind::PropertyTemplates, self.templates.len(), templates.bytes),
            (SectionKind::Properties, property_count as usize, properties.bytes),
            (SectionKind::Indices, indices.len(), index_pool.bytes),
            (SectionKind::Strings, strings.bytes.len(), strings.bytes),
        ];

        let mut header = RecordWriter::new();
        header.bytes.extend_from_slice(&MAGIC);
        header.bytes.extend_from_slice(&VERSION_MAJOR.to_le_bytes());
        header.bytes.extend_from_slice(&VERSION_MINOR.to_le_bytes());
        header
            .i32(self.locale_id)
            .str(locale_name)
            .u32(sections.len() as u32)
            .pad(8);

        let mut offset = HEADER_SIZE + sections.len() * SECTION_ENTRY_SIZE;
        for (kind, count, bytes) in &sections {
            header
                .u32(*kind as u32)
                .u32(offset as u32)
                .u32(*count as u32)
                .u32(kind.record_size());
            offset += bytes.len();
        }

        let mut out = header.bytes;
        for (_, _, bytes) in sections {
            out.extend(bytes);
        }
        out
    }

    /// Serialize and write atomically to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let storage = Storage::new(path.parent().map(Path::to_path_buf).unwrap_or_default());
        storage.write_atomic(path, &self.build())
    }
}
