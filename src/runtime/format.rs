//! Binary snapshot format (`.gsb`)
//!
//! A snapshot is a flat little-endian buffer: a fixed header, a section
//! directory, then one contiguous region per section. Records are read in
//! place; nothing is decoded up front. [`Snapshot::from_bytes`] verifies the
//! whole buffer (ranges, strings, enum tags, cross-references) so that the
//! typed views below never read outside their section.
//!
//! ```text
//! header    32 bytes   magic "GSNP", u16 major, u16 minor, i32 locale id,
//!                      str locale name, u32 section count, 8 reserved
//! directory 16 bytes   per section: u32 kind, u32 offset, u32 count, u32 stride
//! ```
//!
//! A `str` is `(u32 offset, u32 len)` into the string blob. A `list` is
//! `(u32 start, u32 len)` into the index pool (or the property section for
//! property lists).

use serde::{Deserialize, Serialize};

use super::error::{FormatError, FormatResult};

/// Magic bytes at the start of every snapshot
pub const MAGIC: [u8; 4] = *b"GSNP";
/// Major version written and accepted by this runtime
pub const VERSION_MAJOR: u16 = 1;
/// Minor version written by this runtime (any minor is accepted)
pub const VERSION_MINOR: u16 = 0;
/// Size of the fixed header
pub const HEADER_SIZE: usize = 32;
/// Size of one section directory entry
pub const SECTION_ENTRY_SIZE: usize = 16;

/// Section kinds in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionKind {
    /// Conversation records
    Conversations = 1,
    /// Node records
    Nodes = 2,
    /// Edge records
    Edges = 3,
    /// Actor records
    Actors = 4,
    /// Localization records
    Localizations = 5,
    /// Property template records
    PropertyTemplates = 6,
    /// Property value records
    Properties = 7,
    /// Shared `i32` index pool
    Indices = 8,
    /// UTF-8 string blob
    Strings = 9,
}

impl SectionKind {
    /// Every known kind, in directory order
    pub const ALL: [SectionKind; 9] = [
        SectionKind::Conversations,
        SectionKind::Nodes,
        SectionKind::Edges,
        SectionKind::Actors,
        SectionKind::Localizations,
        SectionKind::PropertyTemplates,
        SectionKind::Properties,
        SectionKind::Indices,
        SectionKind::Strings,
    ];

    /// Parse a raw kind; unknown kinds return `None`
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as u32 == raw)
    }

    /// Record size this runtime reads (the stored stride may be larger)
    pub fn record_size(self) -> u32 {
        match self {
            SectionKind::Conversations => CONVERSATION_SIZE,
            SectionKind::Nodes => NODE_SIZE,
            SectionKind::Edges => EDGE_SIZE,
            SectionKind::Actors => ACTOR_SIZE,
            SectionKind::Localizations => LOCALIZATION_SIZE,
            SectionKind::PropertyTemplates => PROPERTY_TEMPLATE_SIZE,
            SectionKind::Properties => PROPERTY_SIZE,
            SectionKind::Indices => 4,
            SectionKind::Strings => 1,
        }
    }

    fn slot(self) -> usize {
        self as usize - 1
    }
}

pub(crate) const CONVERSATION_SIZE: u32 = 52;
pub(crate) const NODE_SIZE: u32 = 72;
pub(crate) const EDGE_SIZE: u32 = 24;
pub(crate) const ACTOR_SIZE: u32 = 28;
pub(crate) const LOCALIZATION_SIZE: u32 = 20;
pub(crate) const PROPERTY_TEMPLATE_SIZE: u32 = 16;
pub(crate) const PROPERTY_SIZE: u32 = 16;

pub(crate) const NODE_FLAG_CONDITION: u8 = 1 << 0;
pub(crate) const NODE_FLAG_ACTION: u8 = 1 << 1;
pub(crate) const NODE_FLAG_PREVENT_RESPONSE: u8 = 1 << 2;

pub(crate) const CONVERSATION_FLAG_LAYOUT_AUTO: u32 = 1 << 0;
pub(crate) const CONVERSATION_FLAG_LAYOUT_VERTICAL: u32 = 1 << 1;

/// Node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeType {
    /// Conversation entry point; never spoken
    #[default]
    Root,
    /// Spoken line
    Dialogue,
    /// Silent branching/action node
    Logic,
}

impl NodeType {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(NodeType::Root),
            1 => Some(NodeType::Dialogue),
            2 => Some(NodeType::Logic),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            NodeType::Root => 0,
            NodeType::Dialogue => 1,
            NodeType::Logic => 2,
        }
    }
}

/// Edge kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EdgeType {
    /// Regular transition
    #[default]
    Default,
    /// Transition hidden in the editor graph
    Hidden,
}

impl EdgeType {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EdgeType::Default),
            1 => Some(EdgeType::Hidden),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            EdgeType::Default => 0,
            EdgeType::Hidden => 1,
        }
    }
}

/// Declared type of a property template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PropertyType {
    /// UTF-8 string
    #[default]
    String,
    /// 32-bit signed integer
    Integer,
    /// 32-bit float
    Decimal,
    /// Boolean
    Boolean,
}

impl PropertyType {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PropertyType::String),
            1 => Some(PropertyType::Integer),
            2 => Some(PropertyType::Decimal),
            3 => Some(PropertyType::Boolean),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            PropertyType::String => 0,
            PropertyType::Integer => 1,
            PropertyType::Decimal => 2,
            PropertyType::Boolean => 3,
        }
    }
}

/// A tagged property value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue<'a> {
    /// String value
    String(&'a str),
    /// Integer value
    Integer(i32),
    /// Decimal value
    Decimal(f32),
    /// Boolean value
    Boolean(bool),
}

impl PropertyValue<'_> {
    /// Type tag of this value
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Integer(_) => PropertyType::Integer,
            PropertyValue::Decimal(_) => PropertyType::Decimal,
            PropertyValue::Boolean(_) => PropertyType::Boolean,
        }
    }
}

/// `(offset, len)` into the string blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrRef {
    /// Byte offset within the blob
    pub offset: u32,
    /// Byte length
    pub len: u32,
}

/// `(start, len)` into the index pool or property section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListRef {
    /// First element
    pub start: u32,
    /// Number of elements
    pub len: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Section {
    offset: usize,
    count: usize,
    stride: usize,
}

fn u8_at(bytes: &[u8], at: usize) -> Option<u8> {
    bytes.get(at).copied()
}

fn u16_at(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at.checked_add(2)?)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at.checked_add(4)?)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// A verified snapshot buffer
#[derive(Clone)]
pub struct Snapshot {
    bytes: Vec<u8>,
    sections: [Section; 9],
    version: (u16, u16),
    locale_id: i32,
    locale_name: StrRef,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("len", &self.bytes.len())
            .field("version", &self.version)
            .field("locale_id", &self.locale_id)
            .field("conversations", &self.count(SectionKind::Conversations))
            .field("nodes", &self.count(SectionKind::Nodes))
            .field("edges", &self.count(SectionKind::Edges))
            .finish()
    }
}

impl Snapshot {
    /// Verify `bytes` and take ownership of them
    pub fn from_bytes(bytes: Vec<u8>) -> FormatResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::TooSmall { len: bytes.len() });
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic));
        }

        let major = u16_at(&bytes, 4).unwrap_or(0);
        let minor = u16_at(&bytes, 6).unwrap_or(0);
        if major != VERSION_MAJOR {
            return Err(FormatError::UnsupportedVersion { major, minor });
        }

        let locale_id = u32_at(&bytes, 8).unwrap_or(0) as i32;
        let locale_name = StrRef {
            offset: u32_at(&bytes, 12).unwrap_or(0),
            len: u32_at(&bytes, 16).unwrap_or(0),
        };
        let section_count = u32_at(&bytes, 20).unwrap_or(0) as usize;

        let directory_len = section_count
            .checked_mul(SECTION_ENTRY_SIZE)
            .filter(|len| HEADER_SIZE + len <= bytes.len())
            .ok_or(FormatError::OutOfBounds {
                what: "section directory",
                offset: HEADER_SIZE,
                len: section_count.saturating_mul(SECTION_ENTRY_SIZE),
            })?;

        let mut sections = [Section::default(); 9];
        let mut seen = [false; 9];

        for entry in (HEADER_SIZE..HEADER_SIZE + directory_len).step_by(SECTION_ENTRY_SIZE) {
            let raw_kind = u32_at(&bytes, entry).unwrap_or(0);
            let offset = u32_at(&bytes, entry + 4).unwrap_or(0) as usize;
            let count = u32_at(&bytes, entry + 8).unwrap_or(0) as usize;
            let stride = u32_at(&bytes, entry + 12).unwrap_or(0);

            let Some(kind) = SectionKind::from_raw(raw_kind) else {
                tracing::debug!(kind = raw_kind, "Skipping unknown snapshot section");
                continue;
            };

            if seen[kind.slot()] {
                return Err(FormatError::DuplicateSection(raw_kind));
            }
            seen[kind.slot()] = true;

            let expected = kind.record_size();
            let stride_ok = match kind {
                SectionKind::Strings => stride == 1,
                _ => stride >= expected,
            };
            if !stride_ok {
                return Err(FormatError::BadStride { kind: raw_kind, stride, expected });
            }

            let len = count.checked_mul(stride as usize);
            let in_bounds = len
                .and_then(|len| offset.checked_add(len))
                .is_some_and(|end| end <= bytes.len());
            if !in_bounds {
                return Err(FormatError::OutOfBounds {
                    what: "section",
                    offset,
                    len: len.unwrap_or(usize::MAX),
                });
            }

            sections[kind.slot()] = Section { offset, count, stride: stride as usize };
        }

        let snapshot = Self {
            bytes,
            sections,
            version: (major, minor),
            locale_id,
            locale_name,
        };
        snapshot.verify_records()?;
        Ok(snapshot)
    }

    /// Raw buffer
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `(major, minor)` version from the header
    pub fn version(&self) -> (u16, u16) {
        self.version
    }

    /// Locale id recorded in the header
    pub fn locale_id(&self) -> i32 {
        self.locale_id
    }

    /// Locale name recorded in the header
    pub fn locale_name(&self) -> &str {
        self.str(self.locale_name)
    }

    /// Number of elements in a section (0 when absent)
    pub fn count(&self, kind: SectionKind) -> usize {
        self.sections[kind.slot()].count
    }

    fn record(&self, kind: SectionKind, index: i32) -> Option<&[u8]> {
        let section = self.sections[kind.slot()];
        let index = usize::try_from(index).ok().filter(|i| *i < section.count)?;
        let start = section.offset + index * section.stride;
        self.bytes.get(start..start + section.stride)
    }

    /// Resolve a string reference; invalid references yield `""`
    pub fn str(&self, r: StrRef) -> &str {
        let strings = self.sections[SectionKind::Strings.slot()];
        let start = r.offset as usize;
        let end = start.saturating_add(r.len as usize);
        if end > strings.count {
            return "";
        }
        self.bytes
            .get(strings.offset + start..strings.offset + end)
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or("")
    }

    /// Element `i` of an index list
    pub fn list_item(&self, list: ListRef, i: usize) -> Option<i32> {
        if i >= list.len as usize {
            return None;
        }
        let index = i32::try_from(list.start as usize + i).ok()?;
        self.record(SectionKind::Indices, index)
            .and_then(|rec| u32_at(rec, 0))
            .map(|v| v as i32)
    }

    /// Conversation record at `index`
    pub fn conversation(&self, index: i32) -> Option<ConversationRecord<'_>> {
        self.view(SectionKind::Conversations, index).map(ConversationRecord)
    }

    /// Node record at `index`
    pub fn node(&self, index: i32) -> Option<NodeRecord<'_>> {
        self.view(SectionKind::Nodes, index).map(NodeRecord)
    }

    /// Edge record at `index`
    pub fn edge(&self, index: i32) -> Option<EdgeRecord<'_>> {
        self.view(SectionKind::Edges, index).map(EdgeRecord)
    }

    /// Actor record at `index`
    pub fn actor(&self, index: i32) -> Option<ActorRecord<'_>> {
        self.view(SectionKind::Actors, index).map(ActorRecord)
    }

    /// Localization record at `index`
    pub fn localization(&self, index: i32) -> Option<LocalizationRecord<'_>> {
        self.view(SectionKind::Localizations, index).map(LocalizationRecord)
    }

    /// Property template record at `index`
    pub fn property_template(&self, index: i32) -> Option<PropertyTemplateRecord<'_>> {
        self.view(SectionKind::PropertyTemplates, index).map(PropertyTemplateRecord)
    }

    /// Property record at `index`
    pub fn property(&self, index: i32) -> Option<PropertyRecord<'_>> {
        self.view(SectionKind::Properties, index).map(PropertyRecord)
    }

    fn view(&self, kind: SectionKind, index: i32) -> Option<Record<'_>> {
        self.record(kind, index).map(|bytes| Record { snapshot: self, bytes })
    }

    fn verify_records(&self) -> FormatResult<()> {
        let nodes = self.count(SectionKind::Nodes);
        let edges = self.count(SectionKind::Edges);
        let actors = self.count(SectionKind::Actors);
        let templates = self.count(SectionKind::PropertyTemplates);
        let properties = self.count(SectionKind::Properties);

        self.check_str("locale name", self.locale_name)?;

        for i in 0..self.count(SectionKind::Conversations) {
            let Some(conv) = self.conversation(i as i32) else { continue };
            let rec = conv.0;
            self.check_str("conversation name", rec.str_ref(4))?;
            self.check_str("conversation notes", rec.str_ref(12))?;
            check_index("conversation root node", conv.root_node_idx(), nodes, true)?;
            self.check_list("conversation nodes", conv.nodes(), nodes)?;
            self.check_list("conversation edges", conv.edges(), edges)?;
            check_range("conversation properties", conv.properties(), properties)?;
        }

        for i in 0..nodes {
            let Some(node) = self.node(i as i32) else { continue };
            let rec = node.0;
            check_index(
                "node conversation",
                node.conversation_idx(),
                self.count(SectionKind::Conversations),
                false,
            )?;
            check_index("node actor", node.actor_idx(), actors, true)?;
            let tag = rec.u8(12);
            if NodeType::from_tag(tag).is_none() {
                return Err(FormatError::InvalidTag { what: "node type", value: tag });
            }
            self.check_str("node voice text", rec.str_ref(16))?;
            self.check_str("node ui response text", rec.str_ref(24))?;
            self.check_str("node notes", rec.str_ref(32))?;
            self.check_list("node outgoing edges", node.outgoing_edges(), edges)?;
            self.check_list("node incoming edges", node.incoming_edges(), edges)?;
            check_range("node properties", node.properties(), properties)?;
        }

        for i in 0..edges {
            let Some(edge) = self.edge(i as i32) else { continue };
            check_index(
                "edge conversation",
                edge.conversation_idx(),
                self.count(SectionKind::Conversations),
                false,
            )?;
            check_index("edge source", edge.source_idx(), nodes, false)?;
            check_index("edge target", edge.target_idx(), nodes, false)?;
            let tag = edge.0.u8(20);
            if EdgeType::from_tag(tag).is_none() {
                return Err(FormatError::InvalidTag { what: "edge type", value: tag });
            }
        }

        for i in 0..actors {
            let Some(actor) = self.actor(i as i32) else { continue };
            self.check_str("actor name", actor.0.str_ref(4))?;
            self.check_str("actor localized name", actor.0.str_ref(12))?;
            self.check_str("actor color", actor.0.str_ref(20))?;
        }

        for i in 0..self.count(SectionKind::Localizations) {
            let Some(loc) = self.localization(i as i32) else { continue };
            self.check_str("localization name", loc.0.str_ref(4))?;
            self.check_str("localization text", loc.0.str_ref(12))?;
        }

        for i in 0..templates {
            let Some(template) = self.property_template(i as i32) else { continue };
            self.check_str("property template name", template.0.str_ref(4))?;
            let tag = template.0.u8(12);
            if PropertyType::from_tag(tag).is_none() {
                return Err(FormatError::InvalidTag { what: "property template type", value: tag });
            }
        }

        for i in 0..properties {
            let Some(property) = self.property(i as i32) else { continue };
            check_index("property template", property.template_idx(), templates, false)?;
            let tag = property.0.u8(4);
            match PropertyType::from_tag(tag) {
                Some(PropertyType::String) => {
                    self.check_str("property value", property.0.str_ref(8))?
                }
                Some(_) => {}
                None => return Err(FormatError::InvalidTag { what: "property value", value: tag }),
            }
        }

        Ok(())
    }

    fn check_str(&self, what: &'static str, r: StrRef) -> FormatResult<()> {
        let strings = self.sections[SectionKind::Strings.slot()];
        let start = r.offset as usize;
        let end = start
            .checked_add(r.len as usize)
            .filter(|end| *end <= strings.count)
            .ok_or(FormatError::OutOfBounds { what, offset: start, len: r.len as usize })?;

        let bytes = self
            .bytes
            .get(strings.offset + start..strings.offset + end)
            .ok_or(FormatError::OutOfBounds { what, offset: start, len: r.len as usize })?;

        std::str::from_utf8(bytes)
            .map(|_| ())
            .map_err(|_| FormatError::InvalidUtf8(what))
    }

    fn check_list(&self, what: &'static str, list: ListRef, target_len: usize) -> FormatResult<()> {
        check_range(what, list, self.count(SectionKind::Indices))?;
        for i in 0..list.len as usize {
            let item = self.list_item(list, i).unwrap_or(-1);
            check_index(what, item, target_len, false)?;
        }
        Ok(())
    }
}

fn check_index(what: &'static str, index: i32, len: usize, allow_none: bool) -> FormatResult<()> {
    if allow_none && index == -1 {
        return Ok(());
    }
    if index < 0 || index as usize >= len {
        return Err(FormatError::IndexOutOfRange { what, index: index as i64, len });
    }
    Ok(())
}

fn check_range(what: &'static str, list: ListRef, len: usize) -> FormatResult<()> {
    let end = (list.start as usize).checked_add(list.len as usize);
    if end.is_none_or(|end| end > len) {
        return Err(FormatError::OutOfBounds {
            what,
            offset: list.start as usize,
            len: list.len as usize,
        });
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct Record<'a> {
    snapshot: &'a Snapshot,
    bytes: &'a [u8],
}

impl<'a> Record<'a> {
    fn u8(&self, at: usize) -> u8 {
        u8_at(self.bytes, at).unwrap_or(0)
    }

    fn u32(&self, at: usize) -> u32 {
        u32_at(self.bytes, at).unwrap_or(0)
    }

    fn i32(&self, at: usize) -> i32 {
        self.u32(at) as i32
    }

    fn f32(&self, at: usize) -> f32 {
        f32::from_bits(self.u32(at))
    }

    fn str_ref(&self, at: usize) -> StrRef {
        StrRef { offset: self.u32(at), len: self.u32(at + 4) }
    }

    fn str(&self, at: usize) -> &'a str {
        self.snapshot.str(self.str_ref(at))
    }

    fn list(&self, at: usize) -> ListRef {
        ListRef { start: self.u32(at), len: self.u32(at + 4) }
    }
}

/// Conversation record view
#[derive(Clone, Copy)]
pub struct ConversationRecord<'a>(Record<'a>);

impl<'a> ConversationRecord<'a> {
    /// Stable identifier
    pub fn id(&self) -> i32 {
        self.0.i32(0)
    }

    /// Name
    pub fn name(&self) -> &'a str {
        self.0.str(4)
    }

    /// Author notes
    pub fn notes(&self) -> &'a str {
        self.0.str(12)
    }

    /// Raw layout flags
    pub fn flags(&self) -> u32 {
        self.0.u32(20)
    }

    /// Root node position, or -1
    pub fn root_node_idx(&self) -> i32 {
        self.0.i32(24)
    }

    /// Member node positions
    pub fn nodes(&self) -> ListRef {
        self.0.list(28)
    }

    /// Member edge positions
    pub fn edges(&self) -> ListRef {
        self.0.list(36)
    }

    /// Property range
    pub fn properties(&self) -> ListRef {
        self.0.list(44)
    }
}

/// Node record view
#[derive(Clone, Copy)]
pub struct NodeRecord<'a>(Record<'a>);

impl<'a> NodeRecord<'a> {
    /// Stable identifier
    pub fn id(&self) -> i32 {
        self.0.i32(0)
    }

    /// Owning conversation position
    pub fn conversation_idx(&self) -> i32 {
        self.0.i32(4)
    }

    /// Speaker position, or -1
    pub fn actor_idx(&self) -> i32 {
        self.0.i32(8)
    }

    /// Node type
    pub fn node_type(&self) -> NodeType {
        NodeType::from_tag(self.0.u8(12)).unwrap_or_default()
    }

    /// Raw flag byte
    pub fn flags(&self) -> u8 {
        self.0.u8(13)
    }

    /// Voice text
    pub fn voice_text(&self) -> &'a str {
        self.0.str(16)
    }

    /// UI response text
    pub fn ui_response_text(&self) -> &'a str {
        self.0.str(24)
    }

    /// Author notes
    pub fn notes(&self) -> &'a str {
        self.0.str(32)
    }

    /// Editor position
    pub fn position(&self) -> (f32, f32) {
        (self.0.f32(40), self.0.f32(44))
    }

    /// Outgoing edge positions, sorted by descending priority
    pub fn outgoing_edges(&self) -> ListRef {
        self.0.list(48)
    }

    /// Incoming edge positions
    pub fn incoming_edges(&self) -> ListRef {
        self.0.list(56)
    }

    /// Property range
    pub fn properties(&self) -> ListRef {
        self.0.list(64)
    }
}

/// Edge record view
#[derive(Clone, Copy)]
pub struct EdgeRecord<'a>(Record<'a>);

impl EdgeRecord<'_> {
    /// Stable identifier
    pub fn id(&self) -> i32 {
        self.0.i32(0)
    }

    /// Owning conversation position
    pub fn conversation_idx(&self) -> i32 {
        self.0.i32(4)
    }

    /// Source node position
    pub fn source_idx(&self) -> i32 {
        self.0.i32(8)
    }

    /// Target node position
    pub fn target_idx(&self) -> i32 {
        self.0.i32(12)
    }

    /// Priority (higher is preferred)
    pub fn priority(&self) -> i32 {
        self.0.i32(16)
    }

    /// Edge type
    pub fn edge_type(&self) -> EdgeType {
        EdgeType::from_tag(self.0.u8(20)).unwrap_or_default()
    }
}

/// Actor record view
#[derive(Clone, Copy)]
pub struct ActorRecord<'a>(Record<'a>);

impl<'a> ActorRecord<'a> {
    /// Stable identifier
    pub fn id(&self) -> i32 {
        self.0.i32(0)
    }

    /// Internal name
    pub fn name(&self) -> &'a str {
        self.0.str(4)
    }

    /// Display name for the loaded locale
    pub fn localized_name(&self) -> &'a str {
        self.0.str(12)
    }

    /// Hex color hint
    pub fn color(&self) -> &'a str {
        self.0.str(20)
    }
}

/// Localization record view
#[derive(Clone, Copy)]
pub struct LocalizationRecord<'a>(Record<'a>);

impl<'a> LocalizationRecord<'a> {
    /// Stable identifier
    pub fn id(&self) -> i32 {
        self.0.i32(0)
    }

    /// Lookup key
    pub fn name(&self) -> &'a str {
        self.0.str(4)
    }

    /// Text for the loaded locale
    pub fn text(&self) -> &'a str {
        self.0.str(12)
    }
}

/// Property template record view
#[derive(Clone, Copy)]
pub struct PropertyTemplateRecord<'a>(Record<'a>);

impl<'a> PropertyTemplateRecord<'a> {
    /// Stable identifier
    pub fn id(&self) -> i32 {
        self.0.i32(0)
    }

    /// Template name
    pub fn name(&self) -> &'a str {
        self.0.str(4)
    }

    /// Declared value type
    pub fn property_type(&self) -> PropertyType {
        PropertyType::from_tag(self.0.u8(12)).unwrap_or_default()
    }
}

/// Property record view
#[derive(Clone, Copy)]
pub struct PropertyRecord<'a>(Record<'a>);

impl<'a> PropertyRecord<'a> {
    /// Template position
    pub fn template_idx(&self) -> i32 {
        self.0.i32(0)
    }

    /// Tagged value
    pub fn value(&self) -> PropertyValue<'a> {
        match PropertyType::from_tag(self.0.u8(4)).unwrap_or_default() {
            PropertyType::String => PropertyValue::String(self.0.str(8)),
            PropertyType::Integer => PropertyValue::Integer(self.0.i32(8)),
            PropertyType::Decimal => PropertyValue::Decimal(self.0.f32(8)),
            PropertyType::Boolean => PropertyValue::Boolean(self.0.u8(8) != 0),
        }
    }
}
