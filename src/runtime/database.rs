//! Snapshot store
//!
//! Owns the verified buffer for one locale and the identifier→position maps
//! derived from it. Loading is all-or-nothing: a buffer that fails
//! verification leaves the previous snapshot and maps untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{DatabaseError, DatabaseResult};
use super::format::{SectionKind, Snapshot};
use super::manifest::{Locale, Manifest};
use super::refs::{
    ActorRef, ConversationRef, EdgeRef, LocalizationRef, NodeRef, PropertyTemplateRef,
};
use super::storage::Storage;

#[derive(Debug, Default)]
struct IdMaps {
    conversations: HashMap<i32, i32>,
    nodes: HashMap<i32, i32>,
    edges: HashMap<i32, i32>,
    actors: HashMap<i32, i32>,
    localizations: HashMap<i32, i32>,
    property_templates: HashMap<i32, i32>,
}

impl IdMaps {
    fn clear(&mut self) {
        self.conversations.clear();
        self.nodes.clear();
        self.edges.clear();
        self.actors.clear();
        self.localizations.clear();
        self.property_templates.clear();
    }

    fn rebuild(&mut self, snapshot: &Snapshot) {
        self.clear();

        fn fill(map: &mut HashMap<i32, i32>, count: usize, id_at: impl Fn(i32) -> Option<i32>) {
            map.reserve(count);
            for index in 0..count as i32 {
                if let Some(id) = id_at(index) {
                    if let Some(previous) = map.insert(id, index) {
                        tracing::warn!(id, previous, index, "Duplicate identifier in snapshot");
                    }
                }
            }
        }

        fill(&mut self.conversations, snapshot.count(SectionKind::Conversations), |i| {
            snapshot.conversation(i).map(|r| r.id())
        });
        fill(&mut self.nodes, snapshot.count(SectionKind::Nodes), |i| {
            snapshot.node(i).map(|r| r.id())
        });
        fill(&mut self.edges, snapshot.count(SectionKind::Edges), |i| {
            snapshot.edge(i).map(|r| r.id())
        });
        fill(&mut self.actors, snapshot.count(SectionKind::Actors), |i| {
            snapshot.actor(i).map(|r| r.id())
        });
        fill(&mut self.localizations, snapshot.count(SectionKind::Localizations), |i| {
            snapshot.localization(i).map(|r| r.id())
        });
        fill(
            &mut self.property_templates,
            snapshot.count(SectionKind::PropertyTemplates),
            |i| snapshot.property_template(i).map(|r| r.id()),
        );
    }
}

/// Snapshot store for one locale
#[derive(Debug, Default)]
pub struct Database {
    snapshot: Option<Snapshot>,
    ids: IdMaps,
    manifest: Option<Arc<Manifest>>,
    current_locale: Option<usize>,
    snapshot_path: Option<PathBuf>,
}

impl Database {
    /// Create an empty store with no snapshot loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store and load the snapshot at `path`
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let mut database = Self::new();
        database.load_snapshot(path)?;
        Ok(database)
    }

    /// Load a locale through its manifest, keeping the back-reference for
    /// later locale changes
    pub fn from_manifest(manifest: Arc<Manifest>, locale_id: i32) -> DatabaseResult<Self> {
        let mut database = Self {
            manifest: Some(manifest),
            ..Self::default()
        };
        database.change_locale(locale_id)?;
        Ok(database)
    }

    /// Read, verify and commit the snapshot at `path`
    ///
    /// On failure the previously loaded snapshot stays active.
    pub fn load_snapshot(&mut self, path: impl AsRef<Path>) -> DatabaseResult<()> {
        let path = path.as_ref();
        let storage = Storage::new(path.parent().map(Path::to_path_buf).unwrap_or_default());
        let bytes = storage.read_file(path).map_err(|err| DatabaseError::Read {
            path: path.to_path_buf(),
            detail: format!("{:#}", err),
        })?;

        self.load_snapshot_bytes(bytes)?;
        self.snapshot_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Verify and commit an in-memory snapshot buffer
    pub fn load_snapshot_bytes(&mut self, bytes: Vec<u8>) -> DatabaseResult<()> {
        let snapshot = match Snapshot::from_bytes(bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(error = %err, "Snapshot verification failed; keeping previous snapshot");
                return Err(err.into());
            }
        };

        // Drop the old view before the maps so nothing reads a stale buffer.
        self.snapshot = None;
        self.ids.clear();
        self.ids.rebuild(&snapshot);
        self.snapshot = Some(snapshot);

        tracing::info!(
            locale_id = self.locale_id(),
            conversations = self.conversation_count(),
            nodes = self.node_count(),
            "Loaded snapshot"
        );
        Ok(())
    }

    /// Loaded snapshot, if any
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Whether a snapshot is loaded
    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Path the current snapshot was loaded from
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Locale id recorded in the snapshot header, or -1
    pub fn locale_id(&self) -> i32 {
        self.snapshot.as_ref().map_or(-1, Snapshot::locale_id)
    }

    /// Locale name recorded in the snapshot header
    pub fn locale_name(&self) -> &str {
        self.snapshot.as_ref().map_or("", Snapshot::locale_name)
    }

    /// Hex blake3 hash of the loaded buffer
    pub fn content_hash(&self) -> Option<String> {
        self.snapshot
            .as_ref()
            .map(|s| blake3::hash(s.bytes()).to_hex().to_string())
    }

    fn count(&self, kind: SectionKind) -> usize {
        self.snapshot.as_ref().map_or(0, |s| s.count(kind))
    }

    fn in_range(&self, kind: SectionKind, index: i32) -> bool {
        usize::try_from(index).is_ok_and(|i| i < self.count(kind))
    }

    /// Number of conversations
    pub fn conversation_count(&self) -> usize {
        self.count(SectionKind::Conversations)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.count(SectionKind::Nodes)
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.count(SectionKind::Edges)
    }

    /// Number of actors
    pub fn actor_count(&self) -> usize {
        self.count(SectionKind::Actors)
    }

    /// Number of localization entries
    pub fn localization_count(&self) -> usize {
        self.count(SectionKind::Localizations)
    }

    /// Number of property templates
    pub fn property_template_count(&self) -> usize {
        self.count(SectionKind::PropertyTemplates)
    }

    /// Conversation at `index`
    pub fn conversation(&self, index: i32) -> ConversationRef<'_> {
        if self.in_range(SectionKind::Conversations, index) {
            ConversationRef::new(self, index)
        } else {
            ConversationRef::invalid()
        }
    }

    /// Node at `index`
    pub fn node(&self, index: i32) -> NodeRef<'_> {
        if self.in_range(SectionKind::Nodes, index) {
            NodeRef::new(self, index)
        } else {
            NodeRef::invalid()
        }
    }

    /// Edge at `index`
    pub fn edge(&self, index: i32) -> EdgeRef<'_> {
        if self.in_range(SectionKind::Edges, index) {
            EdgeRef::new(self, index)
        } else {
            EdgeRef::invalid()
        }
    }

    /// Actor at `index`
    pub fn actor(&self, index: i32) -> ActorRef<'_> {
        if self.in_range(SectionKind::Actors, index) {
            ActorRef::new(self, index)
        } else {
            ActorRef::invalid()
        }
    }

    /// Localization entry at `index`
    pub fn localization(&self, index: i32) -> LocalizationRef<'_> {
        if self.in_range(SectionKind::Localizations, index) {
            LocalizationRef::new(self, index)
        } else {
            LocalizationRef::invalid()
        }
    }

    /// Property template at `index`
    pub fn property_template(&self, index: i32) -> PropertyTemplateRef<'_> {
        if self.in_range(SectionKind::PropertyTemplates, index) {
            PropertyTemplateRef::new(self, index)
        } else {
            PropertyTemplateRef::invalid()
        }
    }

    /// Position of the node with `id`
    pub fn node_index(&self, id: i32) -> Option<i32> {
        self.ids.nodes.get(&id).copied()
    }

    /// Position of the conversation with `id`
    pub fn conversation_index(&self, id: i32) -> Option<i32> {
        self.ids.conversations.get(&id).copied()
    }

    /// Conversation with `id`
    pub fn find_conversation(&self, id: i32) -> ConversationRef<'_> {
        self.conversation_index(id)
            .map_or_else(ConversationRef::invalid, |i| self.conversation(i))
    }

    /// Node with `id`
    pub fn find_node(&self, id: i32) -> NodeRef<'_> {
        self.node_index(id)
            .map_or_else(NodeRef::invalid, |i| self.node(i))
    }

    /// Edge with `id`
    pub fn find_edge(&self, id: i32) -> EdgeRef<'_> {
        self.ids
            .edges
            .get(&id)
            .map_or_else(EdgeRef::invalid, |i| self.edge(*i))
    }

    /// Actor with `id`
    pub fn find_actor(&self, id: i32) -> ActorRef<'_> {
        self.ids
            .actors
            .get(&id)
            .map_or_else(ActorRef::invalid, |i| self.actor(*i))
    }

    /// Localization entry with `id`
    pub fn find_localization(&self, id: i32) -> LocalizationRef<'_> {
        self.ids
            .localizations
            .get(&id)
            .map_or_else(LocalizationRef::invalid, |i| self.localization(*i))
    }

    /// Property template with `id`
    pub fn find_property_template(&self, id: i32) -> PropertyTemplateRef<'_> {
        self.ids
            .property_templates
            .get(&id)
            .map_or_else(PropertyTemplateRef::invalid, |i| self.property_template(*i))
    }

    /// Like [`find_conversation`](Self::find_conversation), logging a miss
    pub fn find_conversation_checked(&self, id: i32) -> ConversationRef<'_> {
        let found = self.find_conversation(id);
        if !found.is_valid() {
            tracing::error!(conversation_id = id, "Conversation not found");
        }
        found
    }

    /// Like [`find_node`](Self::find_node), logging a miss
    pub fn find_node_checked(&self, id: i32) -> NodeRef<'_> {
        let found = self.find_node(id);
        if !found.is_valid() {
            tracing::error!(node_id = id, "Node not found");
        }
        found
    }

    /// Like [`find_edge`](Self::find_edge), logging a miss
    pub fn find_edge_checked(&self, id: i32) -> EdgeRef<'_> {
        let found = self.find_edge(id);
        if !found.is_valid() {
            tracing::error!(edge_id = id, "Edge not found");
        }
        found
    }

    /// Like [`find_actor`](Self::find_actor), logging a miss
    pub fn find_actor_checked(&self, id: i32) -> ActorRef<'_> {
        let found = self.find_actor(id);
        if !found.is_valid() {
            tracing::error!(actor_id = id, "Actor not found");
        }
        found
    }

    /// Like [`find_localization`](Self::find_localization), logging a miss
    pub fn find_localization_checked(&self, id: i32) -> LocalizationRef<'_> {
        let found = self.find_localization(id);
        if !found.is_valid() {
            tracing::error!(localization_id = id, "Localization not found");
        }
        found
    }

    /// Like [`find_property_template`](Self::find_property_template), logging a miss
    pub fn find_property_template_checked(&self, id: i32) -> PropertyTemplateRef<'_> {
        let found = self.find_property_template(id);
        if !found.is_valid() {
            tracing::error!(template_id = id, "Property template not found");
        }
        found
    }

    /// Conversations in snapshot order
    pub fn conversations(&self) -> impl Iterator<Item = ConversationRef<'_>> {
        (0..self.conversation_count() as i32).map(move |i| self.conversation(i))
    }

    /// Actors in snapshot order
    pub fn actors(&self) -> impl Iterator<Item = ActorRef<'_>> {
        (0..self.actor_count() as i32).map(move |i| self.actor(i))
    }

    /// Manifest this store was loaded through
    pub fn manifest(&self) -> Option<&Arc<Manifest>> {
        self.manifest.as_ref()
    }

    /// Data directory of the manifest
    pub fn base_path(&self) -> Option<&Path> {
        self.manifest.as_deref().map(Manifest::base_path)
    }

    /// Locale currently loaded through the manifest
    pub fn current_locale(&self) -> Option<&Locale> {
        let index = self.current_locale?;
        self.manifest.as_deref()?.locale(index)
    }

    /// Load another locale of the same manifest
    ///
    /// Every reference obtained before the call refers to the old buffer
    /// and must be treated as invalid afterwards.
    pub fn change_locale(&mut self, locale_id: i32) -> DatabaseResult<()> {
        let manifest = self.manifest.clone().ok_or(DatabaseError::NoManifest)?;
        let (index, locale) = manifest
            .locales()
            .iter()
            .enumerate()
            .find(|(_, locale)| locale.id == locale_id)
            .ok_or(DatabaseError::UnknownLocale(locale_id))?;

        self.load_snapshot(manifest.snapshot_path(locale))?;
        self.current_locale = Some(index);

        if let Some(hash) = self.content_hash() {
            if !locale.hash.is_empty() && locale.hash != hash {
                tracing::warn!(
                    locale = %locale.name,
                    expected = %locale.hash,
                    actual = %hash,
                    "Snapshot hash differs from manifest"
                );
            }
        }

        Ok(())
    }
}
