//! Dialogue runtime and public API
//!
//! Data access ([`database`], [`refs`], [`manifest`]) reads compiled `.gsb`
//! snapshots without copying them. Execution ([`runner`], [`context`])
//! drives conversations through listener callbacks and host-registered
//! condition and action callbacks.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

// Submodules
pub mod builder;
pub mod context;
pub mod database;
pub mod error;
pub mod format;
pub mod handle;
pub mod jump_table;
pub mod listener;
pub mod manifest;
pub mod refs;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod storage;

/// Largest accepted conversation pool size
pub const MAX_CONCURRENT_CONVERSATIONS: usize = 100;

/// Runner configuration, persisted as `settings.json` in the data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Directory holding `manifest.json` and `locales/` (default: GameScript/)
    pub data_path: PathBuf,

    /// Initial size of the context pool (clamped to 1..=100)
    pub max_concurrent_conversations: usize,

    /// Auto-advance single choices even when they carry UI response text
    pub prevent_single_node_choices: bool,

    /// Log every state transition
    pub verbose_logging: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("GameScript"),
            max_concurrent_conversations: 10,
            prevent_single_node_choices: false,
            verbose_logging: false,
        }
    }
}

impl RunnerSettings {
    /// Settings with out-of-range values clamped
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_conversations = self
            .max_concurrent_conversations
            .clamp(1, MAX_CONCURRENT_CONVERSATIONS);
        self
    }
}

/// Create the data directory layout and write `settings.json`
pub fn init(settings: &RunnerSettings) -> anyhow::Result<()> {
    storage::init_storage(&settings.data_path)?;
    storage::write_settings(&settings.data_path, settings)?;
    Ok(())
}

/// Load settings, the manifest and the primary locale from `data_path`
pub fn load(data_path: impl AsRef<Path>, registry: &NodeRegistry) -> anyhow::Result<Runner> {
    let root = data_path.as_ref();
    let mut settings = storage::load_settings(root)?;
    settings.data_path = root.to_path_buf();

    let manifest = Manifest::load_from_dir(root)
        .with_context(|| format!("failed to load manifest from {}", root.display()))?;
    let locale = manifest
        .primary_locale()
        .context("manifest has no primary locale")?;
    let runner = manifest.create_runner(locale, settings, registry)?;
    Ok(runner)
}

// Re-export commonly used types
pub use builder::{ActorSpec, ConversationSpec, EdgeSpec, NodeSpec, SnapshotBuilder};
pub use context::ConversationState;
pub use database::Database;
pub use error::{GameScriptError, Result};
pub use format::{EdgeType, NodeType, PropertyType, PropertyValue};
pub use handle::CompletionHandle;
pub use jump_table::{JumpTables, ValidationReport};
pub use listener::{
    ActionTask, CancellationToken, ConversationListener, DefaultTaskOwner, DialogueContext,
    TaskOwner,
};
pub use manifest::{Locale, Manifest};
pub use refs::{
    ActorRef, ConversationRef, EdgeRef, LocalizationRef, NodeRef, PropertyRef, PropertyTemplateRef,
};
pub use registry::{ActionFn, ConditionFn, NodeRegistry};
pub use runner::{ActiveConversation, RemoteRunner, Runner};
pub use scheduler::{TaskOutcome, TaskSignal};
