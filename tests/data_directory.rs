//! Integration tests for on-disk data directories
//!
//! Covers settings persistence, manifest loading, runner construction and
//! switching locales while a conversation is parked.

use std::sync::Arc;

use gamescript::runtime::{
    self, storage, CompletionHandle, ConversationListener, ConversationSpec, Database,
    DefaultTaskOwner, EdgeSpec, Locale, Manifest, NodeRef, NodeRegistry, NodeSpec, RunnerSettings,
    SnapshotBuilder,
};
use parking_lot::Mutex;
use tempfile::TempDir;

fn write_locale(dir: &std::path::Path, id: i32, code: &str, greeting: &str) -> Locale {
    let mut b = SnapshotBuilder::new(id, code);
    let conv = b.add_conversation(ConversationSpec::new(1, "Greeting"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let hello = b.add_node(NodeSpec::dialogue(2, conv).voice(greeting));
    let bye = b.add_node(NodeSpec::dialogue(3, conv).voice("..."));
    b.add_edge(EdgeSpec::new(1, root, hello));
    b.add_edge(EdgeSpec::new(2, hello, bye));

    let path = storage::Storage::new(dir.to_path_buf()).snapshot_path(code);
    b.write_to(&path).unwrap();
    let hash = Database::open(&path).unwrap().content_hash().unwrap();

    Locale {
        id,
        name: code.to_string(),
        localized_name: code.to_uppercase(),
        hash,
    }
}

fn data_dir(settings: RunnerSettings) -> TempDir {
    let temp = TempDir::new().unwrap();
    let settings = RunnerSettings {
        data_path: temp.path().to_path_buf(),
        ..settings
    };
    runtime::init(&settings).unwrap();

    let en = write_locale(temp.path(), 1, "en", "Hello");
    let fr = write_locale(temp.path(), 2, "fr", "Bonjour");
    Manifest::new("1.0.0", vec![en, fr], 0, temp.path())
        .save()
        .unwrap();
    temp
}

/// Holds every speech handle and records spoken text
#[derive(Default)]
struct Transcript {
    lines: Mutex<Vec<String>>,
    pending: Mutex<Option<CompletionHandle>>,
}

impl ConversationListener for Transcript {
    fn on_speech(&self, node: NodeRef<'_>, handle: CompletionHandle) {
        self.lines.lock().push(node.voice_text().to_string());
        *self.pending.lock() = Some(handle);
    }

    fn on_decision(&self, _choices: &[NodeRef<'_>], handle: CompletionHandle) {
        handle.select_choice_by_index(0);
    }
}

#[test]
fn test_load_runner_from_directory() {
    let settings = RunnerSettings {
        max_concurrent_conversations: 4,
        verbose_logging: true,
        ..RunnerSettings::default()
    };
    let temp = data_dir(settings);

    let runner = runtime::load(temp.path(), &NodeRegistry::new()).unwrap();
    assert_eq!(runner.settings().max_concurrent_conversations, 4);
    assert!(runner.settings().verbose_logging);
    assert_eq!(runner.settings().data_path, temp.path());
    assert_eq!(runner.context_capacity(), 4);
    assert_eq!(runner.database().locale_name(), "en");
    assert_eq!(runner.database().current_locale().unwrap().id, 1);
    assert!(runner.validate_jump_tables().is_ok());
}

#[test]
fn test_missing_manifest_is_an_error() {
    let temp = TempDir::new().unwrap();
    assert!(runtime::load(temp.path(), &NodeRegistry::new()).is_err());
}

#[test]
fn test_change_locale_while_parked() {
    let temp = data_dir(RunnerSettings::default());
    let manifest = Manifest::load_from_dir(temp.path()).unwrap();
    let locale = manifest.find_locale_by_name("en").unwrap();
    let mut runner = manifest
        .create_runner(locale, RunnerSettings::default(), &NodeRegistry::new())
        .unwrap();

    let listener = Arc::new(Transcript::default());
    let handle = runner
        .start_conversation(1, listener.clone(), Arc::new(DefaultTaskOwner))
        .unwrap();
    assert_eq!(*listener.lines.lock(), vec!["Hello".to_string()]);

    runner.change_locale(2).unwrap();
    assert_eq!(runner.database().locale_name(), "fr");
    assert!(runner.is_active(handle));
    assert_eq!(runner.current_node(handle).voice_text(), "Bonjour");

    listener.pending.lock().take().unwrap().notify_ready();
    runner.pump();
    assert_eq!(listener.lines.lock().last().unwrap(), "...");

    assert!(runner.change_locale(42).is_err());
    assert_eq!(runner.database().locale_name(), "fr");
}

#[test]
fn test_database_without_manifest_cannot_change_locale() {
    let temp = data_dir(RunnerSettings::default());
    let path = storage::Storage::new(temp.path().to_path_buf()).snapshot_path("en");
    let mut db = Database::open(&path).unwrap();
    assert!(db.manifest().is_none());
    assert!(db.change_locale(2).is_err());
    assert_eq!(db.locale_name(), "en");
}
