//! Conversation runner
//!
//! The [`Runner`] owns the loaded [`Database`], the jump tables built from a
//! [`NodeRegistry`], and a fixed pool of conversation contexts. Every public
//! method drains the command queue before returning, so listeners that
//! acknowledge synchronously see their conversation run to its next real
//! wait point within the same call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use super::context::{ConversationState, Outcome, RunnerContext, RunnerEnv};
use super::database::Database;
use super::error::{DatabaseResult, RunnerError, RunnerResult};
use super::handle::HandlePool;
use super::jump_table::{JumpTables, ValidationReport};
use super::listener::{ConversationListener, TaskOwner};
use super::refs::{ConversationRef, NodeRef};
use super::registry::NodeRegistry;
use super::scheduler::{Command, CommandQueue};
use super::RunnerSettings;

/// Handle to a started conversation
///
/// Pairs a context id with the sequence number the context had when the
/// conversation started. Once the context is recycled the handle no longer
/// validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveConversation {
    context_id: i32,
    sequence: i32,
}

impl ActiveConversation {
    /// A handle that never validates
    pub const INVALID: Self = Self {
        context_id: -1,
        sequence: -1,
    };

    /// Context slot identifier
    pub fn context_id(&self) -> i32 {
        self.context_id
    }

    /// Sequence number at start
    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    /// Whether the handle was ever issued
    pub fn is_valid(&self) -> bool {
        self.context_id >= 0
    }
}

impl Default for ActiveConversation {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Drives conversations over one loaded database
pub struct Runner {
    database: Database,
    settings: RunnerSettings,
    registry: NodeRegistry,
    tables: JumpTables,
    contexts: Vec<RunnerContext>,
    free_contexts: Vec<usize>,
    active: HashMap<i32, usize>,
    handles: HandlePool,
    queue: CommandQueue,
    next_context_id: i32,
}

impl Runner {
    /// Build jump tables and pre-size the context and handle pools
    pub fn initialize(database: Database, settings: RunnerSettings, registry: &NodeRegistry) -> Self {
        let settings = settings.normalized();
        let capacity = settings.max_concurrent_conversations;

        let tables = JumpTables::build(&database, registry);
        let report = tables.validate(&database);
        if !report.is_ok() {
            report.log();
        }

        let queue = CommandQueue::new();
        let handles = HandlePool::with_capacity(capacity, queue.weak_sender());
        let contexts = (0..capacity as i32).map(RunnerContext::new).collect();
        let free_contexts = (0..capacity).rev().collect();

        tracing::info!(
            conversations = database.conversation_count(),
            nodes = database.node_count(),
            pool = capacity,
            "Runner initialized"
        );

        Self {
            database,
            settings,
            registry: registry.clone(),
            tables,
            contexts,
            free_contexts,
            active: HashMap::with_capacity(capacity),
            handles,
            queue,
            next_context_id: capacity as i32,
        }
    }

    /// Start the conversation with `conversation_id`
    pub fn start_conversation(
        &mut self,
        conversation_id: i32,
        listener: Arc<dyn ConversationListener>,
        task_owner: Arc<dyn TaskOwner>,
    ) -> RunnerResult<ActiveConversation> {
        if !self.database.is_loaded() {
            return Err(RunnerError::NoSnapshot);
        }
        let index = self
            .database
            .conversation_index(conversation_id)
            .ok_or(RunnerError::ConversationNotFound(conversation_id))?;
        self.start_at(index, listener, task_owner)
    }

    /// Start the conversation at position `index`
    pub fn start_conversation_by_index(
        &mut self,
        index: i32,
        listener: Arc<dyn ConversationListener>,
        task_owner: Arc<dyn TaskOwner>,
    ) -> RunnerResult<ActiveConversation> {
        if !self.database.is_loaded() {
            return Err(RunnerError::NoSnapshot);
        }
        if !self.database.conversation(index).is_valid() {
            return Err(RunnerError::ConversationIndexOutOfRange(index));
        }
        self.start_at(index, listener, task_owner)
    }

    fn start_at(
        &mut self,
        index: i32,
        listener: Arc<dyn ConversationListener>,
        task_owner: Arc<dyn TaskOwner>,
    ) -> RunnerResult<ActiveConversation> {
        if !task_owner.supports_tasks() {
            return Err(RunnerError::TaskOwnerUnsupported);
        }

        let slot = self.acquire_context();
        let context = &mut self.contexts[slot];
        context.initialize(index, listener, task_owner);
        let handle = ActiveConversation {
            context_id: context.context_id(),
            sequence: context.sequence(),
        };
        self.active.insert(handle.context_id, slot);

        tracing::info!(
            conversation_id = self.database.conversation(index).id(),
            context_id = handle.context_id,
            sequence = handle.sequence,
            "Starting conversation"
        );

        let outcome = {
            let mut env = RunnerEnv {
                database: &self.database,
                tables: &self.tables,
                settings: &self.settings,
                handles: &mut self.handles,
                commands: self.queue.sender(),
            };
            self.contexts[slot].start(&mut env)
        };
        if outcome == Outcome::Released {
            self.release_context(slot);
        }

        self.pump();
        Ok(handle)
    }

    /// Stop one conversation; stale handles are ignored
    pub fn stop_conversation(&mut self, handle: ActiveConversation) {
        if let Some(slot) = self.validate_handle(handle) {
            self.cancel_slot(slot);
        }
        self.pump();
    }

    /// Stop every active conversation
    pub fn stop_all_conversations(&mut self) {
        self.cancel_all();
        self.pump();
    }

    fn cancel_all(&mut self) {
        let handles: Vec<ActiveConversation> = self
            .active
            .values()
            .map(|slot| {
                let context = &self.contexts[*slot];
                ActiveConversation {
                    context_id: context.context_id(),
                    sequence: context.sequence(),
                }
            })
            .collect();

        for handle in handles {
            if let Some(slot) = self.validate_handle(handle) {
                self.cancel_slot(slot);
            }
        }
    }

    /// Whether `handle` refers to a conversation that is still running
    pub fn is_active(&self, handle: ActiveConversation) -> bool {
        self.validate_handle(handle)
            .is_some_and(|slot| self.contexts[slot].is_active())
    }

    /// Number of running conversations
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of contexts currently pooled
    pub fn pooled_count(&self) -> usize {
        self.free_contexts.len()
    }

    /// Total contexts allocated, pooled or running
    pub fn context_capacity(&self) -> usize {
        self.contexts.len()
    }

    /// Commands waiting to be processed
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// State of the conversation behind `handle`
    pub fn conversation_state(&self, handle: ActiveConversation) -> Option<ConversationState> {
        self.validate_handle(handle)
            .map(|slot| self.contexts[slot].state())
    }

    /// Conversation behind `handle`
    pub fn conversation(&self, handle: ActiveConversation) -> ConversationRef<'_> {
        self.validate_handle(handle)
            .map_or_else(ConversationRef::invalid, |slot| {
                self.database.conversation(self.contexts[slot].conversation())
            })
    }

    /// Current node of the conversation behind `handle`
    pub fn current_node(&self, handle: ActiveConversation) -> NodeRef<'_> {
        self.validate_handle(handle)
            .map_or_else(NodeRef::invalid, |slot| {
                self.database.node(self.contexts[slot].current_node())
            })
    }

    /// Process queued commands until the queue is empty
    ///
    /// Returns the number of commands processed. Call this after firing
    /// handles or task signals from outside a listener callback.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Some(command) = self.queue.try_next() {
            self.dispatch(command);
            processed += 1;
        }
        processed
    }

    /// Cloneable, `Send` handle for stopping conversations from other threads
    pub fn remote(&self) -> RemoteRunner {
        RemoteRunner {
            sender: self.queue.sender().clone(),
        }
    }

    /// Switch the database to another manifest locale and rebuild the tables
    ///
    /// Running conversations keep their positions; only text changes.
    pub fn change_locale(&mut self, locale_id: i32) -> DatabaseResult<()> {
        self.database.change_locale(locale_id)?;
        self.tables = JumpTables::build(&self.database, &self.registry);
        let report = self.tables.validate(&self.database);
        if !report.is_ok() {
            report.log();
        }
        Ok(())
    }

    /// Compare node flags against the built jump tables
    pub fn validate_jump_tables(&self) -> ValidationReport {
        self.tables.validate(&self.database)
    }

    /// Loaded database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Effective settings
    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Built jump tables
    pub fn jump_tables(&self) -> &JumpTables {
        &self.tables
    }

    fn dispatch(&mut self, command: Command) {
        if self.settings.verbose_logging {
            tracing::trace!(?command, "Dispatching command");
        }
        match command {
            Command::Ready {
                context_id,
                event_id,
            } => self.with_context(context_id, |ctx, env| ctx.on_ready(event_id, env)),
            Command::Choice {
                context_id,
                event_id,
                node_id,
            } => self.with_context(context_id, |ctx, env| ctx.on_choice(event_id, node_id, env)),
            Command::ChoiceIndex {
                context_id,
                event_id,
                index,
            } => self.with_context(context_id, |ctx, env| {
                ctx.on_choice_index(event_id, index, env)
            }),
            Command::ActionFinished {
                context_id,
                sequence,
                action_serial,
                outcome,
            } => self.with_context(context_id, |ctx, env| {
                ctx.on_action_finished(sequence, action_serial, outcome, env)
            }),
            Command::Cancel {
                context_id,
                sequence,
            } => {
                let handle = ActiveConversation {
                    context_id,
                    sequence,
                };
                if let Some(slot) = self.validate_handle(handle) {
                    self.cancel_slot(slot);
                }
            }
            Command::CancelAll => self.cancel_all(),
        }
    }

    fn with_context<F>(&mut self, context_id: i32, f: F)
    where
        F: FnOnce(&mut RunnerContext, &mut RunnerEnv<'_>) -> Outcome,
    {
        let Some(&slot) = self.active.get(&context_id) else {
            tracing::debug!(context_id, "Command for an inactive context");
            return;
        };
        let outcome = {
            let mut env = RunnerEnv {
                database: &self.database,
                tables: &self.tables,
                settings: &self.settings,
                handles: &mut self.handles,
                commands: self.queue.sender(),
            };
            f(&mut self.contexts[slot], &mut env)
        };
        if outcome == Outcome::Released {
            self.release_context(slot);
        }
    }

    fn cancel_slot(&mut self, slot: usize) {
        let context_id = self.contexts[slot].context_id();
        tracing::info!(context_id, "Stopping conversation");
        self.with_context(context_id, |ctx, env| ctx.cancel(env));
    }

    fn validate_handle(&self, handle: ActiveConversation) -> Option<usize> {
        if !handle.is_valid() {
            return None;
        }
        let slot = *self.active.get(&handle.context_id)?;
        (self.contexts[slot].sequence() == handle.sequence).then_some(slot)
    }

    fn acquire_context(&mut self) -> usize {
        if let Some(slot) = self.free_contexts.pop() {
            return slot;
        }
        let context_id = self.next_context_id;
        self.next_context_id += 1;
        self.contexts.push(RunnerContext::new(context_id));
        tracing::debug!(
            context_id,
            capacity = self.contexts.len(),
            "Context pool exhausted; allocating"
        );
        self.contexts.len() - 1
    }

    fn release_context(&mut self, slot: usize) {
        let context_id = self.contexts[slot].context_id();
        self.active.remove(&context_id);
        self.free_contexts.push(slot);
        tracing::debug!(context_id, "Conversation finished");
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("active", &self.active.len())
            .field("pooled", &self.free_contexts.len())
            .field("free_handles", &self.handles.free_count())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Thread-safe handle for stopping conversations
///
/// Requests are queued and take effect the next time the owning
/// [`Runner`] pumps.
#[derive(Debug, Clone)]
pub struct RemoteRunner {
    sender: UnboundedSender<Command>,
}

impl RemoteRunner {
    /// Queue a stop for one conversation
    pub fn stop_conversation(&self, handle: ActiveConversation) {
        if !handle.is_valid() {
            return;
        }
        let _ = self.sender.send(Command::Cancel {
            context_id: handle.context_id,
            sequence: handle.sequence,
        });
    }

    /// Queue a stop for every conversation
    pub fn stop_all_conversations(&self) {
        let _ = self.sender.send(Command::CancelAll);
    }

    /// Whether the runner still exists
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::builder::{ConversationSpec, EdgeSpec, NodeSpec, SnapshotBuilder};
    use crate::runtime::handle::CompletionHandle;
    use crate::runtime::listener::DefaultTaskOwner;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        held: Mutex<Option<CompletionHandle>>,
    }

    impl ConversationListener for Recorder {
        fn on_speech(&self, node: NodeRef<'_>, handle: CompletionHandle) {
            self.events.lock().push(format!("speech:{}", node.id()));
            *self.held.lock() = Some(handle);
        }

        fn on_decision(&self, choices: &[NodeRef<'_>], handle: CompletionHandle) {
            self.events.lock().push(format!("decision:{}", choices.len()));
            handle.select_choice_by_index(0);
        }

        fn on_cleanup(&self, conversation: ConversationRef<'_>) {
            self.events.lock().push(format!("cleanup:{}", conversation.id()));
        }
    }

    fn runner(capacity: usize) -> Runner {
        let mut b = SnapshotBuilder::new(1, "en");
        let conv = b.add_conversation(ConversationSpec::new(1, "Greeting"));
        let root = b.add_node(NodeSpec::root(1, conv));
        let hello = b.add_node(NodeSpec::dialogue(2, conv).voice("Hello"));
        b.add_edge(EdgeSpec::new(1, root, hello));
        let mut db = Database::new();
        db.load_snapshot_bytes(b.build()).unwrap();

        let settings = RunnerSettings {
            max_concurrent_conversations: capacity,
            ..RunnerSettings::default()
        };
        Runner::initialize(db, settings, &NodeRegistry::new())
    }

    #[test]
    fn test_pool_is_presized() {
        let runner = runner(3);
        assert_eq!(runner.context_capacity(), 3);
        assert_eq!(runner.pooled_count(), 3);
        assert_eq!(runner.active_count(), 0);
    }

    #[test]
    fn test_start_parks_on_speech() {
        let mut runner = runner(2);
        let listener = Arc::new(Recorder::default());
        let handle = runner
            .start_conversation(1, listener.clone(), Arc::new(DefaultTaskOwner))
            .unwrap();

        assert!(runner.is_active(handle));
        assert_eq!(
            runner.conversation_state(handle),
            Some(ConversationState::ActionAndSpeech)
        );
        assert_eq!(runner.current_node(handle).id(), 2);
        assert_eq!(runner.conversation(handle).name(), "Greeting");
        assert_eq!(*listener.events.lock(), vec!["speech:2".to_string()]);

        let speech = listener.held.lock().take().unwrap();
        speech.notify_ready();
        // speech ack, then the default conversation-exit ack
        assert_eq!(runner.pump(), 2);
        assert!(!runner.is_active(handle));
        assert_eq!(listener.events.lock().last().unwrap(), "cleanup:1");
        assert_eq!(runner.pooled_count(), 2);
    }

    #[test]
    fn test_unknown_conversation() {
        let mut runner = runner(1);
        let result = runner.start_conversation(99, Arc::new(Recorder::default()), Arc::new(DefaultTaskOwner));
        assert_eq!(result.unwrap_err(), RunnerError::ConversationNotFound(99));

        let result = runner.start_conversation_by_index(5, Arc::new(Recorder::default()), Arc::new(DefaultTaskOwner));
        assert_eq!(result.unwrap_err(), RunnerError::ConversationIndexOutOfRange(5));
    }

    #[test]
    fn test_task_owner_must_support_tasks() {
        struct Inert;
        impl TaskOwner for Inert {
            fn supports_tasks(&self) -> bool {
                false
            }
        }

        let mut runner = runner(1);
        let result = runner.start_conversation(1, Arc::new(Recorder::default()), Arc::new(Inert));
        assert_eq!(result.unwrap_err(), RunnerError::TaskOwnerUnsupported);
        assert_eq!(runner.active_count(), 0);
    }

    #[test]
    fn test_pool_grows_when_exhausted() {
        let mut runner = runner(1);
        let owner: Arc<dyn TaskOwner> = Arc::new(DefaultTaskOwner);
        let a = runner.start_conversation(1, Arc::new(Recorder::default()), owner.clone()).unwrap();
        let b = runner.start_conversation(1, Arc::new(Recorder::default()), owner).unwrap();

        assert_ne!(a.context_id(), b.context_id());
        assert_eq!(runner.context_capacity(), 2);
        assert_eq!(runner.active_count(), 2);

        runner.stop_all_conversations();
        assert_eq!(runner.active_count(), 0);
        assert_eq!(runner.pooled_count(), 2);
    }

    #[test]
    fn test_remote_stop_applies_on_pump() {
        let mut runner = runner(1);
        let listener = Arc::new(Recorder::default());
        let handle = runner
            .start_conversation(1, listener.clone(), Arc::new(DefaultTaskOwner))
            .unwrap();

        let remote = runner.remote();
        std::thread::spawn(move || remote.stop_conversation(handle))
            .join()
            .unwrap();
        assert!(runner.is_active(handle));
        assert_eq!(runner.pending_commands(), 1);

        runner.pump();
        assert!(!runner.is_active(handle));
        assert!(!listener.held.lock().as_ref().unwrap().is_valid());
    }

    #[test]
    fn test_default_handle_never_validates() {
        let mut runner = runner(1);
        assert!(!runner.is_active(ActiveConversation::default()));
        runner.stop_conversation(ActiveConversation::INVALID);
        assert!(runner.conversation_state(ActiveConversation::INVALID).is_none());
        assert!(!runner.current_node(ActiveConversation::INVALID).is_valid());
    }
}
