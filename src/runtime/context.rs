//! Per-conversation state machine
//!
//! A [`RunnerContext`] walks one conversation through its states. Entering a
//! state either moves straight on to the next one or hands a
//! [`CompletionHandle`] to the listener and parks. The runner resumes a
//! parked context when the matching command comes off its queue.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::database::Database;
use super::format::NodeType;
use super::handle::{CompletionHandle, HandlePool};
use super::jump_table::JumpTables;
use super::listener::{
    ActionTask, CancellationToken, ConversationListener, DialogueContext, TaskOwner,
};
use super::refs::NodeRef;
use super::scheduler::{Command, TaskOutcome, TaskSignal};
use super::RunnerSettings;

/// Lifecycle states of a running conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConversationState {
    /// Pooled, not running
    Idle,
    /// Waiting on `on_conversation_enter`
    ConversationEnter,
    /// Waiting on `on_node_enter`
    NodeEnter,
    /// Waiting on the node's action and/or speech
    ActionAndSpeech,
    /// Waiting on a player decision
    EvaluateEdges,
    /// Waiting on `on_node_exit`
    NodeExit,
    /// Waiting on `on_conversation_exit`
    ConversationExit,
    /// Tearing down
    Cleanup,
}

/// Shared runner state borrowed for one transition
pub(crate) struct RunnerEnv<'r> {
    pub(crate) database: &'r Database,
    pub(crate) tables: &'r JumpTables,
    pub(crate) settings: &'r RunnerSettings,
    pub(crate) handles: &'r mut HandlePool,
    pub(crate) commands: &'r UnboundedSender<Command>,
}

/// Result of driving a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Still owned by its conversation (or untouched)
    Parked,
    /// Cleaned up; the slot can go back to the pool
    Released,
}

enum Step {
    Goto(ConversationState),
    Park,
    Release,
}

pub(crate) struct RunnerContext {
    context_id: i32,
    sequence: i32,
    event_id: u64,
    state: ConversationState,
    active: bool,

    conversation: i32,
    current_node: i32,
    node_to_exit: i32,

    valid_choices: Vec<i32>,
    highest_priority_choices: Vec<i32>,
    all_same_actor: bool,

    action_complete: bool,
    speech_complete: bool,
    action_serial: u64,
    active_task: Option<Box<dyn ActionTask>>,

    pending: Option<CompletionHandle>,
    cancellation: CancellationToken,
    listener: Option<Arc<dyn ConversationListener>>,
    task_owner: Option<Arc<dyn TaskOwner>>,
}

impl RunnerContext {
    pub(crate) fn new(context_id: i32) -> Self {
        Self {
            context_id,
            sequence: 0,
            event_id: 0,
            state: ConversationState::Idle,
            active: false,
            conversation: -1,
            current_node: -1,
            node_to_exit: -1,
            valid_choices: Vec::new(),
            highest_priority_choices: Vec::new(),
            all_same_actor: true,
            action_complete: true,
            speech_complete: true,
            action_serial: 0,
            active_task: None,
            pending: None,
            cancellation: CancellationToken::new(),
            listener: None,
            task_owner: None,
        }
    }

    pub(crate) fn context_id(&self) -> i32 {
        self.context_id
    }

    pub(crate) fn sequence(&self) -> i32 {
        self.sequence
    }

    pub(crate) fn state(&self) -> ConversationState {
        self.state
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn conversation(&self) -> i32 {
        self.conversation
    }

    pub(crate) fn current_node(&self) -> i32 {
        self.current_node
    }

    /// Bind the context to a new conversation
    pub(crate) fn initialize(
        &mut self,
        conversation: i32,
        listener: Arc<dyn ConversationListener>,
        task_owner: Arc<dyn TaskOwner>,
    ) {
        self.sequence = self.sequence.wrapping_add(1);
        self.state = ConversationState::Idle;
        self.active = true;
        self.conversation = conversation;
        self.current_node = -1;
        self.node_to_exit = -1;
        self.valid_choices.clear();
        self.highest_priority_choices.clear();
        self.all_same_actor = true;
        self.action_complete = true;
        self.speech_complete = true;
        self.active_task = None;
        self.pending = None;
        self.cancellation = CancellationToken::new();
        self.listener = Some(listener);
        self.task_owner = Some(task_owner);
    }

    pub(crate) fn start(&mut self, env: &mut RunnerEnv<'_>) -> Outcome {
        self.run(ConversationState::ConversationEnter, env)
    }

    /// A listener acknowledged `event_id`
    pub(crate) fn on_ready(&mut self, event_id: u64, env: &mut RunnerEnv<'_>) -> Outcome {
        if !self.is_pending(event_id) {
            return Outcome::Parked;
        }
        if self.state == ConversationState::EvaluateEdges {
            tracing::warn!(
                context_id = self.context_id,
                "Ready received while a decision is pending; select a choice instead"
            );
            return Outcome::Parked;
        }
        self.release_pending(env);

        let db = env.database;
        let next = match self.state {
            ConversationState::ConversationEnter => {
                if db.node(self.current_node).node_type() == NodeType::Root {
                    ConversationState::EvaluateEdges
                } else {
                    ConversationState::NodeEnter
                }
            }
            ConversationState::NodeEnter => ConversationState::ActionAndSpeech,
            ConversationState::ActionAndSpeech => {
                self.speech_complete = true;
                if !self.action_complete {
                    return Outcome::Parked;
                }
                ConversationState::EvaluateEdges
            }
            ConversationState::NodeExit => self.after_node_exit(db),
            ConversationState::ConversationExit => ConversationState::Cleanup,
            state => {
                tracing::warn!(context_id = self.context_id, ?state, "Unexpected ready");
                return Outcome::Parked;
            }
        };
        self.run(next, env)
    }

    /// A listener picked the choice with `node_id`
    pub(crate) fn on_choice(
        &mut self,
        event_id: u64,
        node_id: i32,
        env: &mut RunnerEnv<'_>,
    ) -> Outcome {
        if !self.awaiting_decision(event_id) {
            return Outcome::Parked;
        }
        let db = env.database;
        let Some(target) = self
            .valid_choices
            .iter()
            .copied()
            .find(|index| db.node(*index).id() == node_id)
        else {
            tracing::error!(
                context_id = self.context_id,
                node_id,
                "Selected node is not one of the valid choices"
            );
            return Outcome::Parked;
        };
        self.take_choice(target, env)
    }

    /// A listener picked the choice at `index` in the presented list
    pub(crate) fn on_choice_index(
        &mut self,
        event_id: u64,
        index: usize,
        env: &mut RunnerEnv<'_>,
    ) -> Outcome {
        if !self.awaiting_decision(event_id) {
            return Outcome::Parked;
        }
        let Some(target) = self.valid_choices.get(index).copied() else {
            tracing::error!(
                context_id = self.context_id,
                index,
                choices = self.valid_choices.len(),
                "Choice index out of range"
            );
            return Outcome::Parked;
        };
        self.take_choice(target, env)
    }

    /// A latent action task finished
    pub(crate) fn on_action_finished(
        &mut self,
        sequence: i32,
        action_serial: u64,
        outcome: TaskOutcome,
        env: &mut RunnerEnv<'_>,
    ) -> Outcome {
        if !self.active
            || sequence != self.sequence
            || action_serial != self.action_serial
            || self.state != ConversationState::ActionAndSpeech
            || self.action_complete
        {
            tracing::debug!(context_id = self.context_id, "Ignoring stale task completion");
            return Outcome::Parked;
        }
        if outcome == TaskOutcome::Cancelled {
            tracing::debug!(context_id = self.context_id, "Action task gave up");
        }

        self.active_task = None;
        self.action_complete = true;
        if self.speech_complete {
            self.run(ConversationState::EvaluateEdges, env)
        } else {
            Outcome::Parked
        }
    }

    /// Stop the conversation from any state
    pub(crate) fn cancel(&mut self, env: &mut RunnerEnv<'_>) -> Outcome {
        if !self.active {
            return Outcome::Parked;
        }
        self.release_pending(env);
        if let Some(mut task) = self.active_task.take() {
            task.end_task();
        }
        self.cancellation.cancel();

        let db = env.database;

        let conversation = db.conversation(self.conversation);
        if let Some(listener) = self.listener.clone() {
            listener.on_conversation_cancelled(conversation);
        }
        self.run(ConversationState::Cleanup, env)
    }

    fn run(&mut self, mut state: ConversationState, env: &mut RunnerEnv<'_>) -> Outcome {
        loop {
            self.state = state;
            if env.settings.verbose_logging {
                tracing::debug!(
                    context_id = self.context_id,
                    node = self.current_node,
                    ?state,
                    "Entering state"
                );
            }
            let step = match state {
                ConversationState::ConversationEnter => self.enter_conversation(env),
                ConversationState::NodeEnter => self.enter_node(env),
                ConversationState::ActionAndSpeech => self.enter_action_and_speech(env),
                ConversationState::EvaluateEdges => self.enter_evaluate_edges(env),
                ConversationState::NodeExit => self.enter_node_exit(env),
                ConversationState::ConversationExit => self.enter_conversation_exit(env),
                ConversationState::Cleanup => self.enter_cleanup(env),
                ConversationState::Idle => Step::Park,
            };
            match step {
                Step::Goto(next) => state = next,
                Step::Park => return Outcome::Parked,
                Step::Release => return Outcome::Released,
            }
        }
    }

    fn enter_conversation(&mut self, env: &mut RunnerEnv<'_>) -> Step {
        let db = env.database;
        let conversation = db.conversation(self.conversation);
        let root = conversation.root_node();
        if !conversation.is_valid() || !root.is_valid() {
            let message = format!(
                "Conversation at index {} is missing or has no root node",
                self.conversation
            );
            self.report_error(&message, env);
            return Step::Goto(ConversationState::Cleanup);
        }

        self.current_node = root.index();
        let handle = self.issue_handle(env);
        if let Some(listener) = self.listener.clone() {
            listener.on_conversation_enter(conversation, handle);
        }
        Step::Park
    }

    fn enter_node(&mut self, env: &mut RunnerEnv<'_>) -> Step {
        let db = env.database;
        let node = db.node(self.current_node);
        let handle = self.issue_handle(env);
        if let Some(listener) = self.listener.clone() {
            listener.on_node_enter(node, handle);
        }
        Step::Park
    }

    fn enter_action_and_speech(&mut self, env: &mut RunnerEnv<'_>) -> Step {
        let db = env.database;
        let node = db.node(self.current_node);
        let has_action = node.has_action();
        let is_dialogue = node.node_type() == NodeType::Dialogue;

        self.action_complete = !has_action;
        self.speech_complete = !is_dialogue;
        if !has_action && !is_dialogue {
            return Step::Goto(ConversationState::EvaluateEdges);
        }

        if has_action {
            self.execute_action(node, env);
        }
        if is_dialogue {
            let handle = self.issue_handle(env);
            if let Some(listener) = self.listener.clone() {
                listener.on_speech(node, handle);
            }
        }

        if self.action_complete && self.speech_complete {
            Step::Goto(ConversationState::EvaluateEdges)
        } else {
            Step::Park
        }
    }

    fn execute_action(&mut self, node: NodeRef<'_>, env: &mut RunnerEnv<'_>) {
        self.action_serial += 1;
        let Some(action) = env.tables.action(node.index()) else {
            tracing::warn!(node_id = node.id(), "Node flagged with an action has no callback");
            self.action_complete = true;
            return;
        };

        let task = {
            let ctx = DialogueContext::new(node, &self.cancellation, self.task_owner.as_deref());
            action(&ctx)
        };
        match task {
            None => self.action_complete = true,
            Some(mut task) => {
                let signal = TaskSignal::new(
                    env.commands.clone(),
                    self.context_id,
                    self.sequence,
                    self.action_serial,
                );
                task.activate(signal);
                self.active_task = Some(task);
            }
        }
    }

    fn enter_evaluate_edges(&mut self, env: &mut RunnerEnv<'_>) -> Step {
        self.find_valid_choices(env);
        if self.valid_choices.is_empty() {
            return Step::Goto(ConversationState::ConversationExit);
        }

        let db = env.database;
        let current = db.node(self.current_node);
        let prompt = if current.is_prevent_response() {
            false
        } else if self.valid_choices.len() > 1 {
            self.all_same_actor
        } else {
            !env.settings.prevent_single_node_choices
                && !db.node(self.valid_choices[0]).ui_response_text().is_empty()
                && self.all_same_actor
        };

        let listener = self.listener.clone();
        if prompt {
            let choices: Vec<NodeRef<'_>> = self.valid_choices.iter().map(|i| db.node(*i)).collect();
            let handle = self.issue_handle(env);
            if let Some(listener) = listener {
                listener.on_decision(&choices, handle);
            }
            return Step::Park;
        }

        let candidates: Vec<NodeRef<'_>> = self
            .highest_priority_choices
            .iter()
            .map(|i| db.node(*i))
            .collect();
        let chosen = listener
            .as_ref()
            .map_or_else(NodeRef::invalid, |listener| {
                listener.on_auto_decision(&candidates)
            });
        let chosen_id = chosen.id();
        let target = self
            .valid_choices
            .iter()
            .copied()
            .find(|index| chosen.is_valid() && db.node(*index).id() == chosen_id);

        match target {
            Some(target) => {
                self.advance(target);
                Step::Goto(ConversationState::NodeExit)
            }
            None => {
                let message = format!(
                    "Auto-decision returned node {} which is not a valid choice",
                    chosen_id
                );
                self.report_error(&message, env);
                Step::Goto(ConversationState::Cleanup)
            }
        }
    }

    fn find_valid_choices(&mut self, env: &RunnerEnv<'_>) {
        self.valid_choices.clear();
        self.highest_priority_choices.clear();
        self.all_same_actor = true;

        let db = env.database;
        let mut highest = i32::MIN;
        let mut first_actor = None;

        for edge in db.node(self.current_node).outgoing_edges() {
            let target = edge.target();
            if !edge.is_valid() || !target.is_valid() {
                continue;
            }
            if target.has_condition() && !self.evaluate_condition(target, env) {
                continue;
            }

            let actor_id = target.actor().id();
            match first_actor {
                None => first_actor = Some(actor_id),
                Some(first) if first != actor_id => self.all_same_actor = false,
                Some(_) => {}
            }

            self.valid_choices.push(target.index());
            let priority = edge.priority();
            if priority > highest {
                highest = priority;
                self.highest_priority_choices.clear();
                self.highest_priority_choices.push(target.index());
            } else if priority == highest {
                self.highest_priority_choices.push(target.index());
            }
        }
    }

    fn evaluate_condition(&self, target: NodeRef<'_>, env: &RunnerEnv<'_>) -> bool {
        match env.tables.condition(target.index()) {
            Some(condition) => {
                let ctx =
                    DialogueContext::new(target, &self.cancellation, self.task_owner.as_deref());
                condition(&ctx)
            }
            None => {
                tracing::warn!(
                    node_id = target.id(),
                    "Node flagged with a condition has no callback; treating as passing"
                );
                true
            }
        }
    }

    fn enter_node_exit(&mut self, env: &mut RunnerEnv<'_>) -> Step {
        let db = env.database;
        let exiting = db.node(self.node_to_exit);
        if !exiting.is_valid() || exiting.is_root() {
            return Step::Goto(self.after_node_exit(db));
        }

        let handle = self.issue_handle(env);
        if let Some(listener) = self.listener.clone() {
            listener.on_node_exit(exiting, handle);
        }
        Step::Park
    }

    fn enter_conversation_exit(&mut self, env: &mut RunnerEnv<'_>) -> Step {
        let db = env.database;
        let conversation = db.conversation(self.conversation);
        let handle = self.issue_handle(env);
        if let Some(listener) = self.listener.clone() {
            listener.on_conversation_exit(conversation, handle);
        }
        Step::Park
    }

    fn enter_cleanup(&mut self, env: &mut RunnerEnv<'_>) -> Step {
        let db = env.database;
        let conversation = db.conversation(self.conversation);
        if let Some(listener) = self.listener.take() {
            listener.on_cleanup(conversation);
        }
        self.release_pending(env);

        self.active_task = None;
        self.task_owner = None;
        self.current_node = -1;
        self.node_to_exit = -1;
        self.valid_choices.clear();
        self.highest_priority_choices.clear();
        self.active = false;
        self.state = ConversationState::Idle;
        Step::Release
    }

    fn after_node_exit(&self, db: &Database) -> ConversationState {
        if db.node(self.current_node).is_valid() {
            ConversationState::NodeEnter
        } else {
            ConversationState::ConversationExit
        }
    }

    fn advance(&mut self, target: i32) {
        self.node_to_exit = self.current_node;
        self.current_node = target;
    }

    fn take_choice(&mut self, target: i32, env: &mut RunnerEnv<'_>) -> Outcome {
        self.release_pending(env);
        self.advance(target);
        self.run(ConversationState::NodeExit, env)
    }

    fn report_error(&self, message: &str, env: &RunnerEnv<'_>) {
        tracing::error!(context_id = self.context_id, "{}", message);
        let db = env.database;
        let conversation = db.conversation(self.conversation);
        if let Some(listener) = &self.listener {
            listener.on_error(conversation, message);
        }
    }

    fn is_pending(&self, event_id: u64) -> bool {
        let matches = self.active
            && self.event_id == event_id
            && self
                .pending
                .as_ref()
                .is_some_and(|handle| handle.event_id() == event_id);
        if !matches {
            tracing::debug!(
                context_id = self.context_id,
                event_id,
                current = self.event_id,
                "Ignoring completion for a stale event"
            );
        }
        matches
    }

    fn awaiting_decision(&self, event_id: u64) -> bool {
        if !self.is_pending(event_id) {
            return false;
        }
        if self.state != ConversationState::EvaluateEdges {
            tracing::warn!(
                context_id = self.context_id,
                state = ?self.state,
                "Choice received while no decision is pending"
            );
            return false;
        }
        true
    }

    fn issue_handle(&mut self, env: &mut RunnerEnv<'_>) -> CompletionHandle {
        self.release_pending(env);
        self.event_id += 1;
        let handle = env.handles.acquire(self.context_id, self.event_id);
        self.pending = Some(handle.clone());
        handle
    }

    fn release_pending(&mut self, env: &mut RunnerEnv<'_>) {
        if let Some(handle) = self.pending.take() {
            env.handles.release(handle);
        }
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("context_id", &self.context_id)
            .field("sequence", &self.sequence)
            .field("state", &self.state)
            .field("active", &self.active)
            .field("current_node", &self.current_node)
            .finish()
    }
}
