//! Host-facing traits
//!
//! A [`ConversationListener`] receives lifecycle callbacks and resumes the
//! conversation through the [`CompletionHandle`] it is given. Condition and
//! action callbacks receive a [`DialogueContext`] scoped to one node.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::database::Database;
use super::handle::CompletionHandle;
use super::refs::{ActorRef, ConversationRef, NodeRef};
use super::scheduler::TaskSignal;

/// Receiver of conversation lifecycle callbacks
///
/// Handle-bearing callbacks park the conversation until the handle is
/// used. The defaults acknowledge immediately. All calls happen on the
/// thread that drives the [`Runner`](super::runner::Runner).
pub trait ConversationListener: Send + Sync {
    /// The conversation started
    fn on_conversation_enter(&self, conversation: ConversationRef<'_>, handle: CompletionHandle) {
        let _ = conversation;
        handle.notify_ready();
    }

    /// A node became current
    fn on_node_enter(&self, node: NodeRef<'_>, handle: CompletionHandle) {
        let _ = node;
        handle.notify_ready();
    }

    /// A dialogue node should be spoken
    fn on_speech(&self, node: NodeRef<'_>, handle: CompletionHandle);

    /// The player must pick one of `choices`
    fn on_decision(&self, choices: &[NodeRef<'_>], handle: CompletionHandle);

    /// Pick the next node without prompting
    ///
    /// `choices` holds the valid choices sharing the highest edge priority.
    /// The returned node must be one of the valid choices.
    fn on_auto_decision<'a>(&self, choices: &[NodeRef<'a>]) -> NodeRef<'a> {
        choices.first().copied().unwrap_or_default()
    }

    /// The previously current node is being left
    fn on_node_exit(&self, node: NodeRef<'_>, handle: CompletionHandle) {
        let _ = node;
        handle.notify_ready();
    }

    /// The conversation ran out of valid edges
    fn on_conversation_exit(&self, conversation: ConversationRef<'_>, handle: CompletionHandle) {
        let _ = conversation;
        handle.notify_ready();
    }

    /// The conversation was stopped before finishing
    fn on_conversation_cancelled(&self, conversation: ConversationRef<'_>) {
        let _ = conversation;
    }

    /// The conversation hit a protocol violation and will be cleaned up
    fn on_error(&self, conversation: ConversationRef<'_>, message: &str) {
        tracing::error!(conversation_id = conversation.id(), "{}", message);
    }

    /// Final callback; fires exactly once per started conversation
    fn on_cleanup(&self, conversation: ConversationRef<'_>) {
        let _ = conversation;
    }
}

/// Host object that latent action tasks are attached to
pub trait TaskOwner: Send + Sync {
    /// Whether action tasks may run on behalf of this owner
    fn supports_tasks(&self) -> bool {
        true
    }

    /// Concrete owner for downcasting inside action callbacks
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// Task owner with no host state
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTaskOwner;

impl TaskOwner for DefaultTaskOwner {
    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

/// A long-running action started by an action callback
pub trait ActionTask: Send {
    /// Start the task; it finishes by firing `signal` from any thread
    fn activate(&mut self, signal: TaskSignal);

    /// Stop early because the conversation was cancelled
    fn end_task(&mut self) {}
}

/// Cooperative cancellation flag shared with host callbacks
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Read-only view handed to condition and action callbacks
pub struct DialogueContext<'a> {
    node: NodeRef<'a>,
    cancellation: &'a CancellationToken,
    task_owner: Option<&'a dyn TaskOwner>,
}

impl<'a> DialogueContext<'a> {
    pub(crate) fn new(
        node: NodeRef<'a>,
        cancellation: &'a CancellationToken,
        task_owner: Option<&'a dyn TaskOwner>,
    ) -> Self {
        Self {
            node,
            cancellation,
            task_owner,
        }
    }

    /// Node being evaluated or acted on
    pub fn node(&self) -> NodeRef<'a> {
        self.node
    }

    /// Identifier of that node
    pub fn node_id(&self) -> i32 {
        self.node.id()
    }

    /// Conversation the node belongs to
    pub fn conversation(&self) -> ConversationRef<'a> {
        self.node.conversation()
    }

    /// Identifier of that conversation
    pub fn conversation_id(&self) -> i32 {
        self.node.conversation().id()
    }

    /// Speaker of the node
    pub fn actor(&self) -> ActorRef<'a> {
        self.node.actor()
    }

    /// Voice text of the node
    pub fn voice_text(&self) -> &'a str {
        self.node.voice_text()
    }

    /// UI response text of the node
    pub fn ui_response_text(&self) -> &'a str {
        self.node.ui_response_text()
    }

    /// Database the node lives in
    pub fn database(&self) -> Option<&'a Database> {
        self.node.database()
    }

    /// Whether the conversation has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancellation token to carry into long-running work
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Task owner the conversation was started with
    pub fn task_owner(&self) -> Option<&'a dyn TaskOwner> {
        self.task_owner
    }
}
