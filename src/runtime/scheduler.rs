//! Command queue
//!
//! Every resumption of a conversation (listener acknowledgements, choices,
//! latent action completions, remote stop requests) becomes a [`Command`]
//! on one unbounded channel. The runner is the only consumer and drains it
//! in order, so a context is never re-entered while it is mid-transition.

use tokio::sync::mpsc::{
    self, error::TryRecvError, UnboundedReceiver, UnboundedSender, WeakUnboundedSender,
};

/// A request to resume or stop one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// A listener acknowledged the pending event
    Ready { context_id: i32, event_id: u64 },
    /// A listener picked a choice by node id
    Choice {
        context_id: i32,
        event_id: u64,
        node_id: i32,
    },
    /// A listener picked a choice by position in the presented list
    ChoiceIndex {
        context_id: i32,
        event_id: u64,
        index: usize,
    },
    /// A latent action task finished
    ActionFinished {
        context_id: i32,
        sequence: i32,
        action_serial: u64,
        outcome: TaskOutcome,
    },
    /// Stop one conversation
    Cancel { context_id: i32, sequence: i32 },
    /// Stop every active conversation
    CancelAll,
}

/// How a latent action task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task ran to completion
    Completed,
    /// The task gave up; the conversation still advances
    Cancelled,
}

/// Single-consumer queue owned by a runner
#[derive(Debug)]
pub(crate) struct CommandQueue {
    sender: UnboundedSender<Command>,
    receiver: UnboundedReceiver<Command>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    pub(crate) fn sender(&self) -> &UnboundedSender<Command> {
        &self.sender
    }

    /// Sender that does not keep the queue alive
    pub(crate) fn weak_sender(&self) -> WeakUnboundedSender<Command> {
        self.sender.downgrade()
    }

    /// Next queued command, if any
    pub(crate) fn try_next(&mut self) -> Option<Command> {
        match self.receiver.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// One-shot completion signal handed to an [`ActionTask`](super::listener::ActionTask)
///
/// May be moved to another thread. Dropping it without firing leaves the
/// node waiting until the conversation is stopped.
#[derive(Debug)]
pub struct TaskSignal {
    sender: UnboundedSender<Command>,
    context_id: i32,
    sequence: i32,
    action_serial: u64,
}

impl TaskSignal {
    pub(crate) fn new(
        sender: UnboundedSender<Command>,
        context_id: i32,
        sequence: i32,
        action_serial: u64,
    ) -> Self {
        Self {
            sender,
            context_id,
            sequence,
            action_serial,
        }
    }

    /// Report that the task finished
    pub fn complete(self) {
        self.finish(TaskOutcome::Completed);
    }

    /// Report that the task gave up
    pub fn cancel(self) {
        self.finish(TaskOutcome::Cancelled);
    }

    fn finish(self, outcome: TaskOutcome) {
        let command = Command::ActionFinished {
            context_id: self.context_id,
            sequence: self.sequence,
            action_serial: self.action_serial,
            outcome,
        };
        if self.sender.send(command).is_err() {
            tracing::debug!(
                context_id = self.context_id,
                "Task finished after its runner was dropped"
            );
        }
    }
}
