//! Completion handles
//!
//! A [`CompletionHandle`] is the return address a listener uses to resume a
//! parked conversation. Its slot is pooled and re-bound for every event, so
//! a handle kept past its event goes stale instead of driving a later one.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::WeakUnboundedSender;

use super::refs::NodeRef;
use super::scheduler::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    context_id: i32,
    event_id: u64,
}

#[derive(Debug)]
struct HandleSlot {
    binding: Mutex<Option<Binding>>,
    commands: WeakUnboundedSender<Command>,
}

/// Return address for one pending listener event
///
/// Cloneable and `Send`; all methods may be called from any thread. Calls
/// on a stale handle are ignored.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    slot: Arc<HandleSlot>,
    binding: Binding,
}

impl CompletionHandle {
    /// Acknowledge the event and let the conversation continue
    pub fn notify_ready(&self) {
        self.send(Command::Ready {
            context_id: self.binding.context_id,
            event_id: self.binding.event_id,
        });
    }

    /// Answer a decision with one of the offered nodes
    pub fn select_choice(&self, node: NodeRef<'_>) {
        self.select_choice_by_id(node.id());
    }

    /// Answer a decision with the id of one of the offered nodes
    pub fn select_choice_by_id(&self, node_id: i32) {
        self.send(Command::Choice {
            context_id: self.binding.context_id,
            event_id: self.binding.event_id,
            node_id,
        });
    }

    /// Answer a decision by position in the offered list
    pub fn select_choice_by_index(&self, index: usize) {
        self.send(Command::ChoiceIndex {
            context_id: self.binding.context_id,
            event_id: self.binding.event_id,
            index,
        });
    }

    /// Whether the event this handle was issued for is still pending
    pub fn is_valid(&self) -> bool {
        *self.slot.binding.lock() == Some(self.binding)
    }

    /// Context the handle belongs to
    pub fn context_id(&self) -> i32 {
        self.binding.context_id
    }

    /// Event the handle was issued for
    pub fn event_id(&self) -> u64 {
        self.binding.event_id
    }

    fn send(&self, command: Command) {
        if !self.is_valid() {
            tracing::debug!(
                context_id = self.binding.context_id,
                event_id = self.binding.event_id,
                "Ignoring stale completion handle"
            );
            return;
        }
        match self.slot.commands.upgrade() {
            Some(sender) => {
                let _ = sender.send(command);
            }
            None => tracing::debug!("Completion handle outlived its runner"),
        }
    }

    fn unbind(&self) {
        let mut binding = self.slot.binding.lock();
        if *binding == Some(self.binding) {
            *binding = None;
        }
    }
}

/// Pool of reusable handle slots
#[derive(Debug)]
pub(crate) struct HandlePool {
    free: Vec<Arc<HandleSlot>>,
    commands: WeakUnboundedSender<Command>,
}

impl HandlePool {
    pub(crate) fn with_capacity(capacity: usize, commands: WeakUnboundedSender<Command>) -> Self {
        let free = (0..capacity)
            .map(|_| Self::new_slot(&commands))
            .collect();
        Self { free, commands }
    }

    fn new_slot(commands: &WeakUnboundedSender<Command>) -> Arc<HandleSlot> {
        Arc::new(HandleSlot {
            binding: Mutex::new(None),
            commands: commands.clone(),
        })
    }

    /// Bind a slot to `(context_id, event_id)`
    pub(crate) fn acquire(&mut self, context_id: i32, event_id: u64) -> CompletionHandle {
        let slot = self
            .free
            .pop()
            .unwrap_or_else(|| Self::new_slot(&self.commands));
        let binding = Binding {
            context_id,
            event_id,
        };
        *slot.binding.lock() = Some(binding);
        CompletionHandle { slot, binding }
    }

    /// Unbind the handle and return its slot to the pool
    pub(crate) fn release(&mut self, handle: CompletionHandle) {
        handle.unbind();
        self.free.push(handle.slot);
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }
}
