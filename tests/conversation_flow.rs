//! Integration tests for the conversation state machine
//!
//! Drives conversations through a recording listener and checks callback
//! order, decision policy, handle validity and latent actions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use gamescript::runtime::{
    ActionTask, ActorSpec, CancellationToken, CompletionHandle, ConversationListener,
    ConversationRef, ConversationSpec, ConversationState, Database, DefaultTaskOwner, EdgeSpec,
    NodeRef, NodeRegistry, NodeSpec, Runner, RunnerSettings, SnapshotBuilder, TaskOwner,
    TaskSignal,
};
use parking_lot::Mutex;
use proptest::prelude::*;

#[derive(Debug, Default, Clone, Copy)]
struct Script {
    hold_enter: bool,
    hold_speech: bool,
    hold_decision: bool,
    auto_pick: Option<i32>,
}

#[derive(Default)]
struct Recorder {
    script: Script,
    events: Mutex<Vec<String>>,
    held: Mutex<Vec<CompletionHandle>>,
    auto_candidates: Mutex<Vec<Vec<i32>>>,
}

impl Recorder {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn take_held(&self) -> CompletionHandle {
        self.held.lock().pop().expect("no held handle")
    }

    fn hold_or_ack(&self, hold: bool, handle: CompletionHandle) {
        if hold {
            self.held.lock().push(handle);
        } else {
            handle.notify_ready();
        }
    }
}

impl ConversationListener for Recorder {
    fn on_conversation_enter(&self, conversation: ConversationRef<'_>, handle: CompletionHandle) {
        self.push(format!("enter:{}", conversation.id()));
        self.hold_or_ack(self.script.hold_enter, handle);
    }

    fn on_node_enter(&self, node: NodeRef<'_>, handle: CompletionHandle) {
        self.push(format!("node_enter:{}", node.id()));
        handle.notify_ready();
    }

    fn on_speech(&self, node: NodeRef<'_>, handle: CompletionHandle) {
        self.push(format!("speech:{}", node.id()));
        self.hold_or_ack(self.script.hold_speech, handle);
    }

    fn on_decision(&self, choices: &[NodeRef<'_>], handle: CompletionHandle) {
        let ids: Vec<String> = choices.iter().map(|n| n.id().to_string()).collect();
        self.push(format!("decision:{}", ids.join(",")));
        if self.script.hold_decision {
            self.held.lock().push(handle);
        } else {
            handle.select_choice(choices[0]);
        }
    }

    fn on_auto_decision<'a>(&self, choices: &[NodeRef<'a>]) -> NodeRef<'a> {
        self.auto_candidates
            .lock()
            .push(choices.iter().map(|n| n.id()).collect());
        match self.script.auto_pick {
            Some(id) => choices
                .first()
                .and_then(|n| n.database())
                .map_or_else(NodeRef::invalid, |db| db.find_node(id)),
            None => choices.first().copied().unwrap_or_default(),
        }
    }

    fn on_node_exit(&self, node: NodeRef<'_>, handle: CompletionHandle) {
        self.push(format!("node_exit:{}", node.id()));
        handle.notify_ready();
    }

    fn on_conversation_exit(&self, conversation: ConversationRef<'_>, handle: CompletionHandle) {
        self.push(format!("exit:{}", conversation.id()));
        handle.notify_ready();
    }

    fn on_conversation_cancelled(&self, conversation: ConversationRef<'_>) {
        self.push(format!("cancelled:{}", conversation.id()));
    }

    fn on_error(&self, _conversation: ConversationRef<'_>, _message: &str) {
        self.push("error".to_string());
    }

    fn on_cleanup(&self, conversation: ConversationRef<'_>) {
        self.push(format!("cleanup:{}", conversation.id()));
    }
}

fn owner() -> Arc<dyn TaskOwner> {
    Arc::new(DefaultTaskOwner)
}

fn runner_with(builder: &SnapshotBuilder, registry: &NodeRegistry, settings: RunnerSettings) -> Runner {
    let mut db = Database::new();
    db.load_snapshot_bytes(builder.build()).unwrap();
    Runner::initialize(db, settings, registry)
}

fn runner(builder: &SnapshotBuilder) -> Runner {
    runner_with(builder, &NodeRegistry::new(), RunnerSettings::default())
}

/// root(1) -> 2 -> 3, all dialogue without response text
fn linear() -> SnapshotBuilder {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(1, "Linear"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let first = b.add_node(NodeSpec::dialogue(2, conv).voice("First"));
    let second = b.add_node(NodeSpec::dialogue(3, conv).voice("Second"));
    b.add_edge(EdgeSpec::new(1, root, first));
    b.add_edge(EdgeSpec::new(2, first, second));
    b
}

#[test]
fn test_linear_conversation_callback_order() {
    let mut runner = runner(&linear());
    let listener = Recorder::new(Script::default());

    let handle = runner.start_conversation(1, listener.clone(), owner()).unwrap();

    assert_eq!(
        listener.events(),
        vec![
            "enter:1",
            "node_enter:2",
            "speech:2",
            "node_exit:2",
            "node_enter:3",
            "speech:3",
            "exit:1",
            "cleanup:1",
        ]
    );
    assert!(!runner.is_active(handle));
    assert_eq!(runner.active_count(), 0);
}

#[test]
fn test_highest_priority_subset_keeps_edge_order() {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(1, "Priorities"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let hub = b.add_node(NodeSpec::logic(2, conv).prevent_response());
    let targets: Vec<i32> = (10..14)
        .map(|id| b.add_node(NodeSpec::dialogue(id, conv)))
        .collect();
    b.add_edge(EdgeSpec::new(1, root, hub));
    for (edge_id, (target, priority)) in targets.iter().zip([3, 1, 3, 2]).enumerate() {
        b.add_edge(EdgeSpec::new(10 + edge_id as i32, hub, *target).priority(priority));
    }

    let mut runner = runner(&b);
    let listener = Recorder::new(Script::default());
    runner.start_conversation(1, listener.clone(), owner()).unwrap();

    let candidates = listener.auto_candidates.lock().clone();
    // root -> hub is a single choice without response text
    assert_eq!(candidates[0], vec![2]);
    assert_eq!(candidates[1], vec![10, 12]);
    assert!(listener.events().contains(&"node_enter:10".to_string()));
}

#[test]
fn test_prevent_response_never_prompts() {
    let mut b = SnapshotBuilder::new(1, "en");
    let npc = b.add_actor(ActorSpec::new(1, "Npc"));
    let player = b.add_actor(ActorSpec::new(2, "Player"));
    let conv = b.add_conversation(ConversationSpec::new(1, "Suppressed"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let hub = b.add_node(NodeSpec::dialogue(2, conv).actor(npc).prevent_response());
    let low = b.add_node(NodeSpec::dialogue(3, conv).actor(npc).ui_response("Low"));
    let high = b.add_node(NodeSpec::dialogue(4, conv).actor(player).ui_response("High"));
    b.add_edge(EdgeSpec::new(1, root, hub));
    b.add_edge(EdgeSpec::new(2, hub, low).priority(1));
    b.add_edge(EdgeSpec::new(3, hub, high).priority(5));

    let mut runner = runner(&b);
    let listener = Recorder::new(Script::default());
    runner.start_conversation(1, listener.clone(), owner()).unwrap();

    let events = listener.events();
    assert!(!events.iter().any(|e| e.starts_with("decision")));
    assert!(events.contains(&"node_enter:4".to_string()));
    assert!(!events.contains(&"node_enter:3".to_string()));
}

#[test]
fn test_multiple_choices_with_mixed_actors_auto_advance() {
    let mut b = SnapshotBuilder::new(1, "en");
    let npc = b.add_actor(ActorSpec::new(1, "Npc"));
    let player = b.add_actor(ActorSpec::new(2, "Player"));
    let conv = b.add_conversation(ConversationSpec::new(1, "Mixed"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let a = b.add_node(NodeSpec::dialogue(2, conv).actor(npc));
    let c = b.add_node(NodeSpec::dialogue(3, conv).actor(player));
    b.add_edge(EdgeSpec::new(1, root, a));
    b.add_edge(EdgeSpec::new(2, root, c));

    let mut runner = runner(&b);
    let listener = Recorder::new(Script::default());
    runner.start_conversation(1, listener.clone(), owner()).unwrap();

    assert!(!listener.events().iter().any(|e| e.starts_with("decision")));
    assert_eq!(listener.auto_candidates.lock()[0], vec![2, 3]);
}

fn single_choice() -> SnapshotBuilder {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(1, "Single"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let line = b.add_node(NodeSpec::dialogue(2, conv).voice("Are you ready?"));
    let answer = b.add_node(NodeSpec::dialogue(3, conv).voice("Yes.").ui_response("Yes"));
    b.add_edge(EdgeSpec::new(1, root, line));
    b.add_edge(EdgeSpec::new(2, line, answer));
    b
}

#[test]
fn test_single_choice_prompts_by_default() {
    let mut runner = runner(&single_choice());
    let listener = Recorder::new(Script::default());
    runner.start_conversation(1, listener.clone(), owner()).unwrap();

    let events = listener.events();
    assert!(events.contains(&"decision:3".to_string()));
    assert!(events.contains(&"node_enter:3".to_string()));
}

#[test]
fn test_single_choice_suppressed_by_setting() {
    let settings = RunnerSettings {
        prevent_single_node_choices: true,
        ..RunnerSettings::default()
    };
    let mut runner = runner_with(&single_choice(), &NodeRegistry::new(), settings);
    let listener = Recorder::new(Script::default());
    runner.start_conversation(1, listener.clone(), owner()).unwrap();

    let events = listener.events();
    assert!(!events.iter().any(|e| e.starts_with("decision")));
    assert!(events.contains(&"node_enter:3".to_string()));
}

#[test]
fn test_stale_handle_after_cancel_is_ignored() {
    let mut runner = runner(&linear());
    let listener = Recorder::new(Script {
        hold_enter: true,
        ..Script::default()
    });

    let handle = runner.start_conversation(1, listener.clone(), owner()).unwrap();
    let captured = listener.take_held();
    assert!(captured.is_valid());
    assert_eq!(runner.conversation_state(handle), Some(ConversationState::ConversationEnter));

    runner.stop_conversation(handle);
    let after_cancel = listener.events();
    assert_eq!(after_cancel, vec!["enter:1", "cancelled:1", "cleanup:1"]);

    assert!(!captured.is_valid());
    captured.notify_ready();
    assert_eq!(runner.pump(), 0);
    assert_eq!(listener.events(), after_cancel);
    assert_eq!(runner.active_count(), 0);
}

#[test]
fn test_recycled_context_invalidates_old_handle() {
    let settings = RunnerSettings {
        max_concurrent_conversations: 1,
        ..RunnerSettings::default()
    };
    let mut runner = runner_with(&linear(), &NodeRegistry::new(), settings);

    let first = runner
        .start_conversation(1, Recorder::new(Script::default()), owner())
        .unwrap();
    assert!(!runner.is_active(first));

    let held = Recorder::new(Script {
        hold_speech: true,
        ..Script::default()
    });
    let second = runner.start_conversation(1, held, owner()).unwrap();

    assert_eq!(first.context_id(), second.context_id());
    assert_ne!(first.sequence(), second.sequence());
    assert!(!runner.is_active(first));
    assert!(runner.is_active(second));
    assert_eq!(runner.context_capacity(), 1);
}

struct LatentTask {
    signal: Arc<Mutex<Option<TaskSignal>>>,
    ended: Arc<AtomicBool>,
}

impl ActionTask for LatentTask {
    fn activate(&mut self, signal: TaskSignal) {
        *self.signal.lock() = Some(signal);
    }

    fn end_task(&mut self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

struct LatentFixture {
    runner: Runner,
    signal: Arc<Mutex<Option<TaskSignal>>>,
    ended: Arc<AtomicBool>,
    token: Arc<Mutex<Option<CancellationToken>>>,
}

/// root -> dialogue node 2 with a latent action
fn latent_fixture() -> LatentFixture {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(1, "Latent"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let node = b.add_node(NodeSpec::dialogue(2, conv).voice("Watch this").with_action());
    b.add_edge(EdgeSpec::new(1, root, node));

    let signal = Arc::new(Mutex::new(None));
    let ended = Arc::new(AtomicBool::new(false));
    let token = Arc::new(Mutex::new(None));

    let mut registry = NodeRegistry::new();
    {
        let signal = signal.clone();
        let ended = ended.clone();
        let token = token.clone();
        registry.register_action(2, move |ctx| {
            assert_eq!(ctx.node_id(), 2);
            *token.lock() = Some(ctx.cancellation_token());
            Some(Box::new(LatentTask {
                signal: signal.clone(),
                ended: ended.clone(),
            }) as Box<dyn ActionTask>)
        });
    }

    LatentFixture {
        runner: runner_with(&b, &registry, RunnerSettings::default()),
        signal,
        ended,
        token,
    }
}

#[test]
fn test_speech_then_action_advances_after_both() {
    let mut fx = latent_fixture();
    let listener = Recorder::new(Script {
        hold_speech: true,
        ..Script::default()
    });
    let handle = fx.runner.start_conversation(1, listener.clone(), owner()).unwrap();
    assert!(listener.events().contains(&"speech:2".to_string()));
    assert!(fx.signal.lock().is_some());

    listener.take_held().notify_ready();
    fx.runner.pump();
    assert_eq!(fx.runner.conversation_state(handle), Some(ConversationState::ActionAndSpeech));

    fx.signal.lock().take().unwrap().complete();
    fx.runner.pump();
    assert!(!fx.runner.is_active(handle));
    assert_eq!(listener.events().last().unwrap(), "cleanup:1");
}

#[test]
fn test_action_then_speech_advances_after_both() {
    let mut fx = latent_fixture();
    let listener = Recorder::new(Script {
        hold_speech: true,
        ..Script::default()
    });
    let handle = fx.runner.start_conversation(1, listener.clone(), owner()).unwrap();

    let signal = fx.signal.lock().take().unwrap();
    std::thread::spawn(move || signal.complete()).join().unwrap();
    fx.runner.pump();
    assert_eq!(fx.runner.conversation_state(handle), Some(ConversationState::ActionAndSpeech));
    assert!(!listener.events().iter().any(|e| e.starts_with("exit")));

    listener.take_held().notify_ready();
    fx.runner.pump();
    assert!(!fx.runner.is_active(handle));
    assert!(!fx.ended.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_ends_latent_task() {
    let mut fx = latent_fixture();
    let listener = Recorder::new(Script::default());
    let handle = fx.runner.start_conversation(1, listener.clone(), owner()).unwrap();
    assert!(fx.runner.is_active(handle));

    let token = fx.token.lock().clone().unwrap();
    assert!(!token.is_cancelled());

    fx.runner.stop_conversation(handle);
    assert!(fx.ended.load(Ordering::SeqCst));
    assert!(token.is_cancelled());
    assert_eq!(
        &listener.events()[listener.events().len() - 2..],
        &["cancelled:1".to_string(), "cleanup:1".to_string()]
    );

    // late completion from the cancelled task
    fx.signal.lock().take().unwrap().complete();
    assert_eq!(fx.runner.pump(), 1);
    assert_eq!(fx.runner.active_count(), 0);
}

#[test]
fn test_auto_decision_outside_valid_set_is_an_error() {
    let mut b = linear();
    let conv = 0;
    // unreachable node the listener will try to jump to
    b.add_node(NodeSpec::dialogue(99, conv));

    let mut runner = runner(&b);
    let listener = Recorder::new(Script {
        auto_pick: Some(99),
        ..Script::default()
    });
    let handle = runner.start_conversation(1, listener.clone(), owner()).unwrap();

    assert_eq!(listener.events(), vec!["enter:1", "error", "cleanup:1"]);
    assert!(!runner.is_active(handle));
}

#[test]
fn test_conditions_filter_choices() {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(1, "Gated"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let locked = b.add_node(NodeSpec::dialogue(2, conv).with_condition().ui_response("Locked"));
    let open = b.add_node(NodeSpec::dialogue(3, conv).with_condition().ui_response("Open"));
    let free = b.add_node(NodeSpec::dialogue(4, conv).ui_response("Free"));
    b.add_edge(EdgeSpec::new(1, root, locked));
    b.add_edge(EdgeSpec::new(2, root, open));
    b.add_edge(EdgeSpec::new(3, root, free));

    let evaluated = Arc::new(Mutex::new(Vec::new()));
    let mut registry = NodeRegistry::new();
    for (id, pass) in [(2, false), (3, true)] {
        let evaluated = evaluated.clone();
        registry.register_condition(id, move |ctx| {
            evaluated.lock().push(ctx.node_id());
            pass
        });
    }

    let mut runner = runner_with(&b, &registry, RunnerSettings::default());
    let listener = Recorder::new(Script {
        hold_decision: true,
        ..Script::default()
    });
    let handle = runner.start_conversation(1, listener.clone(), owner()).unwrap();

    assert_eq!(*evaluated.lock(), vec![2, 3]);
    assert!(listener.events().contains(&"decision:3,4".to_string()));
    assert_eq!(runner.conversation_state(handle), Some(ConversationState::EvaluateEdges));

    let decision = listener.take_held();

    // filtered-out node and out-of-range index are both rejected
    decision.select_choice_by_id(2);
    decision.select_choice_by_index(7);
    decision.notify_ready();
    runner.pump();
    assert_eq!(runner.conversation_state(handle), Some(ConversationState::EvaluateEdges));
    assert!(decision.is_valid());

    decision.select_choice_by_index(1);
    runner.pump();
    assert!(listener.events().contains(&"node_enter:4".to_string()));
    assert!(!runner.is_active(handle));
}

#[test]
fn test_unregistered_condition_passes() {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(1, "Unregistered"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let gated = b.add_node(NodeSpec::logic(2, conv).with_condition().with_action());
    b.add_edge(EdgeSpec::new(1, root, gated));

    let mut runner = runner(&b);
    assert!(!runner.validate_jump_tables().is_ok());

    let listener = Recorder::new(Script::default());
    runner.start_conversation(1, listener.clone(), owner()).unwrap();
    let events = listener.events();
    assert!(events.contains(&"node_enter:2".to_string()));
    assert_eq!(events.last().unwrap(), "cleanup:1");
}

#[test]
fn test_instant_action_sees_its_node() {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(7, "Instant"));
    let root = b.add_node(NodeSpec::root(1, conv));
    let logic = b.add_node(NodeSpec::logic(2, conv).with_action());
    b.add_edge(EdgeSpec::new(1, root, logic));

    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::new();
    {
        let calls = calls.clone();
        registry.register_action(2, move |ctx| {
            assert_eq!(ctx.conversation_id(), 7);
            assert!(ctx.task_owner().is_some());
            assert!(!ctx.is_cancelled());
            calls.fetch_add(1, Ordering::SeqCst);
            None
        });
    }

    let mut runner = runner_with(&b, &registry, RunnerSettings::default());
    let listener = Recorder::new(Script::default());
    let handle = runner.start_conversation(7, listener.clone(), owner()).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!runner.is_active(handle));
    assert!(!listener.events().iter().any(|e| e.starts_with("speech")));
}

#[test]
fn test_conversation_without_root_reports_error() {
    let mut b = SnapshotBuilder::new(1, "en");
    let conv = b.add_conversation(ConversationSpec::new(1, "Rootless"));
    b.add_node(NodeSpec::dialogue(2, conv));

    let mut runner = runner(&b);
    let listener = Recorder::new(Script::default());
    let handle = runner.start_conversation(1, listener.clone(), owner()).unwrap();

    assert_eq!(listener.events(), vec!["error", "cleanup:1"]);
    assert!(!runner.is_active(handle));
    assert_eq!(runner.pooled_count(), 10);
}

#[test]
fn test_stop_all_conversations() {
    let mut runner = runner(&linear());
    let listeners: Vec<Arc<Recorder>> = (0..3)
        .map(|_| {
            Recorder::new(Script {
                hold_speech: true,
                ..Script::default()
            })
        })
        .collect();
    let handles: Vec<_> = listeners
        .iter()
        .map(|l| runner.start_conversation(1, l.clone(), owner()).unwrap())
        .collect();
    assert_eq!(runner.active_count(), 3);

    runner.remote().stop_all_conversations();
    runner.pump();

    assert_eq!(runner.active_count(), 0);
    for (listener, handle) in listeners.iter().zip(handles) {
        assert!(!runner.is_active(handle));
        assert_eq!(listener.events().last().unwrap(), "cleanup:1");
        assert!(listener.events().contains(&"cancelled:1".to_string()));
    }
}

#[test]
fn test_many_concurrent_conversations_are_independent() {
    let mut runner = runner(&single_choice());
    let listeners: Vec<Arc<Recorder>> = (0..5)
        .map(|_| {
            Recorder::new(Script {
                hold_decision: true,
                ..Script::default()
            })
        })
        .collect();
    let handles: Vec<_> = listeners
        .iter()
        .map(|l| runner.start_conversation(1, l.clone(), owner()).unwrap())
        .collect();

    // resolve in reverse order
    for (listener, handle) in listeners.iter().zip(&handles).rev() {
        assert!(runner.is_active(*handle));
        listener.take_held().select_choice_by_index(0);
        runner.pump();
        assert!(!runner.is_active(*handle));
    }
    assert_eq!(runner.pooled_count(), 10);
}

proptest! {
    #[test]
    fn prop_auto_candidates_are_top_priority_in_edge_order(
        priorities in proptest::collection::vec(-5i32..5, 1..8)
    ) {
        let mut b = SnapshotBuilder::new(1, "en");
        let conv = b.add_conversation(ConversationSpec::new(1, "Random"));
        let root = b.add_node(NodeSpec::root(1, conv));
        let hub = b.add_node(NodeSpec::logic(2, conv).prevent_response());
        b.add_edge(EdgeSpec::new(1, root, hub));
        for (i, priority) in priorities.iter().enumerate() {
            let target = b.add_node(NodeSpec::logic(100 + i as i32, conv));
            b.add_edge(EdgeSpec::new(100 + i as i32, hub, target).priority(*priority));
        }

        let mut runner = runner(&b);
        let listener = Recorder::new(Script::default());
        runner.start_conversation(1, listener.clone(), owner()).unwrap();

        let top = *priorities.iter().max().unwrap();
        let expected: Vec<i32> = priorities
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == top)
            .map(|(i, _)| 100 + i as i32)
            .collect();
        let candidates = listener.auto_candidates.lock().clone();
        prop_assert_eq!(&candidates[1], &expected);
        prop_assert_eq!(runner.active_count(), 0);
    }
}
